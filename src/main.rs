#[tokio::main]
async fn main() {
    if let Err(e) = ragbench::run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
