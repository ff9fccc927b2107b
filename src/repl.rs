//! Read a line, act, print, repeat. `salir` or `exit` (any case) ends the loop.

use std::future::Future;
use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::errors::{RagError, RagResult};

#[async_trait]
pub trait LineHandler: Send {
    async fn handle(&mut self, line: &str) -> RagResult<()>;
}

pub fn is_exit(line: &str) -> bool {
    let word = line.trim().to_lowercase();
    word == "salir" || word == "exit"
}

/// Runs the loop on stdin.
pub async fn run_stdin(prompt: &str, handler: &mut dyn LineHandler) -> RagResult<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run(stdin, prompt, handler).await
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Errors from one line are printed and the loop goes on. Ctrl-C while a line is
/// running cancels that line; at the prompt it ends the loop, as does end of input.
pub async fn run<R>(reader: R, prompt: &str, handler: &mut dyn LineHandler) -> RagResult<()>
where
    R: AsyncBufRead + Unpin,
{
    run_until(reader, prompt, handler, ctrl_c).await
}

/// [`run`] with the interrupt source supplied by the caller.
pub async fn run_until<R, I, F>(
    reader: R,
    prompt: &str,
    handler: &mut dyn LineHandler,
    mut interrupt: I,
) -> RagResult<()>
where
    R: AsyncBufRead + Unpin,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    loop {
        print!("\n{prompt}");
        std::io::stdout().flush()?;

        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupt() => {
                println!();
                break;
            }
        };
        let Some(line) = next else {
            println!();
            break;
        };
        if is_exit(&line) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = tokio::select! {
            biased;
            r = handler.handle(line) => r,
            _ = interrupt() => Err(RagError::Cancelled),
        };
        match outcome {
            Ok(()) => {}
            Err(RagError::Cancelled) => println!("\n(cancelled)"),
            Err(e) => {
                tracing::warn!(error = %e, "command failed");
                println!("Error: {e}");
            }
        }
    }
    tracing::debug!("loop finished");
    Ok(())
}
