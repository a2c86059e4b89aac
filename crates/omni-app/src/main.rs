#![forbid(unsafe_code)]

//! Binary entrypoint: loads configuration, then runs the hub or site
//! runtime until shutdown.

mod bootstrap;
mod error;

use std::process::ExitCode;

use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    match bootstrap::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "startup failed");
            eprintln!("omnicloud: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
