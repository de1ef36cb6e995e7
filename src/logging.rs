//! Logging initialization.
//!
//! Output target is selected at startup: off, stdout, stderr (default) or an
//! append-mode file. `RUST_LOG` overrides the level when set.

use anyhow::Result;
use std::fs::OpenOptions;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `log` is `0`/`off`, `1`/`stdout`,
/// `2`/`stderr`, or a filename.
pub fn init(verbose: bool, log: &str) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    match log {
        "0" | "off" => {}
        "1" | "stdout" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
        }
        "2" | "stderr" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
        }
        filename => {
            let file = OpenOptions::new().create(true).append(true).open(filename)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
        }
    }
    Ok(())
}
