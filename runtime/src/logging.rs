//! Tracing subscriber setup.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr
/// so that `--json` results on stdout stay machine-readable.
pub fn setup_logging(config: &LoggingSettings, json_override: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_override || config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to install logger: {e}"))?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to install logger: {e}"))?;
    }
    Ok(())
}

/// Level used when neither the config nor `RUST_LOG` say otherwise,
/// adjusted by `-v` / `-q`.
pub fn level_for(verbose: u8, quiet: bool, configured: &str) -> String {
    if quiet {
        "warn".to_string()
    } else {
        match verbose {
            0 => configured.to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}
