use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};

/// Stdout belongs to the dashboard, so logs stay off unless `RUST_LOG` asks
/// for them or a log file is given.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let mut builder = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
            builder.target(Target::Pipe(Box::new(file)));
            builder
        }
        None => Builder::from_env(Env::default().default_filter_or("off")),
    };
    builder.try_init().context("failed to initialise logging")
}
