use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse task definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid task definition: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
