//! JSON persistence shared by both model backends.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("need at least {required} samples, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },
    #[error("sample {index} is {width}x{height}, expected {expected}x{expected}")]
    SizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected: u32,
    },
    #[error("invalid model parameters: {0}")]
    InvalidParams(String),
    #[error("model I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model file {path} is malformed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("model is inconsistent: {0}")]
    Corrupt(String),
}

/// Serialize `value` to `path`, creating parent directories.
///
/// The file is overwritten in place; concurrent readers may observe a
/// partial write and should treat a load failure as retryable.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ModelError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let bytes = serde_json::to_vec(value).map_err(|source| ModelError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, bytes).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ModelError::Format {
        path: path.to_path_buf(),
        source,
    })
}
