// Evhub Errors
// Error type shared by the hub, its event loop and the query operations

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("unknown device id {0}")]
    UnknownDevice(i32),

    #[error("no mapping for code {code} on device {device_id}")]
    NotMapped { device_id: i32, code: i32 },

    #[error("device {device_id} does not support {what}")]
    Unsupported { device_id: i32, what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type HubResult<T> = Result<T, HubError>;
