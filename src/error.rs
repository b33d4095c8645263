use thiserror::Error;

use crate::types::ScanId;

/// Errors surfaced by the probing library.
///
/// Per-port network failures are not errors: they are folded into a
/// [`PortStatus`](crate::types::PortStatus) by the probe itself.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid port: {0} (ports must be 1-65535)")]
    InvalidPort(u16),

    #[error("scan {0} is already running")]
    ScanExists(ScanId),

    #[error("scan failed: {0}")]
    ScanFatal(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
