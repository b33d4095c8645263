use std::time::Duration;

/// Lower bound on simultaneous in-flight probes.
pub const MIN_CONCURRENCY: usize = 10;
/// Upper bound on simultaneous in-flight probes.
pub const MAX_CONCURRENCY: usize = 500;

/// Scans with more ports than this get the tighter timeout ceiling.
pub const LARGE_SCAN_PORTS: usize = 500;
pub const LARGE_SCAN_TIMEOUT_CEILING_MS: u64 = 400;
pub const DEFAULT_TIMEOUT_CEILING_MS: u64 = 800;

/// How long a connected socket is given to produce response bytes.
pub const BANNER_WINDOW: Duration = Duration::from_millis(400);
/// Max number of banner bytes kept.
pub const BANNER_LIMIT: usize = 256;

/// Minimum wall time between two progress emissions.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Effective per-scan limits after clamping caller requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    concurrency: usize,
    timeout: Duration,
}

impl ScanSettings {
    /// Clamp a caller's requested concurrency and connect timeout.
    ///
    /// Concurrency is clamped to `[MIN_CONCURRENCY, MAX_CONCURRENCY]`. The timeout can only be
    /// lowered: it is capped at 400ms for scans over 500 ports and at 800ms otherwise.
    pub fn effective(requested_concurrency: usize, requested_timeout_ms: u64, port_count: usize) -> Self {
        Self {
            concurrency: clamp_concurrency(requested_concurrency),
            timeout: Duration::from_millis(clamp_timeout_ms(requested_timeout_ms, port_count)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

pub fn clamp_timeout_ms(requested_ms: u64, port_count: usize) -> u64 {
    let ceiling = if port_count > LARGE_SCAN_PORTS {
        LARGE_SCAN_TIMEOUT_CEILING_MS
    } else {
        DEFAULT_TIMEOUT_CEILING_MS
    };
    requested_ms.min(ceiling)
}
