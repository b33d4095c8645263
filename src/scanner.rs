use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ScanSettings, PROGRESS_INTERVAL};
use crate::error::{ProbeError, ProbeResult};
use crate::observer::ScanObserver;
use crate::ports;
use crate::probe;
use crate::types::{PortResult, PortStatus, ScanProgress};

/// Scan `ports` on `host` and report through `observer`, finishing with exactly one `on_complete`.
///
/// - `concurrency` and `timeout_ms` are clamped with [`ScanSettings::effective`]; repeated ports
///   are probed once.
/// - Keeps up to the clamped concurrency of probes in flight on the calling task, launching a new
///   probe as soon as any settles (a sliding window, not fixed batches).
/// - Emits `on_result` per settled probe in completion order, and `on_progress` at most once per
///   `PROGRESS_INTERVAL` plus once for the final result.
/// - `cancel` is checked before launching probes and when a settled result is consumed. After
///   cancellation, in-flight probes run to their own deadline and their results are discarded.
/// - An observer error or panic degrades the scan to `on_complete(vec![])`. A panic inside
///   `on_complete` itself is logged and swallowed.
pub async fn run<O>(
    host: &str,
    ports: &[u16],
    concurrency: usize,
    timeout_ms: u64,
    observer: &mut O,
    cancel: &CancellationToken,
) where
    O: ScanObserver + ?Sized,
{
    let ports = ports::unique_ports(ports);
    let settings = ScanSettings::effective(concurrency, timeout_ms, ports.len());
    let results = run_guarded(host, &ports, settings, observer, cancel).await;
    complete_guarded(observer, results);
}

/// Deliver the final result collection, logging instead of unwinding if the observer panics.
pub(crate) fn complete_guarded<O>(observer: &mut O, results: Vec<PortResult>)
where
    O: ScanObserver + ?Sized,
{
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_complete(results))) {
        log::error!(
            "[scanner] completion_failed: observer panicked: {}",
            panic_message(&*panic)
        );
    }
}

/// Everything `run` does except the completion callback.
pub(crate) async fn run_guarded<O>(
    host: &str,
    ports: &[u16],
    settings: ScanSettings,
    observer: &mut O,
    cancel: &CancellationToken,
) -> Vec<PortResult>
where
    O: ScanObserver + ?Sized,
{
    let outcome = AssertUnwindSafe(drive(host, ports, settings, observer, cancel))
        .catch_unwind()
        .await;

    let err = match outcome {
        Ok(Ok(results)) => return results,
        Ok(Err(e)) => e,
        Err(panic) => ProbeError::ScanFatal(format!("observer panicked: {}", panic_message(&*panic))),
    };
    log::error!("[scanner] scan_failed: host={host} err={err}");
    Vec::new()
}

async fn drive<O>(
    host: &str,
    ports: &[u16],
    settings: ScanSettings,
    observer: &mut O,
    cancel: &CancellationToken,
) -> ProbeResult<Vec<PortResult>>
where
    O: ScanObserver + ?Sized,
{
    let ports = ports::unique_ports(ports);
    let total = ports.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let ip = match probe::resolve_host(host).await {
        Ok(ip) => Some(ip),
        Err(e) => {
            log::warn!("[scanner] resolve_failed: host={host} err={e}; every port will be filtered");
            None
        }
    };

    log::debug!(
        "[scanner] start: host={host} ip={ip:?} ports={total} concurrency={} timeout_ms={}",
        settings.concurrency(),
        settings.timeout().as_millis()
    );

    let mut pending = ports.iter().copied();
    let mut in_flight = FuturesUnordered::new();
    let mut results = Vec::with_capacity(total);
    let mut progress = ProgressTracker::new(total);
    let mut cancelled = false;
    let mut discarded = 0usize;

    loop {
        while !cancelled && in_flight.len() < settings.concurrency() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(port) = pending.next() else {
                break;
            };
            in_flight.push(launch(ip, host, port, settings.timeout()));
        }

        let Some(result) = in_flight.next().await else {
            break;
        };

        if cancelled || cancel.is_cancelled() {
            cancelled = true;
            discarded += 1;
            continue;
        }

        log::trace!(
            "[scanner] settled: port={} status={} duration_ms={}",
            result.port,
            result.status,
            result.duration_ms
        );
        observer.on_result(&result).map_err(callback_failed)?;
        results.push(result);

        if let Some(snapshot) = progress.record(results.len()) {
            observer.on_progress(&snapshot).map_err(callback_failed)?;
        }
    }

    let open = results.iter().filter(|r| r.status == PortStatus::Open).count();
    log::debug!(
        "[scanner] finished: host={host} accepted={} open={open} cancelled={cancelled} discarded={discarded}",
        results.len()
    );
    Ok(results)
}

async fn launch(ip: Option<IpAddr>, host: &str, port: u16, timeout: Duration) -> PortResult {
    match ip {
        Some(ip) => probe::probe_port(SocketAddr::new(ip, port), host, timeout).await,
        None => probe::unreachable_result(port),
    }
}

fn callback_failed(e: anyhow::Error) -> ProbeError {
    ProbeError::ScanFatal(format!("observer callback failed: {e:#}"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Throttles progress emissions to one per `PROGRESS_INTERVAL`, never skipping the last one.
#[derive(Debug)]
struct ProgressTracker {
    total: usize,
    started: Instant,
    last_emit: Option<Instant>,
}

impl ProgressTracker {
    fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            last_emit: None,
        }
    }

    fn record(&mut self, scanned: usize) -> Option<ScanProgress> {
        let now = Instant::now();
        let due = scanned >= self.total
            || self
                .last_emit
                .map_or(true, |last| now.duration_since(last) >= PROGRESS_INTERVAL);
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(progress_snapshot(scanned, self.total, now.duration_since(self.started)))
    }
}

/// Build a progress snapshot. `rate` is ports per second over the whole elapsed time.
pub fn progress_snapshot(scanned: usize, total: usize, elapsed: Duration) -> ScanProgress {
    let percent = if total == 0 {
        100
    } else {
        ((scanned as f64 / total as f64) * 100.0).round().min(100.0) as u8
    };
    let elapsed_sec = elapsed.as_secs_f64();
    let rate = if elapsed_sec > 0.0 {
        scanned as f64 / elapsed_sec
    } else {
        0.0
    };
    ScanProgress {
        scanned,
        total,
        percent,
        rate,
        elapsed_sec,
    }
}
