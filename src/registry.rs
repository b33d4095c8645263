use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ScanSettings;
use crate::error::{ProbeError, ProbeResult};
use crate::observer::ScanObserver;
use crate::ports;
use crate::scanner;
use crate::target;
use crate::types::{ScanId, ScanRequest};

/// Tracks live scans and their cancellation tokens.
///
/// Cloning is cheap and clones share state. Independent registries do not see each other's scans.
#[derive(Clone, Default)]
pub struct ScanRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    next_generation: u64,
    scans: HashMap<ScanId, LiveScan>,
}

struct LiveScan {
    // Distinguishes a finished scan from a newer scan reusing the same id.
    generation: u64,
    cancel: CancellationToken,
}

/// Returned by a successful [`ScanRegistry::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedScan {
    pub scan_id: ScanId,
    pub host: String,
    pub port_count: usize,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `request` and start scanning in the background.
    ///
    /// Validation failures are returned before any socket is opened or any state is recorded.
    /// Must be called from within a Tokio runtime. The observer receives exactly one
    /// `on_complete`, after the registry entry has been cleared; a panic inside it is logged.
    pub fn start_scan<O>(&self, request: ScanRequest, mut observer: O) -> ProbeResult<StartedScan>
    where
        O: ScanObserver + 'static,
    {
        let host = target::normalize(&request.host)?;
        let ports = dedup_ports(&request.ports)?;
        let settings = ScanSettings::effective(request.concurrency, request.timeout_ms, ports.len());
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProbeError::ScanFatal(format!("no tokio runtime: {e}")))?;

        let scan_id = request.scan_id;
        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            if state.scans.contains_key(&scan_id) {
                return Err(ProbeError::ScanExists(scan_id));
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            state.scans.insert(
                scan_id.clone(),
                LiveScan {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            generation
        };

        let started = StartedScan {
            scan_id: scan_id.clone(),
            host: host.clone(),
            port_count: ports.len(),
            concurrency: settings.concurrency(),
            timeout_ms: settings.timeout().as_millis() as u64,
        };
        log::debug!(
            "[registry] start: scan_id={scan_id} host={host} ports={} concurrency={} timeout_ms={}",
            started.port_count,
            started.concurrency,
            started.timeout_ms
        );

        let registry = self.clone();
        runtime.spawn(async move {
            let results = scanner::run_guarded(&host, &ports, settings, &mut observer, &cancel).await;
            registry.finish(&scan_id, generation);
            scanner::complete_guarded(&mut observer, results);
        });

        Ok(started)
    }

    /// Cancel a live scan. Returns `false` if no live scan has this id.
    ///
    /// The entry is removed immediately; in-flight probes drain in the background and the
    /// observer still gets its `on_complete`.
    pub fn abort_scan(&self, scan_id: &ScanId) -> bool {
        let removed = self.lock().scans.remove(scan_id);
        match removed {
            Some(scan) => {
                scan.cancel.cancel();
                log::debug!("[registry] abort: scan_id={scan_id}");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, scan_id: &ScanId) -> bool {
        self.lock().scans.contains_key(scan_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().scans.len()
    }

    fn finish(&self, scan_id: &ScanId, generation: u64) {
        let mut state = self.lock();
        if state
            .scans
            .get(scan_id)
            .is_some_and(|scan| scan.generation == generation)
        {
            state.scans.remove(scan_id);
            log::debug!("[registry] finished: scan_id={scan_id}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop duplicate ports (first occurrence wins) and reject port 0.
fn dedup_ports(ports: &[u16]) -> ProbeResult<Vec<u16>> {
    if ports.contains(&0) {
        return Err(ProbeError::InvalidPort(0));
    }
    Ok(ports::unique_ports(ports))
}
