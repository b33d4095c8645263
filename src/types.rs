use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for one scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ScanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScanId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller request for a single-host scan. `host` is raw input; it is normalized at start.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanRequest {
    pub scan_id: ScanId,
    pub host: String,
    pub ports: Vec<u16>,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl ScanRequest {
    pub fn new(host: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            scan_id: ScanId::new(),
            host: host.into(),
            ports,
            concurrency: 200,
            timeout_ms: crate::config::DEFAULT_TIMEOUT_CEILING_MS,
        }
    }

    pub fn with_scan_id(mut self, scan_id: impl Into<ScanId>) -> Self {
        self.scan_id = scan_id.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Reachability of a probed port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortStatus::Open => "open",
            PortStatus::Closed => "closed",
            PortStatus::Filtered => "filtered",
        };
        f.write_str(s)
    }
}

/// Outcome of one probe. Collected in completion order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub status: PortStatus,
    pub duration_ms: u64,
    pub banner: Option<String>,
    pub timestamp: String,
}

/// Progress snapshot, recomputed on every emission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub scanned: usize,
    pub total: usize,
    pub percent: u8,
    /// Ports per second since the scan started.
    pub rate: f64,
    pub elapsed_sec: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Severity of a known vulnerability record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn risk_level(self) -> RiskLevel {
        match self {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Instant, per-port classification of an open port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortInsight {
    pub port: u16,
    pub risk_level: RiskLevel,
    pub title: String,
    pub short_description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Vulnerability {
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub remediation: String,
    pub port: u16,
}

/// Aggregate risk report over the open ports of a finished scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SecurityReport {
    pub risk_score: u8,
    pub vulnerabilities: Vec<Vulnerability>,
    pub summary: String,
}

/// Input to the aggregate analyzer: an open port and its banner if one was captured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub banner: Option<String>,
}

impl From<&PortResult> for OpenPort {
    fn from(r: &PortResult) -> Self {
        Self {
            port: r.port,
            banner: r.banner.clone(),
        }
    }
}
