//! Library crate for host-probe-rs: single-host TCP probing with banner capture and risk scoring.
pub mod config;
pub mod error;
pub mod observer;
pub mod ports;
pub mod probe;
pub mod registry;
pub mod risk;
pub mod scanner;
pub mod target;
pub mod types;

pub use error::{ProbeError, ProbeResult};
pub use observer::{ChannelObserver, ScanEvent, ScanObserver};
pub use registry::{ScanRegistry, StartedScan};
