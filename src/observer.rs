use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::types::{PortResult, ScanProgress};

/// Receives the event stream of one scan.
///
/// `on_result` and `on_progress` may fail; a failure ends the scan with an empty completion.
/// Callbacks are invoked inline on the scan task and must not block.
pub trait ScanObserver: Send {
    fn on_result(&mut self, result: &PortResult) -> Result<()>;

    fn on_progress(&mut self, progress: &ScanProgress) -> Result<()>;

    /// Called exactly once per scan, with results in completion order.
    fn on_complete(&mut self, results: Vec<PortResult>);
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Result(PortResult),
    Progress(ScanProgress),
    Complete(Vec<PortResult>),
}

/// Forwards scan callbacks into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        Self { tx }
    }

    /// Observer plus the receiving end of its event stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ScanObserver for ChannelObserver {
    fn on_result(&mut self, result: &PortResult) -> Result<()> {
        self.tx
            .send(ScanEvent::Result(result.clone()))
            .map_err(|_| anyhow!("result receiver dropped"))
    }

    fn on_progress(&mut self, progress: &ScanProgress) -> Result<()> {
        self.tx
            .send(ScanEvent::Progress(progress.clone()))
            .map_err(|_| anyhow!("progress receiver dropped"))
    }

    fn on_complete(&mut self, results: Vec<PortResult>) {
        if self.tx.send(ScanEvent::Complete(results)).is_err() {
            log::debug!("[observer] completion dropped: receiver gone");
        }
    }
}
