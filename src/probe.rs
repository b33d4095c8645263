//! Single-port TCP probe.
//!
//! A probe moves through `Connecting -> BannerWindow -> Settled`. Every transition goes through
//! [`Probe::apply`], which ignores events once the probe has settled, so a probe can only be
//! classified once even when a late event (data after a timeout, an error after data) arrives.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};

use crate::config::{BANNER_LIMIT, BANNER_WINDOW};
use crate::types::{PortResult, PortStatus};

/// What to send once connected, before waiting for response bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePayload {
    /// `HEAD / HTTP/1.0` for web-ish ports.
    HttpHead,
    /// Service speaks first (SSH, FTP, SMTP...). Just listen.
    Greeting,
    /// TLS-only service; a plaintext probe is pointless. Just listen.
    Encrypted,
    /// Unknown service: nudge it with a bare CRLF.
    Generic,
}

const HTTP_PORTS: &[u16] = &[80, 81, 591, 3000, 5000, 8000, 8008, 8080, 8081, 8088, 8888, 9000, 9200];
const GREETING_PORTS: &[u16] = &[21, 22, 23, 25, 110, 143, 587, 3306, 5900, 6667];
const ENCRYPTED_PORTS: &[u16] = &[443, 465, 636, 853, 990, 993, 995, 5986, 8443];

pub fn payload_for_port(port: u16) -> ProbePayload {
    if HTTP_PORTS.contains(&port) {
        ProbePayload::HttpHead
    } else if GREETING_PORTS.contains(&port) {
        ProbePayload::Greeting
    } else if ENCRYPTED_PORTS.contains(&port) {
        ProbePayload::Encrypted
    } else {
        ProbePayload::Generic
    }
}

impl ProbePayload {
    /// Bytes to write after connecting, if any.
    pub fn bytes(self, host: &str) -> Option<Vec<u8>> {
        match self {
            ProbePayload::HttpHead => {
                Some(format!("HEAD / HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n").into_bytes())
            }
            ProbePayload::Generic => Some(b"\r\n".to_vec()),
            ProbePayload::Greeting | ProbePayload::Encrypted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Connecting,
    BannerWindow,
    Settled {
        status: PortStatus,
        banner: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Connected,
    ConnectFailed(io::ErrorKind),
    ConnectTimedOut,
    /// Response bytes arrived during the banner window.
    Data(Vec<u8>),
    /// Banner window ended without bytes (deadline, EOF or read error).
    Silent,
}

/// Map a connect error to a port status. Only an active rejection counts as closed.
pub fn classify_connect_error(kind: io::ErrorKind) -> PortStatus {
    match kind {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => PortStatus::Closed,
        _ => PortStatus::Filtered,
    }
}

/// Turn raw response bytes into banner text: at most `BANNER_LIMIT` bytes, lossy UTF-8, trimmed.
pub fn banner_text(bytes: &[u8]) -> Option<String> {
    let bytes = &bytes[..bytes.len().min(BANNER_LIMIT)];
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[derive(Debug)]
pub struct Probe {
    port: u16,
    started: Instant,
    state: ProbeState,
    settled_after: Option<Duration>,
}

impl Probe {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            started: Instant::now(),
            state: ProbeState::Connecting,
            settled_after: None,
        }
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, ProbeState::Settled { .. })
    }

    /// Feed an event into the state machine. Returns `false` if the event was ignored.
    pub fn apply(&mut self, event: ProbeEvent) -> bool {
        let next = match (&self.state, event) {
            (ProbeState::Settled { .. }, _) => return false,
            (ProbeState::Connecting, ProbeEvent::Connected) => ProbeState::BannerWindow,
            (ProbeState::Connecting, ProbeEvent::ConnectFailed(kind)) => ProbeState::Settled {
                status: classify_connect_error(kind),
                banner: None,
            },
            (ProbeState::Connecting, ProbeEvent::ConnectTimedOut) => ProbeState::Settled {
                status: PortStatus::Filtered,
                banner: None,
            },
            (ProbeState::BannerWindow, ProbeEvent::Data(bytes)) => ProbeState::Settled {
                status: PortStatus::Open,
                banner: banner_text(&bytes),
            },
            (ProbeState::BannerWindow, ProbeEvent::Silent) => ProbeState::Settled {
                status: PortStatus::Open,
                banner: None,
            },
            _ => return false,
        };
        if matches!(next, ProbeState::Settled { .. }) {
            self.settled_after = Some(self.started.elapsed());
        }
        self.state = next;
        true
    }

    /// Consume the probe into its result. An unsettled probe reports `filtered`.
    pub fn into_result(self) -> PortResult {
        let elapsed = self.settled_after.unwrap_or_else(|| self.started.elapsed());
        let (status, banner) = match self.state {
            ProbeState::Settled { status, banner } => (status, banner),
            _ => (PortStatus::Filtered, None),
        };
        PortResult {
            port: self.port,
            status,
            duration_ms: elapsed.as_millis() as u64,
            banner,
            timestamp: now_rfc3339(),
        }
    }
}

/// Probe one port: connect with `timeout`, then give the service `BANNER_WINDOW` to talk.
///
/// Never fails; every network outcome maps to a `PortStatus`. The socket is dropped before
/// returning whatever the outcome.
pub async fn probe_port(addr: SocketAddr, host: &str, timeout: Duration) -> PortResult {
    let mut probe = Probe::new(addr.port());

    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            probe.apply(ProbeEvent::Connected);
            let event = read_banner(&mut stream, host, addr.port()).await;
            probe.apply(event);
        }
        Ok(Err(e)) => {
            log::trace!("[probe] connect_error: addr={addr} kind={:?} err={e}", e.kind());
            probe.apply(ProbeEvent::ConnectFailed(e.kind()));
        }
        Err(_) => {
            probe.apply(ProbeEvent::ConnectTimedOut);
        }
    }

    probe.into_result()
}

/// A port that could not be attempted at all (e.g. the host did not resolve).
pub fn unreachable_result(port: u16) -> PortResult {
    let mut probe = Probe::new(port);
    probe.apply(ProbeEvent::ConnectFailed(io::ErrorKind::NotFound));
    let mut result = probe.into_result();
    result.duration_ms = 0;
    result
}

async fn read_banner(stream: &mut TcpStream, host: &str, port: u16) -> ProbeEvent {
    let payload = payload_for_port(port);
    if let Some(bytes) = payload.bytes(host) {
        // A failed write does not change the verdict: the connect already succeeded.
        if let Err(e) = stream.write_all(&bytes).await {
            log::trace!("[probe] payload_write_failed: port={port} err={e}");
        }
    }

    let mut buf = vec![0u8; BANNER_LIMIT];
    match time::timeout(BANNER_WINDOW, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            ProbeEvent::Data(buf)
        }
        _ => ProbeEvent::Silent,
    }
}

/// Resolve a normalized host to one address, preferring IPv4.
pub async fn resolve_host(host: &str) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<SocketAddr> = lookup_host((host, 0)).await?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}")))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
