use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use host_probe_rs::observer::ScanObserver;
use host_probe_rs::scanner;
use host_probe_rs::types::{PortResult, PortStatus, ScanProgress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    results: Vec<PortResult>,
    progress: Vec<ScanProgress>,
    completions: Vec<Vec<PortResult>>,
    fail_on_result: bool,
    panic_on_progress: bool,
    panic_on_complete: bool,
}

impl ScanObserver for Recorder {
    fn on_result(&mut self, result: &PortResult) -> Result<()> {
        if self.fail_on_result {
            bail!("sink unavailable");
        }
        self.results.push(result.clone());
        Ok(())
    }

    fn on_progress(&mut self, progress: &ScanProgress) -> Result<()> {
        if self.panic_on_progress {
            panic!("progress sink exploded");
        }
        self.progress.push(progress.clone());
        Ok(())
    }

    fn on_complete(&mut self, results: Vec<PortResult>) {
        self.completions.push(results);
        if self.panic_on_complete {
            panic!("completion sink exploded");
        }
    }
}

/// Ports with no listener on loopback, so connects are refused.
async fn closed_ports(n: usize) -> Vec<u16> {
    let mut listeners = Vec::new();
    let mut ports = HashSet::new();
    while ports.len() < n {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ports.insert(l.local_addr().unwrap().port());
        listeners.push(l);
    }
    drop(listeners);
    ports.into_iter().collect()
}

/// A listener that greets every connection with `greeting`.
async fn greeting_server(greeting: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(greeting).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });
    port
}

/// Listeners that accept every connection, never write, and hold it until the client hangs up.
/// `accepted` counts every accepted connection across all of them.
async fn silent_servers(n: usize, accepted: Arc<AtomicUsize>) -> Vec<u16> {
    let mut ports = Vec::new();
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ports.push(listener.local_addr().unwrap().port());
        let accepted = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
    }
    ports
}

/// A listener whose accept queue is full, so further SYNs are silently dropped.
/// Returns `None` if the queue never filled up on this platform.
async fn saturated_listener() -> Option<(TcpListener, Vec<TcpStream>, u16)> {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut backlog = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => backlog.push(stream),
            Ok(Err(_)) => return None,
            Err(_) => return Some((listener, backlog, addr.port())),
        }
    }
    None
}

#[tokio::test]
async fn empty_port_list_completes_immediately() {
    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &[], 10, 800, &mut rec, &CancellationToken::new()).await;
    assert!(rec.results.is_empty());
    assert!(rec.progress.is_empty());
    assert_eq!(rec.completions, vec![Vec::<PortResult>::new()]);
}

#[tokio::test]
async fn open_port_captures_banner() {
    let port = greeting_server(b"220 probe-test ready\r\n").await;
    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &[port], 10, 800, &mut rec, &CancellationToken::new()).await;

    assert_eq!(rec.results.len(), 1);
    let r = &rec.results[0];
    assert_eq!(r.status, PortStatus::Open);
    assert_eq!(r.banner.as_deref(), Some("220 probe-test ready"));
}

#[tokio::test]
async fn silent_listener_is_open_without_banner() {
    // never accepted; the kernel backlog still completes the handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &[port], 10, 800, &mut rec, &CancellationToken::new()).await;

    let r = &rec.results[0];
    assert_eq!(r.status, PortStatus::Open);
    assert!(r.banner.is_none());
    assert!(r.duration_ms >= 350, "banner window should elapse, took {}ms", r.duration_ms);
    drop(listener);
}

#[tokio::test]
async fn refused_port_is_closed() {
    let ports = closed_ports(1).await;
    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
    assert_eq!(rec.results[0].status, PortStatus::Closed);
    assert!(rec.results[0].banner.is_none());
}

#[tokio::test]
async fn every_port_settles_exactly_once() {
    let open = greeting_server(b"hello\n").await;
    let mut ports = closed_ports(40).await;
    ports.retain(|p| *p != open);
    ports.push(open);

    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;

    assert_eq!(rec.completions.len(), 1);
    let done = &rec.completions[0];
    assert_eq!(done.len(), ports.len());
    let settled: HashSet<u16> = done.iter().map(|r| r.port).collect();
    let requested: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(settled, requested);
    assert_eq!(done, &rec.results);

    let open_results: Vec<_> = done.iter().filter(|r| r.status == PortStatus::Open).collect();
    assert_eq!(open_results.len(), 1);
    assert_eq!(open_results[0].port, open);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_total() {
    let ports = closed_ports(25).await;
    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;

    assert!(!rec.progress.is_empty());
    assert!(rec.progress.windows(2).all(|w| w[0].scanned <= w[1].scanned));
    let last = rec.progress.last().unwrap();
    assert_eq!(last.scanned, ports.len());
    assert_eq!(last.total, ports.len());
    assert_eq!(last.percent, 100);
}

#[tokio::test]
async fn cancelled_before_start_launches_nothing() {
    let ports = closed_ports(5).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &cancel).await;
    assert!(rec.results.is_empty());
    assert!(rec.progress.is_empty());
    assert_eq!(rec.completions, vec![Vec::<PortResult>::new()]);
}

#[tokio::test]
async fn failing_callback_degrades_to_empty_completion() {
    let ports = closed_ports(3).await;
    let mut rec = Recorder {
        fail_on_result: true,
        ..Recorder::default()
    };
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
    assert_eq!(rec.completions, vec![Vec::<PortResult>::new()]);
}

#[tokio::test]
async fn panicking_callback_degrades_to_empty_completion() {
    let ports = closed_ports(3).await;
    let mut rec = Recorder {
        panic_on_progress: true,
        ..Recorder::default()
    };
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
    assert_eq!(rec.completions, vec![Vec::<PortResult>::new()]);
}

#[tokio::test]
async fn unresolvable_host_filters_every_port() {
    let mut rec = Recorder::default();
    // .invalid is reserved and never resolves
    scanner::run("no-such-host.invalid", &[80, 443], 10, 800, &mut rec, &CancellationToken::new()).await;
    let done = &rec.completions[0];
    assert_eq!(done.len(), 2);
    assert!(done.iter().all(|r| r.status == PortStatus::Filtered && r.duration_ms == 0));
}

#[tokio::test]
async fn out_of_range_concurrency_is_clamped_and_duplicates_scanned_once() {
    let closed = closed_ports(2).await;
    let requested = vec![closed[0], closed[0], closed[1], closed[1]];

    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &requested, 0, 5_000, &mut rec, &CancellationToken::new()).await;

    assert_eq!(rec.completions.len(), 1);
    let done = &rec.completions[0];
    assert_eq!(done.len(), 2);
    let settled: HashSet<u16> = done.iter().map(|r| r.port).collect();
    assert_eq!(settled, closed.iter().copied().collect::<HashSet<u16>>());
    assert!(done.iter().all(|r| r.status == PortStatus::Closed));
}

#[tokio::test]
async fn dropped_syn_is_filtered_after_timeout() {
    let Some((_listener, _backlog, port)) = saturated_listener().await else {
        eprintln!("accept queue never filled; skipping");
        return;
    };

    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &[port], 10, 300, &mut rec, &CancellationToken::new()).await;

    let r = &rec.completions[0][0];
    assert_eq!(r.status, PortStatus::Filtered);
    assert!(r.banner.is_none());
    assert!(
        (280..1_000).contains(&r.duration_ms),
        "expected about 300ms, took {}ms",
        r.duration_ms
    );
}

#[tokio::test]
async fn window_never_exceeds_concurrency() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let ports = silent_servers(30, accepted.clone()).await;

    let scan = tokio::spawn(async move {
        let mut rec = Recorder::default();
        scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
        rec
    });

    // first wave is held for the 400ms banner window
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 10);

    // mid second wave
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 20);

    let rec = scan.await.unwrap();
    let done = &rec.completions[0];
    assert_eq!(done.len(), 30);
    assert!(done.iter().all(|r| r.status == PortStatus::Open));
    assert_eq!(accepted.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn refused_port_frees_its_slot_immediately() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let mut ports = closed_ports(1).await;
    ports.extend(silent_servers(10, accepted.clone()).await);

    // 11 ports, window of 10: the refused port settles at once, so the tenth silent port starts
    // right away instead of waiting for a batch boundary.
    let started = Instant::now();
    let mut rec = Recorder::default();
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    let done = &rec.completions[0];
    assert_eq!(done.len(), 11);
    assert_eq!(done.iter().filter(|r| r.status == PortStatus::Open).count(), 10);
    assert!(
        elapsed < Duration::from_millis(700),
        "expected one banner window, took {elapsed:?}"
    );
}

#[tokio::test]
async fn panicking_completion_does_not_unwind_into_caller() {
    let ports = closed_ports(2).await;
    let mut rec = Recorder {
        panic_on_complete: true,
        ..Recorder::default()
    };
    scanner::run("127.0.0.1", &ports, 10, 800, &mut rec, &CancellationToken::new()).await;
    assert_eq!(rec.completions.len(), 1);
    assert_eq!(rec.completions[0].len(), 2);
}
