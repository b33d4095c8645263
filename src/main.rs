use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use host_probe_rs::observer::{ChannelObserver, ScanEvent};
use host_probe_rs::ports;
use host_probe_rs::registry::{ScanRegistry, StartedScan};
use host_probe_rs::risk;
use host_probe_rs::types::{
    OpenPort, PortResult, PortStatus, ScanId, ScanProgress, ScanRequest, SecurityReport,
};

/// host-probe — async TCP connect prober for a single host, with banner capture and risk scoring.
#[derive(Debug, Clone, Parser)]
#[command(name = "host-probe", version, about, long_about = None)]
struct Cli {
    /// Host to probe: IPv4 address, hostname, host:port or http(s) URL.
    target: String,

    /// Ports to probe, e.g. `22,80,8000-8100`. Takes precedence over --ports-file.
    #[arg(long)]
    ports: Option<String>,

    /// Ports file (one port or range per line, `#` comments).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Max concurrent connect attempts (clamped to 10..=500).
    #[arg(long, default_value_t = 200)]
    concurrency: usize,

    /// Connect timeout in milliseconds (capped at 800, or 400 for scans over 500 ports).
    #[arg(long = "timeout-ms", default_value_t = 800)]
    timeout_ms: u64,

    /// Write results and the security report as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct ScanExport<'a> {
    scan_id: &'a ScanId,
    host: &'a str,
    started_at: String,
    results: &'a [PortResult],
    report: &'a SecurityReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let port_list = select_ports(&cli)?;
    let request = ScanRequest::new(cli.target.clone(), port_list)
        .with_concurrency(cli.concurrency)
        .with_timeout_ms(cli.timeout_ms);
    let started_at = now_rfc3339();

    let registry = ScanRegistry::new();
    let (observer, mut events) = ChannelObserver::channel();
    let started = registry
        .start_scan(request, observer)
        .with_context(|| format!("cannot scan {}", cli.target))?;
    print_header(&started);

    let mut results = Vec::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::Result(r)) => print_open(&r),
                Some(ScanEvent::Progress(p)) => print_progress(&p),
                Some(ScanEvent::Complete(all)) => {
                    results = all;
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if registry.abort_scan(&started.scan_id) {
                    eprintln!("\nAborting; waiting for in-flight probes to drain...");
                }
            }
        }
    }
    eprintln!();

    let open: Vec<OpenPort> = results
        .iter()
        .filter(|r| r.status == PortStatus::Open)
        .map(OpenPort::from)
        .collect();
    let report = risk::summarize(&open);

    print_results_table(&results);
    print_report(&report);

    if let Some(path) = cli.output.as_deref() {
        let export = ScanExport {
            scan_id: &started.scan_id,
            host: &started.host,
            started_at,
            results: &results,
            report: &report,
        };
        write_json(path, &export)?;
        println!("Wrote JSON results to {}", path.display());
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn select_ports(cli: &Cli) -> Result<Vec<u16>> {
    if let Some(spec) = cli.ports.as_deref() {
        return ports::parse_ports_spec(spec);
    }
    if let Some(path) = cli.ports_file.as_deref() {
        return ports::load_ports_from_path(path);
    }
    Ok(ports::default_ports())
}

fn print_header(started: &StartedScan) {
    println!("host-probe scan {}", started.scan_id);
    println!("  host         : {}", started.host);
    println!("  ports        : {}", started.port_count);
    println!("  concurrency  : {}", started.concurrency);
    println!("  timeout_ms   : {}", started.timeout_ms);
    println!();
}

fn print_open(r: &PortResult) {
    if r.status != PortStatus::Open {
        return;
    }
    let insight = risk::classify(r.port, r.banner.as_deref());
    eprint!("\r");
    println!(
        "open {:>5}  [{}] {}{}",
        r.port,
        insight.risk_level,
        insight.title,
        r.banner
            .as_deref()
            .map(|b| format!("  ({})", snippet(b, 50)))
            .unwrap_or_default()
    );
}

fn print_progress(p: &ScanProgress) {
    eprint!(
        "\r{}/{} ({}%)  {:.0} ports/s  {:.1}s",
        p.scanned, p.total, p.percent, p.rate, p.elapsed_sec
    );
    let _ = std::io::stderr().flush();
}

fn print_results_table(results: &[PortResult]) {
    let mut sorted: Vec<&PortResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.port);

    let count = |s: PortStatus| results.iter().filter(|r| r.status == s).count();
    println!(
        "\nScanned {} ports: {} open, {} closed, {} filtered",
        results.len(),
        count(PortStatus::Open),
        count(PortStatus::Closed),
        count(PortStatus::Filtered)
    );

    let open: Vec<&PortResult> = sorted
        .into_iter()
        .filter(|r| r.status == PortStatus::Open)
        .collect();
    if open.is_empty() {
        return;
    }
    let banner_w = open
        .iter()
        .filter_map(|r| r.banner.as_deref())
        .map(|b| b.len().min(60))
        .max()
        .unwrap_or(0)
        .max("banner".len());

    println!("{:>5}  {:>11}  {:<banner_w$}", "port", "duration_ms", "banner");
    println!("{:-<5}  {:-<11}  {:-<banner_w$}", "", "", "");
    for r in open {
        let b = r.banner.as_deref().map(|b| snippet(b, 60)).unwrap_or_default();
        println!("{:>5}  {:>11}  {:<banner_w$}", r.port, r.duration_ms, b);
    }
}

fn print_report(report: &SecurityReport) {
    println!("\nRisk score: {}/100", report.risk_score);
    println!("{}", report.summary);
    for v in &report.vulnerabilities {
        println!("  [{}] {} (port {})", v.severity, v.title, v.port);
        println!("      {}", v.description);
        println!("      fix: {}", v.remediation);
    }
}

/// First line of a banner, cut to `max` characters.
fn snippet(banner: &str, max: usize) -> String {
    banner.lines().next().unwrap_or("").chars().take(max).collect()
}

fn write_json(path: &Path, export: &ScanExport<'_>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, export)?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
