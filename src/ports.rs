use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parse a command-line port spec such as `22,80,8000-8010` into a deduplicated list.
///
/// Order of first appearance is preserved. Whitespace around items is ignored.
pub fn parse_ports_spec(spec: &str) -> Result<Vec<u16>> {
    let mut acc = PortAccumulator::default();
    for item in spec.split(',').map(str::trim) {
        if item.is_empty() {
            continue;
        }
        acc.push_item(item)
            .with_context(|| format!("invalid port spec item: {item}"))?;
    }
    if acc.ports.is_empty() {
        bail!("port spec selects no ports: {spec:?}");
    }
    Ok(acc.ports)
}

/// Parse a ports file into a deduplicated list of TCP ports (1..=65535).
///
/// One port (`80`) or inclusive range (`8000-8010`) per line; `#` starts a comment.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut acc = PortAccumulator::default();
    for (idx, raw_line) in s.lines().enumerate() {
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        acc.push_item(line)
            .with_context(|| format!("line {}: {line}", idx + 1))?;
    }
    Ok(acc.ports)
}

pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Drop repeated ports, keeping the first occurrence of each.
pub fn unique_ports(ports: &[u16]) -> Vec<u16> {
    let mut acc = PortAccumulator::default();
    for &p in ports {
        acc.push(p);
    }
    acc.ports
}

/// Common service ports, covering every port the risk tables know about.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 81, 110, 111, 135, 139, 143, 389, 443, 445, 465, 587, 636, 853,
        993, 995, 1433, 1521, 1723, 2049, 2375, 2376, 3000, 3306, 3389, 5000, 5432, 5672, 5900,
        5985, 5986, 6379, 8000, 8008, 8080, 8081, 8443, 8888, 9000, 9200, 11211, 27017,
    ];
    DEFAULT.to_vec()
}

#[derive(Default)]
struct PortAccumulator {
    ports: Vec<u16>,
    seen: HashSet<u16>,
}

impl PortAccumulator {
    fn push_item(&mut self, item: &str) -> Result<()> {
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim())?;
            let end = parse_port_str(b.trim())?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                self.push(p);
            }
        } else {
            let p = parse_port_str(item)?;
            self.push(p);
        }
        Ok(())
    }

    fn push(&mut self, port: u16) {
        if self.seen.insert(port) {
            self.ports.push(port);
        }
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s
        .parse::<u32>()
        .with_context(|| format!("not a port number: {s:?}"))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
