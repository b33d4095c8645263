use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ProbeError, ProbeResult};

/// Longest host string accepted after normalization.
pub const MAX_HOST_LEN: usize = 255;

// Octets are not range-checked: "999.999.999.999" is accepted here and fails later at resolution.
static IPV4_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("valid ipv4 regex"));

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("valid hostname regex")
});

/// Normalize a user supplied address into a bare host.
///
/// Accepts URLs (`https://host/path`), `host:port` pairs and bare IPv4 addresses or DNS names.
/// The scheme, any path and a trailing numeric port are stripped before validation.
pub fn normalize(input: &str) -> ProbeResult<String> {
    let mut host = input.trim();

    for scheme in ["http://", "https://"] {
        if host.get(..scheme.len()).is_some_and(|p| p.eq_ignore_ascii_case(scheme)) {
            host = &host[scheme.len()..];
            break;
        }
    }

    if let Some((before, _path)) = host.split_once('/') {
        host = before;
    }

    if let Some((before, port)) = host.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            host = before;
        }
    }

    if host.is_empty() {
        return Err(ProbeError::InvalidTarget("empty host".into()));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(ProbeError::InvalidTarget(format!(
            "host is {} characters long (max {MAX_HOST_LEN})",
            host.len()
        )));
    }
    if !is_valid_host(host) {
        return Err(ProbeError::InvalidTarget(format!("not an IPv4 address or hostname: {host}")));
    }

    Ok(host.to_string())
}

/// True when `host` looks like a dotted IPv4 quad or a DNS hostname.
pub fn is_valid_host(host: &str) -> bool {
    host.len() <= MAX_HOST_LEN && (IPV4_LIKE.is_match(host) || HOSTNAME.is_match(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_path_and_port() {
        assert_eq!(normalize("http://192.168.1.1:8080/path").unwrap(), "192.168.1.1");
        assert_eq!(normalize("https://example.com/").unwrap(), "example.com");
        assert_eq!(normalize("HTTPS://Example.com:443").unwrap(), "Example.com");
        assert_eq!(normalize("db.internal:5432").unwrap(), "db.internal");
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(normalize("").is_err());
        assert!(normalize("   ").is_err());
        assert!(normalize("http://").is_err());
        assert!(normalize(&"a".repeat(300)).is_err());
    }

    #[test]
    fn hostname_label_rules() {
        assert!(normalize("-bad.example").is_err());
        assert!(normalize("bad-.example").is_err());
        assert!(normalize("under_score.example").is_err());
        assert!(normalize(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(normalize(&format!("{}.com", "a".repeat(63))).is_ok());
        assert!(normalize("localhost").is_ok());
    }

    #[test]
    fn ipv4_octets_are_not_range_checked() {
        assert_eq!(normalize("999.999.999.999").unwrap(), "999.999.999.999");
    }
}
