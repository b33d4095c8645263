//! Rule-based risk scoring of open ports.
//!
//! Both entry points are pure lookups over static tables: [`classify`] gives an instant verdict
//! for one open port, [`summarize`] aggregates a finished scan into a [`SecurityReport`].

use std::collections::HashSet;

use crate::types::{OpenPort, PortInsight, RiskLevel, SecurityReport, Severity, Vulnerability};

/// A known risky service exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRisk {
    pub port: u16,
    pub severity: Severity,
    pub title: &'static str,
    pub description: &'static str,
    pub remediation: &'static str,
}

pub const PORT_RISKS: &[PortRisk] = &[
    PortRisk {
        port: 21,
        severity: Severity::High,
        title: "FTP service exposed",
        description: "FTP transmits credentials and data in cleartext and often allows anonymous access.",
        remediation: "Replace FTP with SFTP or FTPS and disable anonymous logins.",
    },
    PortRisk {
        port: 22,
        severity: Severity::Low,
        title: "SSH service exposed",
        description: "SSH is reachable and is a common target for credential brute forcing.",
        remediation: "Use key-based authentication, disable root login and rate-limit connection attempts.",
    },
    PortRisk {
        port: 23,
        severity: Severity::Critical,
        title: "Telnet service exposed",
        description: "Telnet sends sessions, including passwords, unencrypted over the network.",
        remediation: "Disable Telnet and use SSH for remote administration.",
    },
    PortRisk {
        port: 25,
        severity: Severity::Medium,
        title: "SMTP service exposed",
        description: "A reachable mail server may be abused as an open relay or leak user names via VRFY/EXPN.",
        remediation: "Require authentication for relaying, disable VRFY/EXPN and enforce STARTTLS.",
    },
    PortRisk {
        port: 53,
        severity: Severity::Low,
        title: "DNS service exposed",
        description: "A DNS server over TCP may allow zone transfers revealing internal host names.",
        remediation: "Restrict zone transfers (AXFR) to authorised secondaries.",
    },
    PortRisk {
        port: 80,
        severity: Severity::Low,
        title: "Unencrypted HTTP",
        description: "Web traffic on port 80 is not encrypted and can be intercepted or modified.",
        remediation: "Redirect HTTP to HTTPS and enable HSTS.",
    },
    PortRisk {
        port: 110,
        severity: Severity::Medium,
        title: "POP3 without TLS",
        description: "POP3 transmits mailbox credentials in cleartext.",
        remediation: "Use POP3S (995) or require STARTTLS.",
    },
    PortRisk {
        port: 135,
        severity: Severity::High,
        title: "MS-RPC endpoint mapper exposed",
        description: "The RPC endpoint mapper leaks service information and has a long history of remote exploits.",
        remediation: "Block port 135 at the network perimeter.",
    },
    PortRisk {
        port: 139,
        severity: Severity::High,
        title: "NetBIOS session service exposed",
        description: "NetBIOS can disclose host, user and share information to unauthenticated clients.",
        remediation: "Disable NetBIOS over TCP/IP or firewall it from untrusted networks.",
    },
    PortRisk {
        port: 143,
        severity: Severity::Medium,
        title: "IMAP without TLS",
        description: "IMAP transmits mailbox credentials in cleartext.",
        remediation: "Use IMAPS (993) or require STARTTLS.",
    },
    PortRisk {
        port: 445,
        severity: Severity::Critical,
        title: "SMB exposed",
        description: "SMB is a frequent target of wormable exploits such as EternalBlue (MS17-010).",
        remediation: "Block SMB from untrusted networks, disable SMBv1 and keep hosts patched.",
    },
    PortRisk {
        port: 1433,
        severity: Severity::High,
        title: "Microsoft SQL Server exposed",
        description: "A directly reachable database is exposed to brute forcing and data theft.",
        remediation: "Restrict database access to application hosts and enforce strong authentication.",
    },
    PortRisk {
        port: 1521,
        severity: Severity::High,
        title: "Oracle listener exposed",
        description: "The Oracle TNS listener is reachable and may allow SID enumeration.",
        remediation: "Restrict listener access and set a listener password.",
    },
    PortRisk {
        port: 2375,
        severity: Severity::Critical,
        title: "Unauthenticated Docker API",
        description: "The Docker daemon API without TLS grants full control over the host.",
        remediation: "Disable the TCP socket or protect it with mutual TLS on port 2376.",
    },
    PortRisk {
        port: 3306,
        severity: Severity::High,
        title: "MySQL exposed",
        description: "A directly reachable MySQL server is exposed to brute forcing and data theft.",
        remediation: "Bind MySQL to localhost or a private interface and firewall port 3306.",
    },
    PortRisk {
        port: 3389,
        severity: Severity::High,
        title: "RDP exposed",
        description: "Remote Desktop is heavily targeted by brute forcing and exploits such as BlueKeep.",
        remediation: "Put RDP behind a VPN or gateway and require Network Level Authentication.",
    },
    PortRisk {
        port: 5432,
        severity: Severity::High,
        title: "PostgreSQL exposed",
        description: "A directly reachable PostgreSQL server is exposed to brute forcing and data theft.",
        remediation: "Restrict pg_hba.conf to known clients and firewall port 5432.",
    },
    PortRisk {
        port: 5900,
        severity: Severity::High,
        title: "VNC exposed",
        description: "VNC often uses weak passwords and unencrypted sessions.",
        remediation: "Tunnel VNC over SSH or a VPN and set strong authentication.",
    },
    PortRisk {
        port: 6379,
        severity: Severity::Critical,
        title: "Redis exposed",
        description: "Redis without authentication allows arbitrary data access and can lead to remote code execution.",
        remediation: "Enable protected mode and requirepass, and bind Redis to localhost.",
    },
    PortRisk {
        port: 8080,
        severity: Severity::Medium,
        title: "Alternate HTTP service",
        description: "Port 8080 commonly hosts admin consoles, proxies or development servers.",
        remediation: "Verify the service is intended to be public and put it behind authentication.",
    },
    PortRisk {
        port: 9200,
        severity: Severity::High,
        title: "Elasticsearch exposed",
        description: "An open Elasticsearch HTTP API allows reading and deleting indexed data.",
        remediation: "Enable security features and restrict access to the cluster.",
    },
    PortRisk {
        port: 11211,
        severity: Severity::High,
        title: "Memcached exposed",
        description: "Memcached has no authentication and is abused for data leaks and amplification attacks.",
        remediation: "Bind memcached to localhost and disable UDP.",
    },
    PortRisk {
        port: 27017,
        severity: Severity::Critical,
        title: "MongoDB exposed",
        description: "MongoDB instances without authentication are routinely wiped and ransomed.",
        remediation: "Enable authentication and bind MongoDB to a private interface.",
    },
];

/// Encrypted services that are fine to expose.
pub const SAFE_SERVICES: &[(u16, &str)] = &[
    (443, "HTTPS"),
    (465, "SMTPS"),
    (636, "LDAPS"),
    (853, "DNS over TLS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (8443, "HTTPS (alternate)"),
];

pub const SEVERITY_WEIGHTS: &[(Severity, u32)] = &[
    (Severity::Critical, 40),
    (Severity::High, 25),
    (Severity::Medium, 15),
    (Severity::Low, 5),
];

/// Weight for severities missing from `SEVERITY_WEIGHTS`.
pub const DEFAULT_WEIGHT: u32 = 5;
pub const MAX_SCORE: u32 = 100;

pub fn lookup(port: u16) -> Option<&'static PortRisk> {
    PORT_RISKS.iter().find(|r| r.port == port)
}

pub fn severity_weight(severity: Severity) -> u32 {
    SEVERITY_WEIGHTS
        .iter()
        .find(|(s, _)| *s == severity)
        .map_or(DEFAULT_WEIGHT, |(_, w)| *w)
}

/// Classify one open port. Never fails: unknown ports get a low-risk "unknown service" insight.
pub fn classify(port: u16, banner: Option<&str>) -> PortInsight {
    if let Some(risk) = lookup(port) {
        return PortInsight {
            port,
            risk_level: risk.severity.risk_level(),
            title: risk.title.to_string(),
            short_description: risk.description.to_string(),
        };
    }

    if let Some((_, name)) = SAFE_SERVICES.iter().find(|(p, _)| *p == port) {
        return PortInsight {
            port,
            risk_level: RiskLevel::Safe,
            title: format!("{name} service"),
            short_description: "Encrypted service; no known issue for this port.".to_string(),
        };
    }

    let short_description = match banner.and_then(first_line) {
        Some(line) => format!("Unrecognized service on port {port} answered: \"{line}\"."),
        None => format!("Unrecognized service on port {port}. Verify it is meant to be reachable."),
    };
    PortInsight {
        port,
        risk_level: RiskLevel::Low,
        title: "Unknown service".to_string(),
        short_description,
    }
}

/// Aggregate a finished scan's open ports into a report.
///
/// Each open port with a table entry adds its vulnerability record and severity weight; the score
/// is the capped sum. Ports without an entry add nothing. Repeated ports count once.
pub fn summarize(open_ports: &[OpenPort]) -> SecurityReport {
    let mut seen = HashSet::new();
    let mut score = 0u32;
    let mut vulnerabilities = Vec::new();

    for open in open_ports {
        if !seen.insert(open.port) {
            continue;
        }
        let Some(risk) = lookup(open.port) else {
            continue;
        };
        score += severity_weight(risk.severity);
        vulnerabilities.push(Vulnerability {
            severity: risk.severity,
            title: risk.title.to_string(),
            description: risk.description.to_string(),
            remediation: risk.remediation.to_string(),
            port: risk.port,
        });
    }

    let risk_score = score.min(MAX_SCORE);
    SecurityReport {
        risk_score: risk_score as u8,
        summary: summary_text(risk_score, vulnerabilities.len()),
        vulnerabilities,
    }
}

fn summary_text(score: u32, findings: usize) -> String {
    if score > 70 {
        format!(
            "High risk (score {score}/100): {findings} exposed service(s) need urgent remediation. \
             Restrict access to the critical ports immediately."
        )
    } else if score > 40 {
        format!(
            "Elevated risk (score {score}/100): {findings} exposed service(s) should be reviewed \
             and hardened soon."
        )
    } else if score > 0 {
        format!(
            "Low risk (score {score}/100): {findings} minor finding(s). Monitor these services \
             and apply the suggested hardening."
        )
    } else {
        "No known vulnerabilities were found on the open ports.".to_string()
    }
}

fn first_line(banner: &str) -> Option<&str> {
    banner.lines().map(str::trim).find(|l| !l.is_empty())
}
