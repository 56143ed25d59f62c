//! Loading of the static firewall policy.
//!
//! The policy is plain text, one rule per line, four comma-separated fields:
//!
//! ```text
//! source_address,destination_address,port,protocol
//! ```
//!
//! An empty field matches anything. Loading is all-or-nothing: one bad line
//! rejects the whole file, and the caller runs without a firewall.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;

use crate::packet::{IP_PROTO_TCP, IP_PROTO_UDP};

const FIELDS_PER_RULE: usize = 4;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy source unavailable: {0}")]
    Unavailable(#[from] io::Error),

    #[error("line {line}: expected 4 fields, found {fields}")]
    Malformed { line: usize, fields: usize },

    #[error("line {line}: invalid IPv4 address '{value}'")]
    InvalidAddress { line: usize, value: String },

    #[error("line {line}: invalid port '{value}'")]
    InvalidPort { line: usize, value: String },
}

/// Protocol declared by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    /// Declared, but neither tcp nor udp. The rule matches any IP protocol.
    Other,
}

impl Protocol {
    /// IPv4 protocol number to match, if the protocol has one.
    pub fn ip_proto(self) -> Option<u8> {
        match self {
            Protocol::Tcp => Some(IP_PROTO_TCP),
            Protocol::Udp => Some(IP_PROTO_UDP),
            Protocol::Other => None,
        }
    }

    /// Any field mentioning "tcp" or "udp", in any case, names that protocol.
    fn from_field(field: &str) -> Protocol {
        let field = field.to_ascii_lowercase();
        if field.contains("tcp") {
            Protocol::Tcp
        } else if field.contains("udp") {
            Protocol::Udp
        } else {
            Protocol::Other
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Other => "other",
        })
    }
}

/// One line of the policy. `None` fields match any value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirewallRule {
    pub src: Option<Ipv4Addr>,
    pub dst: Option<Ipv4Addr>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
}

impl FirewallRule {
    /// The protocol the rule actually matches: a port without any declared
    /// protocol is taken as a TCP port.
    pub fn effective_protocol(&self) -> Option<Protocol> {
        match (self.protocol, self.port) {
            (Some(proto), _) => Some(proto),
            (None, Some(_)) => Some(Protocol::Tcp),
            (None, None) => None,
        }
    }

    fn parse_fields(line: usize, fields: &[&str]) -> Result<FirewallRule, PolicyError> {
        let addr = |value: &str| -> Result<Option<Ipv4Addr>, PolicyError> {
            if value.is_empty() {
                return Ok(None);
            }
            value
                .parse()
                .map(Some)
                .map_err(|_| PolicyError::InvalidAddress {
                    line,
                    value: value.to_string(),
                })
        };
        let port = match fields[2] {
            "" => None,
            value => Some(value.parse::<u16>().map_err(|_| PolicyError::InvalidPort {
                line,
                value: value.to_string(),
            })?),
        };
        let protocol = match fields[3] {
            "" => None,
            value => Some(Protocol::from_field(value)),
        };
        Ok(FirewallRule {
            src: addr(fields[0])?,
            dst: addr(fields[1])?,
            port,
            protocol,
        })
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_any<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "any".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "src addr: {} / dst addr: {} / port: {} / protocol: {}",
            or_any(self.src),
            or_any(self.dst),
            or_any(self.port),
            or_any(self.effective_protocol())
        )
    }
}

/// Parse a whole policy from `reader`, in file order.
///
/// Lines whose four fields are all empty are skipped. Any other line that
/// fails to parse rejects the entire policy.
pub fn parse_rules<R: BufRead>(reader: R) -> Result<Vec<FirewallRule>, PolicyError> {
    let mut rules = vec![];
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != FIELDS_PER_RULE {
            return Err(PolicyError::Malformed {
                line: line_no,
                fields: fields.len(),
            });
        }
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        rules.push(FirewallRule::parse_fields(line_no, &fields)?);
    }
    Ok(rules)
}

/// Read and parse the policy file at `path`.
pub fn load(path: &Path) -> Result<Vec<FirewallRule>, PolicyError> {
    let file = File::open(path)?;
    parse_rules(BufReader::new(file))
}
