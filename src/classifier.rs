//! Per-node result classification
//!
//! Extracts the measurement fields from a vendor node payload through ordered
//! fallback chains and decides whether the node failed, and why.

use crate::events::RawNode;
use serde_json::Value;
use std::fmt;

/// Responding IP that means the node's resolver returned nothing useful
pub const ZERO_IP: &str = "0.0.0.0";

/// Prefix of responding IPs that point back at the node itself
pub const LOOPBACK_PREFIX: &str = "127.";

/// Region label used when none of the region fields are present
pub const UNKNOWN_REGION: &str = "unknown";

/// Ordered list of vendor field names tried for one logical field
///
/// The vendor renames fields between API versions and node types; the first
/// present value wins.
#[derive(Debug, Clone, Copy)]
pub struct FieldChain {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

pub const STATUS_FIELDS: FieldChain = FieldChain {
    name: "status",
    keys: &["status", "HttpCode"],
};

pub const LOSS_FIELDS: FieldChain = FieldChain {
    name: "loss",
    keys: &["loss", "Loss"],
};

pub const ISP_FIELDS: FieldChain = FieldChain {
    name: "isp",
    keys: &["isp_name", "isp"],
};

pub const IP_FIELDS: FieldChain = FieldChain {
    name: "ip",
    keys: &["ip", "serverip", "server_ip"],
};

pub const REGION_FIELDS: FieldChain = FieldChain {
    name: "region",
    keys: &["province_name", "province", "city_name", "city"],
};

impl FieldChain {
    /// Return the first present value along the chain
    ///
    /// `null` and empty/whitespace-only strings count as absent.
    pub fn first<'a>(&self, node: &'a RawNode) -> Option<&'a Value> {
        self.keys
            .iter()
            .filter_map(|key| node.get(*key))
            .find(|value| is_present(value))
    }

    /// Extract a numeric value, `None` if absent or not a number
    fn numeric(&self, node: &RawNode) -> Option<f64> {
        self.first(node).and_then(parse_numeric)
    }

    /// Extract a text value, empty if absent
    fn text(&self, node: &RawNode) -> Result<String, SkipReason> {
        match self.first(node) {
            None => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(_) => Err(SkipReason::MalformedField(self.name)),
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Parse integers, floats and numeric strings; sentinels yield `None`
fn parse_numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Why a node was left out of the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither status nor loss carried a number
    NoMeasurement,
    /// A text field held an object or array
    MalformedField(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoMeasurement => write!(f, "no numeric status or loss"),
            SkipReason::MalformedField(field) => write!(f, "malformed {} field", field),
        }
    }
}

/// Normalized result of one vantage point
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeNodeResult {
    /// HTTP status, 0 when the node could not connect
    pub status: u16,
    /// Request loss percentage, 100 means total failure
    pub loss: f64,
    /// Responding IP, possibly empty
    pub ip: String,
    /// Free-text operator label
    pub isp: String,
    /// Free-text region label, never empty
    pub region: String,
}

impl ProbeNodeResult {
    /// Extract a node result from a vendor payload
    ///
    /// Non-numeric status or loss values normalize to 0. A node where both
    /// are non-numeric carries no measurement and is skipped.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the node cannot be used.
    pub fn from_raw(node: &RawNode) -> Result<Self, SkipReason> {
        let status = STATUS_FIELDS.numeric(node);
        let loss = LOSS_FIELDS.numeric(node);

        if status.is_none() && loss.is_none() {
            return Err(SkipReason::NoMeasurement);
        }

        let status = status
            .filter(|s| (0.0..=u16::MAX as f64).contains(s))
            .map(|s| s as u16)
            .unwrap_or(0);

        let region = REGION_FIELDS.text(node)?;

        Ok(Self {
            status,
            loss: loss.unwrap_or(0.0),
            ip: IP_FIELDS.text(node)?,
            isp: ISP_FIELDS.text(node)?,
            region: if region.is_empty() {
                UNKNOWN_REGION.to_string()
            } else {
                region
            },
        })
    }
}

/// Category of a failed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    DnsResolutionFailure,
    DnsHijack,
    Timeout,
    Unreachable,
    NotFound,
    ServerError(u16),
    HttpError(u16),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::DnsResolutionFailure => write!(f, "DNS resolution failure"),
            FailureKind::DnsHijack => write!(f, "DNS hijack"),
            FailureKind::Timeout => write!(f, "timeout/100% loss"),
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::NotFound => write!(f, "not found"),
            FailureKind::ServerError(status) => write!(f, "server error {}", status),
            FailureKind::HttpError(status) => write!(f, "HTTP error {}", status),
        }
    }
}

/// Outcome of classifying one usable node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Ok,
    Failed(FailureKind),
}

impl NodeOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutcome::Failed(_))
    }
}

/// Outcome of classifying a raw vendor payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Failed(FailureKind),
    Skipped(SkipReason),
}

/// Decide whether a node failed and assign its failure kind
///
/// Kinds are checked in priority order: zero IP, loopback IP, total loss,
/// no connection, 404, common 5xx, any other non-200 status.
pub fn classify(node: &ProbeNodeResult) -> NodeOutcome {
    let ip = node.ip.as_str();

    let kind = if ip == ZERO_IP {
        FailureKind::DnsResolutionFailure
    } else if ip.starts_with(LOOPBACK_PREFIX) {
        FailureKind::DnsHijack
    } else if node.loss >= 100.0 {
        FailureKind::Timeout
    } else if node.status == 200 {
        return NodeOutcome::Ok;
    } else {
        match node.status {
            0 => FailureKind::Unreachable,
            404 => FailureKind::NotFound,
            500 | 502 | 503 => FailureKind::ServerError(node.status),
            other => FailureKind::HttpError(other),
        }
    };

    NodeOutcome::Failed(kind)
}

/// Extract and classify a raw vendor payload in one step
pub fn classify_raw(node: &RawNode) -> Classification {
    match ProbeNodeResult::from_raw(node) {
        Ok(result) => match classify(&result) {
            NodeOutcome::Ok => Classification::Ok,
            NodeOutcome::Failed(kind) => Classification::Failed(kind),
        },
        Err(reason) => Classification::Skipped(reason),
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // A zero responding IP always fails as a DNS failure, whatever else the node says
    #[quickcheck]
    fn prop_zero_ip_always_dns_failure(status: u16, loss: u8) -> bool {
        let node = ProbeNodeResult {
            status,
            loss: loss as f64,
            ip: ZERO_IP.to_string(),
            isp: String::new(),
            region: UNKNOWN_REGION.to_string(),
        };
        classify(&node) == NodeOutcome::Failed(FailureKind::DnsResolutionFailure)
    }

    // A node fails exactly when one of the four failure conditions holds
    #[quickcheck]
    fn prop_failed_iff_condition_holds(status: u16, loss: u8, last_octet: u8, loopback: bool) -> bool {
        let ip = if loopback {
            format!("127.0.0.{}", last_octet)
        } else {
            format!("10.0.0.{}", last_octet)
        };
        let node = ProbeNodeResult {
            status,
            loss: (loss % 101) as f64,
            ip,
            isp: String::new(),
            region: UNKNOWN_REGION.to_string(),
        };
        let expected = node.status != 200 || node.loss >= 100.0 || loopback;
        classify(&node).is_failed() == expected
    }
}
