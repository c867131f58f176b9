//! Peer access control
//!
//! An ordered list of allow/deny rules over single addresses or CIDR
//! networks. The first matching rule decides; when nothing matches the
//! default action applies. `load` swaps in a whole new rule set at once,
//! so a check never sees a half-loaded list.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Access control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    #[error("Invalid network address: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length in {0}")]
    InvalidPrefix(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    #[default]
    Allow,
    Deny,
}

/// One rule as written in configuration, e.g. `10.0.0.0/8` or `::1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub action: AclAction,
    pub network: String,
}

impl AclRule {
    pub fn allow(network: impl Into<String>) -> Self {
        Self {
            action: AclAction::Allow,
            network: network.into(),
        }
    }

    pub fn deny(network: impl Into<String>) -> Self {
        Self {
            action: AclAction::Deny,
            network: network.into(),
        }
    }
}

/// Rule set as loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub default: AclAction,
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

impl AclConfig {
    /// Parse every rule without loading it
    pub fn validate(&self) -> Result<(), AclError> {
        CompiledRules::compile(self).map(|_| ())
    }
}

/// An address with a prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    fn contains(&self, candidate: &IpAddr) -> bool {
        match (self.addr, normalize(*candidate)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_match(&net.octets(), &ip.octets(), self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_match(&net.octets(), &ip.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr = addr_part
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| AclError::InvalidAddress(s.to_string()))?;
        let addr = normalize(addr);
        let max = if addr.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix_part {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| AclError::InvalidPrefix(s.to_string()))?,
            None => max,
        };

        Ok(Self { addr, prefix })
    }
}

/// IPv4-mapped IPv6 addresses are matched as IPv4
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn prefix_match(net: &[u8], ip: &[u8], prefix: u8) -> bool {
    let full = (prefix / 8) as usize;
    let rest = prefix % 8;

    if net[..full] != ip[..full] {
        return false;
    }
    if rest == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rest);
    (net[full] & mask) == (ip[full] & mask)
}

#[derive(Debug, Default)]
struct CompiledRules {
    default: AclAction,
    rules: Vec<(AclAction, IpNetwork)>,
}

impl CompiledRules {
    fn compile(config: &AclConfig) -> Result<Self, AclError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| Ok((rule.action, rule.network.parse::<IpNetwork>()?)))
            .collect::<Result<Vec<_>, AclError>>()?;
        Ok(Self {
            default: config.default,
            rules,
        })
    }

    fn decide(&self, ip: &IpAddr) -> AclAction {
        self.rules
            .iter()
            .find(|(_, network)| network.contains(ip))
            .map(|(action, _)| *action)
            .unwrap_or(self.default)
    }
}

/// Access filter consulted at the handshake gate
#[derive(Debug, Default)]
pub struct AccessControl {
    rules: RwLock<Arc<CompiledRules>>,
}

impl AccessControl {
    /// Filter that allows everyone until rules are loaded
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AclConfig) -> Result<Self, AclError> {
        let rules = CompiledRules::compile(config)?;
        Ok(Self {
            rules: RwLock::new(Arc::new(rules)),
        })
    }

    /// Replace the active rule set. On error the previous rules stay in force.
    pub async fn load(&self, config: &AclConfig) -> Result<(), AclError> {
        let compiled = Arc::new(CompiledRules::compile(config)?);
        let count = compiled.rules.len();
        *self.rules.write().await = compiled;
        log::info!("Loaded {} access control rules", count);
        Ok(())
    }

    pub async fn is_allowed(&self, addr: &SocketAddr) -> bool {
        let rules = self.rules.read().await.clone();
        rules.decide(&addr.ip()) == AclAction::Allow
    }
}
