use crate::core::error::{MetricsError, Result};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A CIDR range such as `192.168.0.0/24` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    /// Returns true if `addr` falls inside the range. Mixed families never match.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            },
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            },
            _ => false,
        }
    }
}

fn mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for TrustedSubnet {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| MetricsError::config(format!("trusted subnet '{}' is not CIDR", s)))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|_| MetricsError::config(format!("invalid subnet address '{}'", addr)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| MetricsError::config(format!("invalid prefix length '{}'", prefix)))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(MetricsError::config(format!(
                "prefix length {} exceeds {} for {}",
                prefix, max, network
            )));
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
