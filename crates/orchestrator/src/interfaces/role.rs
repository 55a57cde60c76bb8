#![forbid(unsafe_code)]

use crate::error::Error;
use kernel::link::Link;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "AP")]
    Ap,
    #[serde(rename = "WAN")]
    Wan,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ap => "AP",
            Self::Wan => "WAN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Exact, case-sensitive match on `AP` or `WAN`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "AP" => Ok(Self::Ap),
            "WAN" => Ok(Self::Wan),
            _ => Err(Error::Validation(
                "invalid role; must be 'AP' or 'WAN'".into(),
            )),
        }
    }
}

/// Interface inventory entry, rebuilt on every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub is_up: bool,
    pub is_wireless: bool,
    pub mac_address: Option<String>,
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub role: Option<Role>,
}

impl InterfaceRecord {
    pub fn from_link(link: Link, role: Option<Role>) -> Self {
        Self {
            name: link.name,
            is_up: link.is_up,
            is_wireless: link.is_wireless,
            mac_address: link.mac_address,
            ipv4_addresses: link.ipv4_addresses,
            role,
        }
    }
}
