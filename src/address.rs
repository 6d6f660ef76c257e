//! Interface addresses and the live address set read back from the kernel.

use crate::errors::{FailoverError, FailoverResult};
use crate::Role;
use std::net::IpAddr;

/// An address-with-prefix bound to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    cidr: String,
    ip: IpAddr,
    role: Role,
}

impl InterfaceAddress {
    /// Parse `a.b.c.d/len` (or an IPv6 equivalent) for the given role
    pub fn parse(cidr: &str, role: Role) -> FailoverResult<Self> {
        let cidr = cidr.trim();
        let (ip_part, prefix_part) = cidr.split_once('/').ok_or_else(|| {
            FailoverError::InvalidConfiguration(format!(
                "{} address '{}' is missing a prefix length",
                role, cidr
            ))
        })?;

        let ip: IpAddr = ip_part.parse().map_err(|_| {
            FailoverError::InvalidConfiguration(format!("{} address '{}' is not an IP", role, cidr))
        })?;

        let max_prefix = if ip.is_ipv4() { 32 } else { 128 };
        let prefix = prefix_part
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= max_prefix)
            .ok_or_else(|| {
                FailoverError::InvalidConfiguration(format!(
                    "{} address '{}' has an invalid prefix length",
                    role, cidr
                ))
            })?;

        Ok(Self {
            cidr: format!("{}/{}", ip, prefix),
            ip,
            role,
        })
    }

    /// Address with prefix, as handed to `ip addr add/del`
    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether an entry reported by the kernel denotes this address.
    ///
    /// The same IP bound with a different prefix length still counts as present, since it
    /// collides with this address just the same.
    pub fn matches(&self, entry: &str) -> bool {
        let ip_part = entry.split('/').next().unwrap_or(entry);
        ip_part.parse::<IpAddr>().map(|ip| ip == self.ip).unwrap_or(false)
    }
}

impl std::fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cidr)
    }
}

/// The two fixed addresses managed by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPair {
    pub primary: InterfaceAddress,
    pub secondary: InterfaceAddress,
}

impl AddressPair {
    pub fn new(primary: &str, secondary: &str) -> FailoverResult<Self> {
        let primary = InterfaceAddress::parse(primary, Role::Primary)?;
        let secondary = InterfaceAddress::parse(secondary, Role::Secondary)?;

        if primary.ip() == secondary.ip() {
            return Err(FailoverError::InvalidConfiguration(format!(
                "primary and secondary addresses must differ (both {})",
                primary.ip()
            )));
        }

        Ok(Self { primary, secondary })
    }

    pub fn get(&self, role: Role) -> &InterfaceAddress {
        match role {
            Role::Primary => &self.primary,
            Role::Secondary => &self.secondary,
        }
    }
}

/// Snapshot of the addresses bound to the interface at the moment of the query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveAddressSet {
    entries: Vec<String>,
}

impl LiveAddressSet {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn contains(&self, address: &InterfaceAddress) -> bool {
        self.entries.iter().any(|entry| address.matches(entry))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for LiveAddressSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.entries.join(", "))
    }
}
