// Topoplan: compiling microservice test topologies into network plans
// Copyright (C) 2023 The Topoplan Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the address allocator. It maps a network id to a subnet, a gateway, and
//! a sequence of host addresses, and derives MAC addresses from the same id. The mapping is a
//! pure function of the id and the [`AddressingMode`], so the same topology always yields the same
//! addresses.
//!
//! | mode           | subnet of network `n`            | hosts per network |
//! |----------------|----------------------------------|-------------------|
//! | IPv4, compose  | `n << 10` / 22                   | 1022              |
//! | IPv6, compose  | `n << 64` / 64                   | 2^64 - 1          |
//! | IPv4, cluster  | `10.0.0.0 + (n << 2)` / 30       | 2                 |
//! | IPv6, cluster  | `fd00:: + (n << 4)` / 124        | 15                |

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use log::debug;
use thiserror::Error;

#[cfg(feature = "json")]
use serde::{Serialize, Serializer};

use crate::flags::{GenerationFlags, IpVersion, Target};

/// Network id reserved for the telemetry network.
pub const TELEMETRY_NETWORK_ID: u64 = 1;

/// First network id handed out for the topology.
pub const FIRST_NETWORK_ID: u64 = TELEMETRY_NETWORK_ID + 1;

/// MAC addresses embed the network id in 40 bits.
const MAC_ID_BITS: u32 = 40;

/// Error while assigning addresses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The netmask is invalid.
    #[error("Invalid Netmask: {0}")]
    InvalidNetmask(#[from] ipnet::PrefixLenError),
    /// The network id cannot be embedded in the address space of the mode.
    #[error("Network id {id} exceeds the capacity of {mode} ({bits} bits)")]
    IdsExhausted {
        /// The id that does not fit
        id: u64,
        /// The addressing mode
        mode: AddressingMode,
        /// Number of bits available for the id
        bits: u32,
    },
    /// The network id does not fit into the five octets of a MAC address.
    #[error("Network id {0} cannot be embedded into a MAC address")]
    MacExhausted(u64),
    /// A network needs more addressed interfaces than its host block provides.
    #[error("Network {0} ran out of host addresses")]
    HostsExhausted(String),
}

/// Address family and deployment target, which together determine how ids map to subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// IPv4 on a local container network
    ComposeV4,
    /// IPv6 on a local container network
    ComposeV6,
    /// IPv4 on a cluster
    ClusterV4,
    /// IPv6 on a cluster
    ClusterV6,
}

impl AddressingMode {
    /// Select the mode from the family and target.
    pub fn new(ip_version: IpVersion, target: Target) -> Self {
        match (ip_version, target) {
            (IpVersion::V4, Target::Compose) => Self::ComposeV4,
            (IpVersion::V6, Target::Compose) => Self::ComposeV6,
            (IpVersion::V4, Target::Kubernetes) => Self::ClusterV4,
            (IpVersion::V6, Target::Kubernetes) => Self::ClusterV6,
        }
    }

    /// Number of bits of the subnet that are reserved for the network id.
    pub fn id_bits(&self) -> u32 {
        match self {
            Self::ComposeV4 => 22,
            Self::ComposeV6 => 64,
            Self::ClusterV4 => 22,
            Self::ClusterV6 => 116,
        }
    }

    /// Whether the first host of every network is reserved as gateway.
    pub fn has_gateway(&self) -> bool {
        matches!(self, Self::ComposeV4 | Self::ComposeV6)
    }

    /// Compute the subnet of network `id`.
    pub fn subnet(&self, id: u64) -> Result<IpNet, AddressError> {
        let bits = self.id_bits().min(MAC_ID_BITS);
        if u128::from(id) >> bits != 0 {
            return Err(AddressError::IdsExhausted {
                id,
                mode: *self,
                bits,
            });
        }
        let id = u128::from(id);
        Ok(match self {
            Self::ComposeV4 => Ipv4Net::new(Ipv4Addr::from((id << 10) as u32), 22)?.into(),
            Self::ComposeV6 => Ipv6Net::new(Ipv6Addr::from(id << 64), 64)?.into(),
            Self::ClusterV4 => {
                Ipv4Net::new(Ipv4Addr::from(0x0a00_0000 | (id << 2) as u32), 30)?.into()
            }
            Self::ClusterV6 => Ipv6Net::new(Ipv6Addr::from((0xfd << 120) | (id << 4)), 124)?.into(),
        })
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComposeV4 => f.write_str("IPv4/compose"),
            Self::ComposeV6 => f.write_str("IPv6/compose"),
            Self::ClusterV4 => f.write_str("IPv4/cluster"),
            Self::ClusterV6 => f.write_str("IPv6/cluster"),
        }
    }
}

/// Iterator over the host addresses of a subnet. The network address is never returned, and
/// neither is the IPv4 broadcast address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hosts {
    /// The next address to return
    next: u128,
    /// The last address to return (inclusive)
    last: u128,
    /// Whether the addresses are IPv6
    v6: bool,
}

impl Hosts {
    /// Create the host iterator of a subnet.
    pub fn new(net: IpNet) -> Self {
        match net {
            IpNet::V4(net) => Self {
                next: u128::from(u32::from(net.network())) + 1,
                last: u128::from(u32::from(net.broadcast())).saturating_sub(1),
                v6: false,
            },
            IpNet::V6(net) => Self {
                next: u128::from(net.network()) + 1,
                last: u128::from(net.broadcast()),
                v6: true,
            },
        }
    }
}

impl Iterator for Hosts {
    type Item = IpAddr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let addr = self.next;
        self.next += 1;
        Some(if self.v6 {
            IpAddr::V6(Ipv6Addr::from(addr))
        } else {
            IpAddr::V4(Ipv4Addr::from(addr as u32))
        })
    }
}

/// A single allocated network block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Network id
    pub id: u64,
    /// Subnet of the network
    pub subnet: IpNet,
    /// Gateway (only on the compose target)
    pub gateway: Option<IpAddr>,
    /// Remaining host addresses, excluding the gateway.
    pub hosts: Hosts,
}

/// Allocates network ids and their address blocks. A fresh allocator starts again from
/// [`FIRST_NETWORK_ID`], so separate runs never influence each other.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    mode: AddressingMode,
    next_id: u64,
}

impl AddressAllocator {
    /// Create a new allocator for the given mode.
    pub fn new(mode: AddressingMode) -> Self {
        Self {
            mode,
            next_id: FIRST_NETWORK_ID,
        }
    }

    /// Create a new allocator for the mode selected by the flags.
    pub fn from_flags(flags: &GenerationFlags) -> Self {
        Self::new(AddressingMode::new(flags.ip_version(), flags.target()))
    }

    /// The addressing mode
    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    /// Allocate the next network.
    pub fn allocate(&mut self) -> Result<Allocation, AddressError> {
        let alloc = self.block(self.next_id)?;
        debug!("allocated network {} as {}", alloc.id, alloc.subnet);
        self.next_id += 1;
        Ok(alloc)
    }

    /// The block of the reserved telemetry network.
    pub fn telemetry(&self) -> Result<Allocation, AddressError> {
        self.block(TELEMETRY_NETWORK_ID)
    }

    /// Compute the block for network `id`.
    fn block(&self, id: u64) -> Result<Allocation, AddressError> {
        let subnet = self.mode.subnet(id)?;
        let mut hosts = Hosts::new(subnet);
        let gateway = if self.mode.has_gateway() {
            hosts.next()
        } else {
            None
        };
        Ok(Allocation {
            id,
            subnet,
            gateway,
            hosts,
        })
    }
}

/// A MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Derive the MAC address of the `ordinal`-th interface (starting at 1) of network `id`. The
    /// id takes the first five octets, the ordinal the last one.
    pub fn derive(id: u64, ordinal: u8) -> Result<Self, AddressError> {
        if id >> MAC_ID_BITS != 0 {
            return Err(AddressError::MacExhausted(id));
        }
        let b = id.to_be_bytes();
        Ok(Self([b[3], b[4], b[5], b[6], b[7], ordinal]))
    }

    /// The octets of the address
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(feature = "json")]
impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;

    const MODES: [AddressingMode; 4] = [
        AddressingMode::ComposeV4,
        AddressingMode::ComposeV6,
        AddressingMode::ClusterV4,
        AddressingMode::ClusterV6,
    ];

    macro_rules! assert_net {
        ($mode:expr, $id:expr, $exp:expr) => {
            assert_eq!($mode.subnet($id).unwrap(), $exp.parse::<IpNet>().unwrap())
        };
    }

    #[test]
    fn subnets() {
        assert_net!(AddressingMode::ComposeV4, 2, "0.0.8.0/22");
        assert_net!(AddressingMode::ComposeV4, 3, "0.0.12.0/22");
        assert_net!(AddressingMode::ComposeV6, 2, "0:0:0:2::/64");
        assert_net!(AddressingMode::ClusterV4, 2, "10.0.0.8/30");
        assert_net!(AddressingMode::ClusterV4, 3, "10.0.0.12/30");
        assert_net!(AddressingMode::ClusterV6, 2, "fd00::20/124");
    }

    #[test]
    fn gateway_and_hosts() {
        let mut alloc = AddressAllocator::new(AddressingMode::ComposeV4);
        let mut a = alloc.allocate().unwrap();
        assert_eq!(a.id, 2);
        assert_eq!(a.gateway, Some("0.0.8.1".parse().unwrap()));
        assert_eq!(a.hosts.next(), Some("0.0.8.2".parse().unwrap()));
        assert_eq!(a.hosts.count(), 1020);

        let mut alloc = AddressAllocator::new(AddressingMode::ClusterV4);
        let a = alloc.allocate().unwrap();
        assert_eq!(a.gateway, None);
        assert_eq!(
            a.hosts.collect_vec(),
            vec![
                "10.0.0.9".parse::<IpAddr>().unwrap(),
                "10.0.0.10".parse().unwrap()
            ]
        );

        let mut alloc = AddressAllocator::new(AddressingMode::ClusterV6);
        let a = alloc.allocate().unwrap();
        assert_eq!(a.hosts.count(), 15);

        let mut alloc = AddressAllocator::new(AddressingMode::ComposeV6);
        let mut a = alloc.allocate().unwrap();
        assert_eq!(a.gateway, Some("0:0:0:2::1".parse().unwrap()));
        assert_eq!(a.hosts.next(), Some("0:0:0:2::2".parse().unwrap()));
    }

    #[test]
    fn subnets_are_disjoint() {
        for mode in MODES {
            let nets = (1..200).map(|id| mode.subnet(id).unwrap()).collect_vec();
            for (a, b) in nets.iter().tuple_combinations() {
                assert!(!a.contains(b) && !b.contains(a), "{a} overlaps {b} in {mode}");
            }
        }
    }

    #[test]
    fn deterministic() {
        for mode in MODES {
            let mut x = AddressAllocator::new(mode);
            let mut y = AddressAllocator::new(mode);
            for _ in 0..10 {
                assert_eq!(x.allocate().unwrap(), y.allocate().unwrap());
            }
        }
    }

    #[test]
    fn exhaustion() {
        assert!(AddressingMode::ComposeV4.subnet((1 << 22) - 1).is_ok());
        assert!(matches!(
            AddressingMode::ComposeV4.subnet(1 << 22),
            Err(AddressError::IdsExhausted { bits: 22, .. })
        ));
        assert!(matches!(
            AddressingMode::ComposeV6.subnet(1 << 40),
            Err(AddressError::IdsExhausted { bits: 40, .. })
        ));
    }

    #[test]
    fn mac_addresses() {
        assert_eq!(MacAddress::derive(2, 1).unwrap().to_string(), "00:00:00:00:02:01");
        assert_eq!(
            MacAddress::derive(0x12_3456_789a, 2).unwrap().to_string(),
            "12:34:56:78:9a:02"
        );
        assert!(MacAddress::derive(1 << 40, 1).is_err());
    }
}
