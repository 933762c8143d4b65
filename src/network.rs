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

//! L2 and L3 networks, and the interfaces attached to them.

use std::{fmt, net::IpAddr};

use ipnet::IpNet;

#[cfg(feature = "json")]
use serde::Serialize;

use crate::addressing::{AddressError, Allocation, Hosts, MacAddress};

/// Name of the reserved telemetry network.
pub const TELEMETRY_NETWORK_NAME: &str = "network_telemetry";

/// The kind of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum NetworkKind {
    /// Ethernet segment bridged by one or more switches
    L2,
    /// Point-to-point IP link
    L3,
}

/// An interface of an entity on a network.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct NetworkInterface {
    /// The entity owning the interface
    pub entity: String,
    /// The other end of the link (L3 only)
    pub next_hop: Option<String>,
    /// Address of the interface. `None` for switch ports.
    pub ip: Option<IpAddr>,
    /// MAC address of the interface
    pub mac: MacAddress,
    /// VLAN tag of the switch port towards this entity
    pub vlan: Option<u16>,
}

/// A network
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Network {
    /// Globally unique network id
    pub id: u64,
    /// Name of the network
    pub name: String,
    /// Kind of the network
    pub kind: NetworkKind,
    /// Subnet
    pub subnet: IpNet,
    /// Gateway (compose target only)
    pub gateway: Option<IpAddr>,
    /// Interfaces, in attachment order
    pub interfaces: Vec<NetworkInterface>,
    /// Unassigned host addresses
    #[cfg_attr(feature = "json", serde(skip))]
    hosts: Hosts,
}

impl Network {
    /// Name of the L3 network between `a` and `b`.
    pub fn l3_name(a: &str, b: &str) -> String {
        format!("network_{a}_{b}")
    }

    /// Name of the L2 network rooted at `switch`.
    pub fn l2_name(switch: &str) -> String {
        format!("network_switch_{switch}")
    }

    /// Create the point-to-point network from `begin` to `end`. Both ends get an address.
    pub fn l3(alloc: Allocation, begin: &str, end: &str) -> Result<Self, AddressError> {
        let mut net = Self::empty(alloc, Self::l3_name(begin, end), NetworkKind::L3);
        net.push(begin, Some(end), true, None)?;
        net.push(end, Some(begin), true, None)?;
        Ok(net)
    }

    /// Create an L2 network rooted at `switch`, without any interface.
    pub fn l2(alloc: Allocation, switch: &str) -> Self {
        Self::empty(alloc, Self::l2_name(switch), NetworkKind::L2)
    }

    /// Create the telemetry network. It has no interfaces, containers join it by name.
    pub fn telemetry(alloc: Allocation) -> Self {
        Self::empty(alloc, TELEMETRY_NETWORK_NAME.to_string(), NetworkKind::L2)
    }

    /// Network without interfaces
    fn empty(alloc: Allocation, name: String, kind: NetworkKind) -> Self {
        Self {
            id: alloc.id,
            name,
            kind,
            subnet: alloc.subnet,
            gateway: alloc.gateway,
            interfaces: Vec::new(),
            hosts: alloc.hosts,
        }
    }

    /// Attach `entity` to an L2 network. Does nothing if it is already attached.
    pub fn add_member(
        &mut self,
        entity: &str,
        addressed: bool,
        vlan: Option<u16>,
    ) -> Result<(), AddressError> {
        if self.contains(entity) {
            return Ok(());
        }
        self.push(entity, None, addressed, vlan)
    }

    /// Append an interface, taking the next host address if `addressed`.
    fn push(
        &mut self,
        entity: &str,
        next_hop: Option<&str>,
        addressed: bool,
        vlan: Option<u16>,
    ) -> Result<(), AddressError> {
        let ip = if addressed {
            Some(
                self.hosts
                    .next()
                    .ok_or_else(|| AddressError::HostsExhausted(self.name.clone()))?,
            )
        } else {
            None
        };
        let ordinal = u8::try_from(self.interfaces.len() + 1)
            .map_err(|_| AddressError::HostsExhausted(self.name.clone()))?;
        self.interfaces.push(NetworkInterface {
            entity: entity.to_string(),
            next_hop: next_hop.map(String::from),
            ip,
            mac: MacAddress::derive(self.id, ordinal)?,
            vlan,
        });
        Ok(())
    }

    /// Returns `true` if `entity` has an interface on this network.
    pub fn contains(&self, entity: &str) -> bool {
        self.interface(entity).is_some()
    }

    /// The interface of `entity`.
    pub fn interface(&self, entity: &str) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|i| i.entity == entity)
    }

    /// Address of `entity` on this network.
    pub fn ip_of(&self, entity: &str) -> Option<IpAddr> {
        self.interface(entity).and_then(|i| i.ip)
    }

    /// Returns `true` if this is the L3 link from `a` to `b`.
    pub fn links(&self, a: &str, b: &str) -> bool {
        self.kind == NetworkKind::L3
            && self
                .interface(a)
                .and_then(|i| i.next_hop.as_deref())
                .map(|n| n == b)
                .unwrap_or(false)
    }

    /// The begin of an L3 network.
    pub fn begin(&self) -> Option<&NetworkInterface> {
        self.interfaces.first()
    }

    /// The end of an L3 network.
    pub fn end(&self) -> Option<&NetworkInterface> {
        self.interfaces.get(1)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {})", self.name, self.kind, self.subnet)?;
        for i in &self.interfaces {
            write!(f, "\n    {} mac {}", i.entity, i.mac)?;
            if let Some(ip) = i.ip {
                write!(f, " ip {ip}")?;
            }
            if let Some(vlan) = i.vlan {
                write!(f, " vlan {vlan}")?;
            }
        }
        Ok(())
    }
}
