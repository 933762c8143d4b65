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

//! # Path resolution
//!
//! The [`NetworkPlan`] walks every end-to-end connection and creates the networks along it:
//!
//! - Two adjacent non-switch hops `a -> b` share an L3 network named `network_a_b`. The network is
//!   reused if another path traverses `a -> b` again.
//! - A hop followed by a chain of switches shares a single L2 network with all switches of the
//!   chain and the first non-switch hop after it. Switches that are chained on any path (directly
//!   or through other switches) are bridged into the same L2 network, so a path joining two
//!   previously separate chains never splits a segment.
//!
//! Afterwards, the plan answers which network two adjacent hops share, and at which position a
//! network appears in the interface list of an entity.

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
};

use log::debug;
use petgraph::unionfind::UnionFind;

use crate::{
    addressing::AddressAllocator,
    config::{EntityKindConfig, TopologyConfig},
    error::{Error, ResolutionError},
    flags::Target,
    network::{Network, NetworkInterface},
};

/// All networks of a topology, and the order in which entities are attached to them.
#[derive(Debug, Clone)]
pub struct NetworkPlan {
    /// All networks, in creation order
    networks: Vec<Network>,
    /// Indices of the networks of every entity, in interface order
    attachments: HashMap<String, Vec<usize>>,
    /// Bridged group of every switch
    groups: HashMap<String, usize>,
    /// L2 network of every bridged group
    l2: HashMap<usize, usize>,
    /// Neighbors of every switch along the resolved paths, in order of appearance
    ports: HashMap<String, Vec<String>>,
    /// Names of all switches
    switches: HashSet<String>,
    /// Deployment target, which shifts interface numbers
    target: Target,
}

impl NetworkPlan {
    /// Create the networks of all end-to-end connections of `config`.
    pub fn resolve(
        config: &TopologyConfig,
        allocator: &mut AddressAllocator,
        target: Target,
    ) -> Result<Self, Error> {
        let switches: Vec<String> = config
            .entities
            .iter()
            .filter(|e| matches!(e.kind, EntityKindConfig::Switch(_)))
            .map(|e| e.name.clone())
            .collect();
        let paths: Vec<Vec<String>> = config
            .entities
            .iter()
            .filter(|e| e.entity_type().is_end_host())
            .flat_map(|e| {
                e.connections()
                    .into_iter()
                    .map(move |c| c.path.from_source(&e.name))
            })
            .collect();

        let mut plan = Self {
            networks: Vec::new(),
            attachments: HashMap::new(),
            groups: switch_groups(&switches, &paths),
            l2: HashMap::new(),
            ports: HashMap::new(),
            switches: switches.into_iter().collect(),
            target,
        };
        for hops in &paths {
            plan.add_path(config, allocator, hops)?;
        }
        Ok(plan)
    }

    /// Create the networks along a full path (including its source).
    fn add_path(
        &mut self,
        config: &TopologyConfig,
        allocator: &mut AddressAllocator,
        hops: &[String],
    ) -> Result<(), Error> {
        let mut i = 0;
        while i + 1 < hops.len() {
            if self.is_switch(&hops[i + 1]) {
                let end = self
                    .next_addressed(hops, i + 1)
                    .ok_or_else(|| ResolutionError::NoAddressedHop(hops.join("->")))?;
                self.add_segment(config, allocator, &hops[i..=end])?;
                i = end;
            } else {
                self.add_link(allocator, &hops[i], &hops[i + 1])?;
                i += 1;
            }
        }
        Ok(())
    }

    /// Create (or extend) the L2 network of `segment`, whose first and last entries are
    /// addressed, and whose inner entries are all switches.
    fn add_segment(
        &mut self,
        config: &TopologyConfig,
        allocator: &mut AddressAllocator,
        segment: &[String],
    ) -> Result<(), Error> {
        let (Some(first), Some(last)) = (segment.first(), segment.last()) else {
            return Ok(());
        };
        let switches = &segment[1..segment.len() - 1];
        let group = *self
            .groups
            .get(&switches[0])
            .ok_or_else(|| ResolutionError::UnknownEntity(switches[0].clone()))?;
        let idx = match self.l2.get(&group) {
            Some(idx) => *idx,
            None => {
                let net = Network::l2(allocator.allocate()?, &switches[0]);
                debug!("created {}", net.name);
                self.networks.push(net);
                let idx = self.networks.len() - 1;
                self.l2.insert(group, idx);
                idx
            }
        };
        for window in segment.windows(3) {
            let [prev, switch, next] = window else {
                continue;
            };
            let ports = self.ports.entry(switch.clone()).or_default();
            for neighbor in [prev, next] {
                if !ports.contains(neighbor) {
                    ports.push(neighbor.clone());
                }
            }
        }

        let vlan = |switch: &String, member: &String| match config.get(switch).map(|e| &e.kind) {
            Some(EntityKindConfig::Switch(s)) => s.vlan_of(member),
            _ => None,
        };
        let first_vlan = vlan(&switches[0], first);
        let last_vlan = vlan(&switches[switches.len() - 1], last);

        let net = &mut self.networks[idx];
        net.add_member(first, true, first_vlan)?;
        for s in switches {
            net.add_member(s, false, None)?;
        }
        net.add_member(last, true, last_vlan)?;
        for member in segment {
            self.attach(member, idx);
        }
        Ok(())
    }

    /// Create the L3 network from `a` to `b`, unless it already exists.
    fn add_link(
        &mut self,
        allocator: &mut AddressAllocator,
        a: &str,
        b: &str,
    ) -> Result<(), Error> {
        if self.networks.iter().any(|n| n.links(a, b)) {
            return Ok(());
        }
        let net = Network::l3(allocator.allocate()?, a, b)?;
        debug!("created {}", net.name);
        self.networks.push(net);
        let idx = self.networks.len() - 1;
        self.attach(a, idx);
        self.attach(b, idx);
        Ok(())
    }

    /// Append network `idx` to the interfaces of `entity`.
    fn attach(&mut self, entity: &str, idx: usize) {
        let attached = self.attachments.entry(entity.to_string()).or_default();
        if !attached.contains(&idx) {
            attached.push(idx);
        }
    }

    /// Returns `true` if `entity` is a switch.
    pub fn is_switch(&self, entity: &str) -> bool {
        self.switches.contains(entity)
    }

    /// The L2 network that bridges `switch`, if any path traverses it.
    fn l2_index(&self, switch: &str) -> Option<usize> {
        self.groups
            .get(switch)
            .and_then(|group| self.l2.get(group))
            .copied()
    }

    /// Entities bridged by `switch`: its neighbors on all resolved paths, in order of appearance.
    pub fn ports(&self, switch: &str) -> &[String] {
        self.ports.get(switch).map(Vec::as_slice).unwrap_or_default()
    }

    /// All networks, in creation order.
    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Consume the plan and return all networks.
    pub fn into_networks(self) -> Vec<Network> {
        self.networks
    }

    /// Networks of `entity`, in the order of its interfaces.
    pub fn attached(&self, entity: &str) -> impl Iterator<Item = &Network> {
        self.attachments
            .get(entity)
            .into_iter()
            .flatten()
            .map(|idx| &self.networks[*idx])
    }

    /// Index of the network shared by `a` and `b` in path orientation.
    fn shared_index(&self, a: &str, b: &str) -> Option<usize> {
        if self.is_switch(a) || self.is_switch(b) {
            let switch = if self.is_switch(a) { a } else { b };
            self.l2_index(switch)
                .filter(|idx| self.networks[*idx].contains(a) && self.networks[*idx].contains(b))
        } else {
            self.networks.iter().position(|n| n.links(a, b))
        }
    }

    /// The network shared by `a` and `b`. For two addressed entities, this is the L3 network from
    /// `a` to `b`. If either of them is a switch, this is the L2 network of the switch.
    pub fn shared_network(&self, a: &str, b: &str) -> Result<&Network, ResolutionError> {
        self.shared_index(a, b)
            .map(|idx| &self.networks[idx])
            .ok_or_else(|| ResolutionError::NoSharedNetwork(a.to_string(), b.to_string()))
    }

    /// The address of `entity` on `net`.
    pub fn address(&self, net: &Network, entity: &str) -> Result<IpAddr, ResolutionError> {
        match net.interface(entity) {
            Some(NetworkInterface { ip: Some(ip), .. }) => Ok(*ip),
            Some(_) => Err(ResolutionError::AddressNotFound {
                entity: entity.to_string(),
                network: net.name.clone(),
            }),
            None => Err(ResolutionError::InterfaceNotFound {
                entity: entity.to_string(),
                network: net.name.clone(),
            }),
        }
    }

    /// Local interface number of `source` towards `dest`. In the cluster target, interface 0 is
    /// assigned by the CNI, so all numbers are shifted by one.
    pub fn interface_id(&self, source: &str, dest: &str) -> Result<usize, ResolutionError> {
        let idx = self
            .shared_index(source, dest)
            .or_else(|| self.shared_index(dest, source))
            .ok_or_else(|| ResolutionError::NoSharedNetwork(source.to_string(), dest.to_string()))?;
        let position = self
            .attachments
            .get(source)
            .and_then(|a| a.iter().position(|x| *x == idx))
            .ok_or_else(|| ResolutionError::InterfaceNotFound {
                entity: source.to_string(),
                network: self.networks[idx].name.clone(),
            })?;
        Ok(match self.target {
            Target::Compose => position,
            Target::Kubernetes => position + 1,
        })
    }

    /// Position of the first non-switch hop at or after `from`.
    pub fn next_addressed(&self, hops: &[String], from: usize) -> Option<usize> {
        (from..hops.len()).find(|j| !self.is_switch(&hops[*j]))
    }

    /// Position of the last non-switch hop at or before `to`.
    pub fn prev_addressed(&self, hops: &[String], to: usize) -> Option<usize> {
        (0..=to).rev().find(|j| !self.is_switch(&hops[*j]))
    }
}

/// Partition `switches` into bridged groups. Two switches belong to the same group if they are
/// adjacent on any path, so chains that share a switch end up in one group.
fn switch_groups(switches: &[String], paths: &[Vec<String>]) -> HashMap<String, usize> {
    let index: HashMap<&str, usize> = switches
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let mut groups = UnionFind::new(switches.len());
    for hops in paths {
        for (a, b) in hops.iter().zip(hops.iter().skip(1)) {
            if let (Some(x), Some(y)) = (index.get(a.as_str()), index.get(b.as_str())) {
                groups.union(*x, *y);
            }
        }
    }
    let labels = groups.into_labeling();
    debug!("bridged groups of {switches:?}: {labels:?}");
    switches.iter().cloned().zip(labels).collect()
}
