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

//! # Architecture
//!
//! The [`Architecture`] is the result of compiling a topology. It is built in a single pass:
//!
//! 1. validate the raw topology into a typed [`TopologyConfig`],
//! 2. build the [`TopologyGraph`],
//! 3. instantiate one [`Entity`] per entity of the topology,
//! 4. record the paths that traverse each firewall,
//! 5. create the networks along every end-to-end path and attach the entities to them,
//! 6. synthesize the routes,
//! 7. compute the static host entries,
//! 8. compute the start-order dependencies,
//! 9. synthesize impairments, timers and setup commands.
//!
//! Every stage only reads the results of earlier stages. Once built, the architecture is
//! read-only.

use std::collections::HashMap;

use log::{debug, info};
use shell_command::ShellCommand;

use crate::{
    addressing::AddressAllocator,
    config::{EntityType, RawTopology, TopologyConfig},
    entity::{AttachedInterface, Entity},
    error::{Error, ResolutionError},
    flags::{GenerationFlags, Target},
    graph::TopologyGraph,
    network::Network,
    path::NetworkPlan,
    synthesis::CommandSynthesizer,
    validator::validate,
};

/// A fully resolved topology.
#[derive(Debug, Clone)]
pub struct Architecture {
    flags: GenerationFlags,
    config: TopologyConfig,
    graph: TopologyGraph,
    plan: NetworkPlan,
    telemetry: Option<Network>,
    entities: Vec<Entity>,
}

impl Architecture {
    /// Validate and compile a topology.
    pub fn build(raw: &RawTopology, flags: GenerationFlags) -> Result<Self, Error> {
        let config = validate(raw, &flags)?;
        info!("Topology is valid");

        let graph = TopologyGraph::build(&config);
        debug!(
            "Built graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        let mut entities = instantiate(&config);
        record_traversals(&config, &mut entities);

        let mut allocator = AddressAllocator::from_flags(&flags);
        let mut telemetry = if flags.jaeger() && flags.target() == Target::Compose {
            Some(Network::telemetry(allocator.telemetry()?))
        } else {
            None
        };
        let plan = NetworkPlan::resolve(&config, &mut allocator, flags.target())?;
        info!("Created {} networks", plan.networks().len());
        attach(&plan, &flags, telemetry.as_mut(), &mut entities)?;

        let mut arch = Self {
            flags,
            config,
            graph,
            plan,
            telemetry,
            entities,
        };

        let routes = arch.synthesizer().routes()?;
        for (owner, cmd) in routes {
            arch.entity_mut(&owner)?.commands.push(cmd);
        }
        info!("Generated routes");

        arch.resolve_hosts()?;
        info!("Configured static hosts");

        arch.resolve_dependencies();
        info!("Computed dependencies");

        arch.synthesize_commands()?;
        info!("Built architecture");
        Ok(arch)
    }

    /// All entities, in the order of the topology.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The entity with the given name.
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Mutable reference to an entity.
    fn entity_mut(&mut self, name: &str) -> Result<&mut Entity, ResolutionError> {
        self.entities
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ResolutionError::UnknownEntity(name.to_string()))
    }

    /// All networks, in creation order. The telemetry network is not included.
    pub fn networks(&self) -> &[Network] {
        self.plan.networks()
    }

    /// The network with the given name, including the telemetry network.
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks()
            .iter()
            .chain(self.telemetry.iter())
            .find(|n| n.name == name)
    }

    /// The telemetry network, if telemetry is enabled on the compose target.
    pub fn telemetry_network(&self) -> Option<&Network> {
        self.telemetry.as_ref()
    }

    /// The network shared by two adjacent hops.
    pub fn shared_network(&self, a: &str, b: &str) -> Result<&Network, ResolutionError> {
        self.plan.shared_network(a, b)
    }

    /// Local interface number of `source` towards `dest`.
    pub fn interface_id(&self, source: &str, dest: &str) -> Result<usize, ResolutionError> {
        self.plan.interface_id(source, dest)
    }

    /// A synthesizer over the resolved networks. Its commands are independent of the commands
    /// already stored in the entities.
    pub fn synthesizer(&self) -> CommandSynthesizer<'_> {
        CommandSynthesizer::new(&self.config, &self.plan, &self.flags)
    }

    /// The graph of the topology
    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    /// The validated topology
    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// The flags used to build the architecture
    pub fn flags(&self) -> &GenerationFlags {
        &self.flags
    }

    /// Let every end host resolve its peers, and every firewall the senders on the paths that
    /// traverse it.
    fn resolve_hosts(&mut self) -> Result<(), ResolutionError> {
        let mut hosts: Vec<(String, String, std::net::IpAddr)> = Vec::new();
        let plan = &self.plan;

        for entity in &self.config.entities {
            if !entity.entity_type().is_end_host() {
                continue;
            }
            let source = &entity.name;
            for conn in entity.connections() {
                let dest = conn.path.last();
                if conn.path.is_direct() {
                    let net = plan.shared_network(source, dest)?;
                    hosts.push((source.clone(), dest.to_string(), plan.address(net, dest)?));
                    hosts.push((dest.to_string(), source.clone(), plan.address(net, source)?));
                    continue;
                }
                let hops = conn.path.from_source(source);
                let n = hops.len();
                let last = plan.shared_network(&hops[n - 2], &hops[n - 1])?;
                hosts.push((source.clone(), dest.to_string(), plan.address(last, dest)?));
                let first = plan.shared_network(&hops[0], &hops[1])?;
                hosts.push((dest.to_string(), source.clone(), plan.address(first, source)?));
            }
        }

        for fw in self.entities.iter().filter(|e| e.kind == EntityType::Firewall) {
            for hops in &fw.traversals {
                for (a, b) in hops.iter().zip(hops.iter().skip(1)) {
                    if *a == fw.name || plan.is_switch(a) {
                        continue;
                    }
                    let net = plan.shared_network(a, b)?;
                    hosts.push((fw.name.clone(), a.clone(), plan.address(net, a)?));
                }
            }
        }

        for (owner, name, ip) in hosts {
            self.entity_mut(&owner)?.add_host(name, ip);
        }
        Ok(())
    }

    /// An entity depends on every hop of its connections. Switches only bridge, and thus have
    /// no dependencies.
    fn resolve_dependencies(&mut self) {
        let deps: HashMap<&str, Vec<&str>> = self
            .config
            .entities
            .iter()
            .filter(|e| e.entity_type() != EntityType::Switch)
            .map(|e| {
                let hops = e
                    .connections()
                    .into_iter()
                    .flat_map(|c| c.path.hops().iter().map(String::as_str))
                    .collect();
                (e.name.as_str(), hops)
            })
            .collect();
        for entity in self.entities.iter_mut() {
            if let Some(hops) = deps.get(entity.name.as_str()) {
                entity.depends_on.extend(hops.iter().map(|h| h.to_string()));
            }
        }
    }

    /// Append impairments, timers and setup commands to every entity.
    fn synthesize_commands(&mut self) -> Result<(), ResolutionError> {
        let synth = self.synthesizer();
        let mut cmds: Vec<(String, Vec<ShellCommand>)> = Vec::new();
        for entity in &self.config.entities {
            let mut c = synth.impairments(entity)?;
            c.extend(synth.timers(entity)?);
            c.extend(synth.setup(entity));
            cmds.push((entity.name.clone(), c));
        }
        for (name, c) in cmds {
            self.entity_mut(&name)?.commands.extend(c);
        }
        Ok(())
    }
}

/// Create one entity per entity of the topology. Trace ids are assigned in order, starting at 1.
fn instantiate(config: &TopologyConfig) -> Vec<Entity> {
    config
        .entities
        .iter()
        .zip(1..)
        .map(|(e, trace_id)| Entity::new(&e.name, e.entity_type(), trace_id))
        .collect()
}

/// Record every end-to-end path (including its source) at each firewall it traverses.
fn record_traversals(config: &TopologyConfig, entities: &mut [Entity]) {
    for e in config.entities.iter().filter(|e| e.entity_type().is_end_host()) {
        for conn in e.connections() {
            if conn.path.is_direct() {
                continue;
            }
            let hops = conn.path.from_source(&e.name);
            for fw in entities.iter_mut().filter(|x| x.kind == EntityType::Firewall) {
                if hops.contains(&fw.name) {
                    fw.traversals.push(hops.clone());
                }
            }
        }
    }
}

/// Fill the interface list of every entity. End hosts join the telemetry network last, so the
/// numbering of their other interfaces does not change.
fn attach(
    plan: &NetworkPlan,
    flags: &GenerationFlags,
    mut telemetry: Option<&mut Network>,
    entities: &mut [Entity],
) -> Result<(), Error> {
    for entity in entities.iter_mut() {
        let offset = match flags.target() {
            Target::Compose => 0,
            Target::Kubernetes => 1,
        };
        for (i, net) in plan.attached(&entity.name).enumerate() {
            let iface = net
                .interface(&entity.name)
                .ok_or_else(|| ResolutionError::InterfaceNotFound {
                    entity: entity.name.clone(),
                    network: net.name.clone(),
                })?;
            entity.interfaces.push(AttachedInterface {
                name: flags.interface_name(i + offset, &entity.name),
                network: net.name.clone(),
                ip: iface.ip,
                mac: iface.mac,
                vlan: iface.vlan,
            });
        }
        if let Some(net) = telemetry.as_deref_mut() {
            if entity.kind.is_end_host() {
                net.add_member(&entity.name, false, None)?;
                if let Some(iface) = net.interface(&entity.name) {
                    entity.interfaces.push(AttachedInterface {
                        name: flags.interface_name(entity.interfaces.len(), &entity.name),
                        network: net.name.clone(),
                        ip: None,
                        mac: iface.mac,
                        vlan: None,
                    });
                }
            }
        }
    }
    Ok(())
}
