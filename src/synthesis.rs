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

//! # Command synthesis
//!
//! The [`CommandSynthesizer`] turns the resolved networks into shell commands. It never mutates
//! the topology; every method returns the commands it produced.
//!
//! - [`CommandSynthesizer::routes`] emits the routes of every hop of every end-to-end path.
//! - [`CommandSynthesizer::impairments`] shapes the outgoing interface of every connection.
//! - [`CommandSynthesizer::timers`] schedules changes (and restorations) of impairments.
//! - [`CommandSynthesizer::setup`] prepares routers, firewalls and switches.

use shell_command::{
    Impairment, IoamTraceType, NextHop, RouteDestination, Seconds, ShellCommand,
};

use crate::{
    config::{
        ConnectionConfig, EntityConfig, EntityKindConfig, FirewallPolicy, FirewallRule,
        Impairments, Timer, TopologyConfig,
    },
    error::ResolutionError,
    flags::{GenerationFlags, IpVersion, Target},
    path::NetworkPlan,
};

/// Generates the commands of all entities from the resolved networks.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer<'a> {
    config: &'a TopologyConfig,
    plan: &'a NetworkPlan,
    flags: &'a GenerationFlags,
    trace_type: IoamTraceType,
}

impl<'a> CommandSynthesizer<'a> {
    /// Create a synthesizer over a resolved topology.
    pub fn new(config: &'a TopologyConfig, plan: &'a NetworkPlan, flags: &'a GenerationFlags) -> Self {
        Self {
            config,
            plan,
            flags,
            trace_type: IoamTraceType::default(),
        }
    }

    /// Routes of all end-to-end connections, as pairs of the entity that runs the command and the
    /// command itself. Direct connections only get a route if end-to-end tracing is enabled.
    pub fn routes(&self) -> Result<Vec<(String, ShellCommand)>, ResolutionError> {
        let mut routes = Vec::new();
        for entity in &self.config.entities {
            if !entity.entity_type().is_end_host() {
                continue;
            }
            for conn in entity.connections() {
                if !conn.path.is_direct() {
                    self.path_routes(&conn.path.from_source(&entity.name), &mut routes)?;
                } else if self.flags.e2e_tracing() {
                    routes.push((
                        entity.name.clone(),
                        self.direct_route(&entity.name, conn.path.last())?,
                    ));
                }
            }
        }
        Ok(routes)
    }

    /// Routes along the full path `hops`, including its source. Every addressed hop gets a route
    /// towards the destination subnet (except the destination itself) and one towards the source
    /// subnet (except the source itself). Switches get no routes.
    fn path_routes(
        &self,
        hops: &[String],
        routes: &mut Vec<(String, ShellCommand)>,
    ) -> Result<(), ResolutionError> {
        let n = hops.len();
        if n < 2 {
            return Ok(());
        }
        let no_hop = || ResolutionError::NoAddressedHop(hops.join("->"));
        let source_subnet = self.plan.shared_network(&hops[0], &hops[1])?.subnet;
        let dest_subnet = self.plan.shared_network(&hops[n - 2], &hops[n - 1])?.subnet;
        let ioam_size = self.trace_type.per_hop_size() * n as u32;

        for (i, hop) in hops.iter().enumerate() {
            if self.plan.is_switch(hop) {
                continue;
            }

            // towards the destination
            if i + 1 < n {
                let next = self.plan.next_addressed(hops, i + 1).ok_or_else(no_hop)?;
                let net = self.plan.shared_network(hop, &hops[i + 1])?;
                let via = self.plan.address(net, &hops[next])?;
                let cmd = if i == 0
                    && self.flags.ip_version() == IpVersion::V6
                    && self.flags.e2e_tracing()
                {
                    ShellCommand::IoamRoute {
                        destination: RouteDestination::Subnet(dest_subnet),
                        trace_type: self.trace_type,
                        size: ioam_size,
                        next_hop: NextHop::Via(via),
                    }
                } else {
                    ShellCommand::Route {
                        destination: dest_subnet,
                        via,
                    }
                };
                routes.push((hop.clone(), cmd));
            }

            // towards the source
            if i > 0 {
                let prev = self.plan.prev_addressed(hops, i - 1).ok_or_else(no_hop)?;
                let net = self.plan.shared_network(&hops[i - 1], hop)?;
                let via = self.plan.address(net, &hops[prev])?;
                routes.push((
                    hop.clone(),
                    ShellCommand::Route {
                        destination: source_subnet,
                        via,
                    },
                ));
            }
        }
        Ok(())
    }

    /// IOAM route of a direct connection, leaving through the local interface.
    fn direct_route(&self, source: &str, dest: &str) -> Result<ShellCommand, ResolutionError> {
        let net = self.plan.shared_network(source, dest)?;
        let ip = self.plan.address(net, dest)?;
        Ok(ShellCommand::IoamRoute {
            destination: RouteDestination::Host(ip),
            trace_type: self.trace_type,
            size: self.trace_type.per_hop_size() * 2,
            next_hop: NextHop::Dev(self.interface(source, dest)?),
        })
    }

    /// Name of the interface of `source` towards `dest`.
    pub fn interface(&self, source: &str, dest: &str) -> Result<String, ResolutionError> {
        let id = self.plan.interface_id(source, dest)?;
        Ok(self.flags.interface_name(id, source))
    }

    /// Impairment commands of all connections of `entity`.
    pub fn impairments(&self, entity: &EntityConfig) -> Result<Vec<ShellCommand>, ResolutionError> {
        let mut cmds = Vec::new();
        for conn in entity.connections() {
            if conn.impairments.is_empty() {
                continue;
            }
            let dev = self.interface(&entity.name, conn.path.first())?;
            cmds.extend(impairment_commands(&dev, &conn.impairments));
        }
        Ok(cmds)
    }

    /// Timer commands of all connections of `entity`.
    pub fn timers(&self, entity: &EntityConfig) -> Result<Vec<ShellCommand>, ResolutionError> {
        let mut cmds = Vec::new();
        for conn in entity.connections() {
            if conn.timers.is_empty() {
                continue;
            }
            let dev = self.interface(&entity.name, conn.path.first())?;
            for timer in &conn.timers {
                cmds.extend(self.timer(entity, conn, &dev, timer)?);
            }
        }
        Ok(cmds)
    }

    /// Commands of a single timer: the change at `start`, and the restoration at
    /// `start + duration` if the timer has a duration.
    fn timer(
        &self,
        entity: &EntityConfig,
        conn: &ConnectionConfig,
        dev: &str,
        timer: &Timer,
    ) -> Result<Vec<ShellCommand>, ResolutionError> {
        let current = self.impairments(entity)?;
        let matching: Vec<&ShellCommand> = current
            .iter()
            .filter(|c| c.shapes(timer.option, dev))
            .collect();
        let [original] = matching.as_slice() else {
            return Err(ResolutionError::AmbiguousTimerTarget {
                entity: entity.name.clone(),
                impairment: timer.option,
                interface: dev.to_string(),
                matches: matching.len(),
            });
        };

        let changed = conn.impairments.with(timer.option, &timer.new_value);
        let mutated = impairment_commands(dev, &changed)
            .into_iter()
            .find(|c| c.shapes(timer.option, dev))
            .ok_or_else(|| ResolutionError::AmbiguousTimerTarget {
                entity: entity.name.clone(),
                impairment: timer.option,
                interface: dev.to_string(),
                matches: 0,
            })?;

        let mut cmds = vec![reconfigure(timer.option, dev, mutated, timer.start)];
        if let Some(duration) = timer.duration {
            cmds.push(reconfigure(
                timer.option,
                dev,
                (*original).clone(),
                timer.start + duration,
            ));
        }
        Ok(cmds)
    }

    /// Setup commands of routers, firewalls and switches. End hosts need no setup. A switch gets
    /// one port per entity it bridges on any resolved path.
    pub fn setup(&self, entity: &EntityConfig) -> Vec<ShellCommand> {
        let mut cmds = Vec::new();
        match &entity.kind {
            EntityKindConfig::Router(_) => {
                if self.flags.e2e_tracing() {
                    cmds.push(ShellCommand::SetInterfaces);
                    cmds.push(ShellCommand::IoamNamespace);
                }
                if self.flags.target() == Target::Kubernetes {
                    cmds.push(ShellCommand::DropIcmpRedirect);
                }
                cmds.extend(forwarder_epilogue());
            }
            EntityKindConfig::Firewall(fw) => {
                if self.flags.target() == Target::Kubernetes {
                    cmds.push(ShellCommand::DropIcmpRedirect);
                }
                let version = self.flags.ip_version();
                cmds.push(ShellCommand::ForwardPolicy {
                    version,
                    accept: fw.policy == FirewallPolicy::Accept,
                });
                cmds.extend(fw.rules.iter().map(|rule| match rule {
                    FirewallRule::Custom(c) => ShellCommand::Raw(c.clone()),
                    rule => ShellCommand::ForwardRule {
                        version,
                        rule: rule.arguments().unwrap_or_default(),
                    },
                }));
                cmds.extend(forwarder_epilogue());
            }
            EntityKindConfig::Switch(sw) => {
                cmds.push(ShellCommand::OvsStart);
                cmds.push(ShellCommand::OvsAddBridge {
                    bridge: entity.name.clone(),
                });
                cmds.extend(self.plan.ports(&entity.name).iter().map(|member| {
                    ShellCommand::OvsAddPort {
                        bridge: entity.name.clone(),
                        port: format!("{member}_{}", entity.name),
                        tag: sw.vlan_of(member),
                    }
                }));
                cmds.push(ShellCommand::Idle);
            }
            EntityKindConfig::Service(_) | EntityKindConfig::External(_) => {}
        }
        cmds
    }
}

/// The commands realizing `impairments` on interface `dev`: MTU, then queue length, then a
/// single netem qdisc.
pub fn impairment_commands(dev: &str, impairments: &Impairments) -> Vec<ShellCommand> {
    let mut cmds = Vec::new();
    if let Some(mtu) = impairments.mtu {
        cmds.push(ShellCommand::SetMtu {
            dev: dev.to_string(),
            mtu,
        });
    }
    if let Some(len) = impairments.buffer_size {
        cmds.push(ShellCommand::SetTxQueueLen {
            dev: dev.to_string(),
            len,
        });
    }
    if !impairments.netem.is_empty() {
        cmds.push(ShellCommand::AddNetem {
            dev: dev.to_string(),
            netem: impairments.netem.clone(),
        });
    }
    cmds
}

/// Schedule `cmd` at `at`. A netem qdisc must be removed before it can be added again.
fn reconfigure(impairment: Impairment, dev: &str, cmd: ShellCommand, at: Seconds) -> ShellCommand {
    if impairment.is_netem() {
        let delete = ShellCommand::DeleteQdisc {
            dev: dev.to_string(),
        };
        ShellCommand::Delayed {
            after: at,
            steps: vec![delete, cmd],
        }
    } else {
        cmd.delayed(at)
    }
}

/// Remove both default routes and keep the container running.
fn forwarder_epilogue() -> [ShellCommand; 3] {
    [
        ShellCommand::DeleteDefaultRoute(IpVersion::V4),
        ShellCommand::DeleteDefaultRoute(IpVersion::V6),
        ShellCommand::Idle,
    ]
}
