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

//! Resolved entities, and helpers to render their commands into a single shell line.

use std::{collections::BTreeSet, fmt, net::IpAddr};

use itertools::Itertools;
use shell_command::ShellCommand;

#[cfg(feature = "json")]
use serde::Serialize;

use crate::{addressing::MacAddress, config::EntityType, flags::Target};

/// An interface of an entity, in the order in which the entity was attached to the networks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct AttachedInterface {
    /// Local interface name
    pub name: String,
    /// Name of the network
    pub network: String,
    /// Address on the network. Switches have none.
    pub ip: Option<IpAddr>,
    /// MAC address
    pub mac: MacAddress,
    /// VLAN tag of the switch port towards this interface
    pub vlan: Option<u16>,
}

/// A name that an entity must be able to resolve without DNS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct HostAlias {
    /// Name of the remote entity
    pub name: String,
    /// Address of the remote entity
    pub ip: IpAddr,
}

/// A fully resolved entity.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Entity {
    /// Unique name
    pub name: String,
    /// Kind of the entity
    pub kind: EntityType,
    /// Trace id, assigned in creation order starting at 1
    pub trace_id: u32,
    /// Interfaces
    pub interfaces: Vec<AttachedInterface>,
    /// Entities that must be started before this one
    pub depends_on: BTreeSet<String>,
    /// Names this entity resolves statically, without duplicates
    pub extra_hosts: Vec<HostAlias>,
    /// End-to-end paths (including their source) that traverse this entity. Only filled for
    /// firewalls.
    pub traversals: Vec<Vec<String>>,
    /// Commands to run inside the entity, in order
    pub commands: Vec<ShellCommand>,
}

impl Entity {
    /// Create an entity without interfaces and commands.
    pub fn new(name: impl Into<String>, kind: EntityType, trace_id: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            trace_id,
            interfaces: Vec::new(),
            depends_on: BTreeSet::new(),
            extra_hosts: Vec::new(),
            traversals: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Add a static host entry. Duplicates are ignored.
    pub fn add_host(&mut self, name: impl Into<String>, ip: IpAddr) {
        let alias = HostAlias {
            name: name.into(),
            ip,
        };
        if !self.extra_hosts.contains(&alias) {
            self.extra_hosts.push(alias);
        }
    }

    /// Address of the entity on `network`.
    pub fn ip_on(&self, network: &str) -> Option<IpAddr> {
        self.interfaces
            .iter()
            .find(|i| i.network == network)
            .and_then(|i| i.ip)
    }

    /// All commands of the entity, combined into one shell line. See [`combine_commands`].
    pub fn combined_commands(&self, target: Target, separator: &str) -> String {
        combine_commands(&self.commands, target, separator)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (trace id {})", self.kind, self.name, self.trace_id)?;
        for i in &self.interfaces {
            write!(f, "\n    {} on {}", i.name, i.network)?;
            if let Some(ip) = i.ip {
                write!(f, " ({ip})")?;
            }
        }
        if !self.depends_on.is_empty() {
            write!(f, "\n    depends on {}", self.depends_on.iter().join(", "))?;
        }
        for cmd in &self.commands {
            write!(f, "\n    $ {cmd}")?;
        }
        Ok(())
    }
}

/// Wrap a single command for the target. In the cluster target, commands wait for the CNI to
/// set up the interfaces.
///
/// ```
/// # use topoplan::{entity::export_single_command, flags::Target};
/// assert_eq!(export_single_command("ip r d default", Target::Compose), "(ip r d default)");
/// assert_eq!(
///     export_single_command("ip r d default", Target::Kubernetes),
///     "(sleep 20 && ip r d default)"
/// );
/// ```
pub fn export_single_command(cmd: impl fmt::Display, target: Target) -> String {
    match target {
        Target::Compose => format!("({cmd})"),
        Target::Kubernetes => format!("(sleep 20 && {cmd})"),
    }
}

/// Export every command and join them with `separator`. Each exported command is surrounded by
/// single spaces. Use `&` as separator to run all commands in the background.
pub fn combine_commands<C: fmt::Display>(cmds: &[C], target: Target, separator: &str) -> String {
    cmds.iter()
        .map(|c| format!(" {} ", export_single_command(c, target)))
        .join(separator)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hosts_are_deduplicated() {
        let mut e = Entity::new("a", EntityType::Service, 1);
        e.add_host("b", "10.0.0.2".parse().unwrap());
        e.add_host("c", "10.0.0.6".parse().unwrap());
        e.add_host("b", "10.0.0.2".parse().unwrap());
        assert_eq!(
            e.extra_hosts.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn combine() {
        let cmds = vec![ShellCommand::Idle, ShellCommand::OvsStart];
        assert_eq!(
            combine_commands(&cmds, Target::Compose, "&"),
            " (tail -f /dev/null) & (service openvswitch-switch start) "
        );
        assert_eq!(
            combine_commands(&cmds[..1], Target::Kubernetes, "&"),
            " (sleep 20 && tail -f /dev/null) "
        );
    }
}
