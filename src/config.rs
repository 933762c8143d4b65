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

//! Topology description, both in its raw form (as loaded from YAML) and in its typed form (as
//! produced by the [`validator`](crate::validator)).
//!
//! The raw form keeps the entities in the order in which they appear in the file. That order
//! determines trace ids, network ids, and command order, and thus must be preserved.

use std::{fmt, fs, path::Path as FsPath};

use itertools::Itertools;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_yaml::Value;
use shell_command::{Impairment, Netem, Seconds};
use thiserror::Error;

#[cfg(feature = "json")]
use serde::Serialize;

/// Error while loading the topology file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Unable to open the topology file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid YAML, or not a mapping at the top level.
    #[error("Unable to parse the topology: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Two entities have the same name.
    #[error("Names of entities must be unique. Found {0:?} more than once.")]
    DuplicateName(String),
}

/// The topology as it was written, before validation. Entities are kept in file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTopology {
    entities: Vec<(String, Value)>,
}

impl RawTopology {
    /// Parse a topology from a YAML string.
    pub fn from_yaml(s: &str) -> Result<Self, LoadError> {
        let raw: Self = serde_yaml::from_str(s)?;
        if let Some(name) = raw.entities.iter().map(|(n, _)| n).duplicates().next() {
            return Err(LoadError::DuplicateName(name.clone()));
        }
        Ok(raw)
    }

    /// Read and parse the topology file at `path`.
    pub fn from_file(path: impl AsRef<FsPath>) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Iterate over all entity names and their raw description, in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entities.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the topology has no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<'de> Deserialize<'de> for RawTopology {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawTopologyVisitor)
    }
}

/// Visitor that keeps file order. Duplicates are kept, and rejected by [`RawTopology::from_yaml`].
struct RawTopologyVisitor;

impl<'de> Visitor<'de> for RawTopologyVisitor {
    type Value = RawTopology;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping from entity names to entities")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawTopology::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entities = Vec::new();
        while let Some(entry) = map.next_entry::<String, Value>()? {
            entities.push(entry);
        }
        Ok(RawTopology { entities })
    }
}

/// The kind of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum EntityType {
    /// A microservice
    Service,
    /// A container running an arbitrary image
    External,
    /// A router
    Router,
    /// A router that filters forwarded traffic
    Firewall,
    /// An Ethernet switch
    Switch,
}

impl EntityType {
    /// All known entity types
    pub const ALL: [EntityType; 5] = [
        EntityType::Service,
        EntityType::External,
        EntityType::Router,
        EntityType::Firewall,
        EntityType::Switch,
    ];

    /// Key used in the topology file.
    pub fn key(&self) -> &'static str {
        match self {
            EntityType::Service => "service",
            EntityType::External => "external",
            EntityType::Router => "router",
            EntityType::Firewall => "firewall",
            EntityType::Switch => "switch",
        }
    }

    /// Parse the key used in the topology file.
    pub fn from_key(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == s)
    }

    /// Entities that may appear in the middle of a path.
    pub fn is_intermediary(&self) -> bool {
        matches!(
            self,
            EntityType::Router | EntityType::Firewall | EntityType::Switch
        )
    }

    /// Entities that may originate and terminate a path.
    pub fn is_end_host(&self) -> bool {
        matches!(self, EntityType::Service | EntityType::External)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A validated topology
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologyConfig {
    /// Entities in file order
    pub entities: Vec<EntityConfig>,
}

impl TopologyConfig {
    /// Get the entity with the given name.
    pub fn get(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Get the type of the entity with the given name.
    pub fn entity_type(&self, name: &str) -> Option<EntityType> {
        self.get(name).map(|e| e.entity_type())
    }
}

/// A validated entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    /// Unique name
    pub name: String,
    /// Kind-specific configuration
    pub kind: EntityKindConfig,
}

impl EntityConfig {
    /// The type of the entity
    pub fn entity_type(&self) -> EntityType {
        match &self.kind {
            EntityKindConfig::Service(_) => EntityType::Service,
            EntityKindConfig::External(_) => EntityType::External,
            EntityKindConfig::Router(_) => EntityType::Router,
            EntityKindConfig::Firewall(_) => EntityType::Firewall,
            EntityKindConfig::Switch(_) => EntityType::Switch,
        }
    }

    /// All connections of this entity. For services, this is the concatenation of the
    /// connections of every endpoint.
    pub fn connections(&self) -> Vec<&ConnectionConfig> {
        match &self.kind {
            EntityKindConfig::Service(s) => s
                .endpoints
                .iter()
                .flat_map(|e| e.connections.iter())
                .collect(),
            EntityKindConfig::External(x) => x.connections.iter().collect(),
            EntityKindConfig::Router(x) => x.connections.iter().collect(),
            EntityKindConfig::Firewall(x) => x.connections.iter().collect(),
            EntityKindConfig::Switch(x) => x.connections.iter().collect(),
        }
    }

    /// Ports exposed by this entity. Intermediaries and unexposed entities expose nothing.
    pub fn exposed_ports(&self) -> Vec<u16> {
        match &self.kind {
            EntityKindConfig::Service(s) if s.expose => vec![s.port],
            EntityKindConfig::External(x) if x.expose => x.ports.clone(),
            _ => Vec::new(),
        }
    }
}

/// Kind-specific configuration of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKindConfig {
    /// A microservice
    Service(ServiceConfig),
    /// A container running an arbitrary image
    External(ExternalConfig),
    /// A router
    Router(RouterConfig),
    /// A firewall
    Firewall(FirewallConfig),
    /// A switch
    Switch(SwitchConfig),
}

/// Configuration of a microservice.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Listening port
    pub port: u16,
    /// Whether the port is published. Default is `true`.
    pub expose: bool,
    /// Endpoints served by the service
    pub endpoints: Vec<EndpointConfig>,
}

/// A single endpoint of a microservice.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Entrypoint (URL path)
    pub entrypoint: String,
    /// Size of the response payload
    pub psize: u64,
    /// Outgoing connections triggered by a request on this endpoint
    pub connections: Vec<ConnectionConfig>,
}

/// Configuration of an external container.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalConfig {
    /// Container image
    pub image: String,
    /// Listening ports
    pub ports: Vec<u16>,
    /// Whether the ports are published. Default is `true`.
    pub expose: bool,
    /// Outgoing connections
    pub connections: Vec<ConnectionConfig>,
}

/// Configuration of a router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Neighbors of the router
    pub connections: Vec<ConnectionConfig>,
}

/// Configuration of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchConfig {
    /// Entities bridged by the switch. The VLAN of a connection tags the port towards it.
    pub connections: Vec<ConnectionConfig>,
}

impl SwitchConfig {
    /// VLAN tag of the port towards `member`, if any.
    pub fn vlan_of(&self, member: &str) -> Option<u16> {
        self.connections
            .iter()
            .find(|c| c.path.first() == member)
            .and_then(|c| c.vlan)
    }
}

/// Configuration of a firewall.
#[derive(Debug, Clone, PartialEq)]
pub struct FirewallConfig {
    /// Default policy of the forward chain
    pub policy: FirewallPolicy,
    /// Rules, in order
    pub rules: Vec<FirewallRule>,
    /// Neighbors of the firewall
    pub connections: Vec<ConnectionConfig>,
}

/// Default policy of a firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirewallPolicy {
    /// Forward by default
    Accept,
    /// Drop by default
    Drop,
}

/// A single firewall rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallRule {
    /// Rule emitted verbatim
    Custom(String),
    /// Rule assembled from its match fields
    Match {
        /// Source address or name
        source: Option<String>,
        /// Source port, `*` for any
        sport: Option<String>,
        /// Destination address or name
        destination: Option<String>,
        /// Destination port, `*` for any
        dport: Option<String>,
        /// Protocol
        protocol: Option<String>,
        /// Target (upper-cased when emitted)
        action: Option<String>,
        /// Extension, emitted verbatim
        extension: Option<String>,
    },
}

impl FirewallRule {
    /// Everything that follows `-A FORWARD` in the emitted rule. Returns `None` for custom rules.
    pub fn arguments(&self) -> Option<String> {
        let FirewallRule::Match {
            source,
            sport,
            destination,
            dport,
            protocol,
            action,
            extension,
        } = self
        else {
            return None;
        };
        let any = |x: &&String| x.as_str() != "*";
        let args = [
            protocol.as_ref().map(|p| format!("-p {p}")),
            source.as_ref().map(|s| format!("-s {s}")),
            sport.as_ref().filter(any).map(|p| format!("--sport {p}")),
            destination.as_ref().map(|d| format!("-d {d}")),
            dport.as_ref().filter(any).map(|p| format!("--dport {p}")),
            extension.clone(),
            action.as_ref().map(|a| format!("-j {}", a.to_uppercase())),
        ];
        Some(args.into_iter().flatten().join(" "))
    }
}

/// A sequence of hops. The owning entity is implicit and not part of the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Path(Vec<String>);

impl Path {
    /// Parse a path of the form `a->b->c`, or a single name for direct connections.
    pub fn parse(s: &str) -> Self {
        Self(s.split("->").map(|h| h.trim().to_string()).collect())
    }

    /// Create a path from its hops.
    pub fn new(hops: Vec<String>) -> Self {
        Self(hops)
    }

    /// All hops, in order.
    pub fn hops(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if the path consists of a single hop.
    pub fn is_direct(&self) -> bool {
        self.0.len() == 1
    }

    /// The first hop
    pub fn first(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    /// The destination
    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// The full path, including the owning entity `source` in front.
    pub fn from_source(&self, source: &str) -> Vec<String> {
        std::iter::once(source.to_string())
            .chain(self.0.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("->"))
    }
}

/// A connection of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Hops to the destination
    pub path: Path,
    /// URL requested by a service on the destination
    pub url: Option<String>,
    /// VLAN tag (only meaningful on switch connections)
    pub vlan: Option<u16>,
    /// Impairments on the outgoing interface
    pub impairments: Impairments,
    /// Scheduled changes of the impairments
    pub timers: Vec<Timer>,
}

impl ConnectionConfig {
    /// Create a connection without impairments.
    pub fn new(path: Path) -> Self {
        Self {
            path,
            url: None,
            vlan: None,
            impairments: Impairments::default(),
            timers: Vec::new(),
        }
    }
}

/// Impairments of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Impairments {
    /// MTU of the outgoing interface
    pub mtu: Option<u32>,
    /// Transmit queue length of the outgoing interface
    pub buffer_size: Option<u32>,
    /// Netem parameters
    pub netem: Netem,
}

impl Impairments {
    /// Returns `true` if no impairment is set.
    pub fn is_empty(&self) -> bool {
        self.mtu.is_none() && self.buffer_size.is_none() && self.netem.is_empty()
    }

    /// Returns `true` if `impairment` has a value.
    pub fn has(&self, impairment: Impairment) -> bool {
        match impairment {
            Impairment::Mtu => self.mtu.is_some(),
            Impairment::BufferSize => self.buffer_size.is_some(),
            i => self.netem.field(i).is_some(),
        }
    }

    /// Copy of these impairments with `impairment` set to `value`.
    pub fn with(&self, impairment: Impairment, value: &ImpairmentValue) -> Self {
        let mut new = self.clone();
        match (impairment, value) {
            (Impairment::Mtu, ImpairmentValue::Integer(x)) => new.mtu = Some(*x),
            (Impairment::BufferSize, ImpairmentValue::Integer(x)) => new.buffer_size = Some(*x),
            (i, ImpairmentValue::Text(x)) => {
                if let Some(field) = new.netem.field_mut(i) {
                    *field = Some(x.clone());
                } else {
                    log::warn!("Ignoring textual value {x} for {i}");
                }
            }
            (i, ImpairmentValue::Integer(x)) => {
                if let Some(field) = new.netem.field_mut(i) {
                    *field = Some(x.to_string());
                }
            }
        }
        new
    }
}

/// Value of an impairment, as given by a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpairmentValue {
    /// MTU or buffer size
    Integer(u32),
    /// Any `tc` parameter
    Text(String),
}

impl fmt::Display for ImpairmentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpairmentValue::Integer(x) => write!(f, "{x}"),
            ImpairmentValue::Text(x) => f.write_str(x),
        }
    }
}

/// A scheduled change of an impairment.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    /// The impairment to change. It must already be set on the connection.
    pub option: Impairment,
    /// Offset of the change
    pub start: Seconds,
    /// The new value
    pub new_value: ImpairmentValue,
    /// If set, the original value is restored at `start + duration`.
    pub duration: Option<Seconds>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn preserves_order() {
        let raw = RawTopology::from_yaml("zeta:\n  type: router\nalpha:\n  type: router\n").unwrap();
        assert_eq!(
            raw.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["zeta", "alpha"]
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        match RawTopology::from_yaml("a:\n  type: router\nb:\n  type: router\na:\n  type: switch\n") {
            Err(LoadError::DuplicateName(name)) => assert_eq!(name, "a"),
            x => panic!("expected a duplicate name, got {x:?}"),
        }
    }

    #[test]
    fn firewall_rule_arguments() {
        let rule = FirewallRule::Match {
            source: Some("frontend".into()),
            sport: Some("*".into()),
            destination: Some("backend".into()),
            dport: Some("80".into()),
            protocol: Some("tcp".into()),
            action: Some("accept".into()),
            extension: None,
        };
        assert_eq!(
            rule.arguments().unwrap(),
            "-p tcp -s frontend -d backend --dport 80 -j ACCEPT"
        );
        assert_eq!(FirewallRule::Custom("x".into()).arguments(), None);
    }

    #[test]
    fn path_parsing() {
        let p = Path::parse("r1->sw->b");
        assert_eq!(p.hops(), ["r1", "sw", "b"]);
        assert!(!p.is_direct());
        assert_eq!(p.first(), "r1");
        assert_eq!(p.last(), "b");
        assert_eq!(p.from_source("a"), vec!["a", "r1", "sw", "b"]);
        assert_eq!(p.to_string(), "r1->sw->b");
        assert!(Path::parse("b").is_direct());
    }
}
