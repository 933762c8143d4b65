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

//! # Validation
//!
//! The validator turns a [`RawTopology`] into a typed [`TopologyConfig`]. Validation runs in five
//! phases, each of which assumes that all previous phases passed:
//!
//! 1. [`Phase::CommonFields`]: every entity is a mapping with a known `type`.
//! 2. [`Phase::EntityFields`]: per-type mandatory fields, connection fields, impairment and timer
//!    values. This phase produces the typed configuration.
//! 3. [`Phase::Connectivity`]: every path is possible. Hops exist, intermediate hops are
//!    intermediaries that themselves name the next hop, and paths end at an end host.
//! 4. [`Phase::Cycles`]: the [`TopologyGraph`] is acyclic.
//! 5. [`Phase::Ports`]: exposed ports are unique and do not collide with telemetry ports.
//!
//! Within a phase, all checks run, such that every problem is reported at once. The first phase
//! that reports a problem aborts validation.

use std::{collections::HashMap, fmt};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use shell_command::{Impairment, Seconds};
use thiserror::Error;

use crate::{
    config::{
        ConnectionConfig, EndpointConfig, EntityConfig, EntityKindConfig, EntityType,
        ExternalConfig, FirewallConfig, FirewallPolicy, FirewallRule, ImpairmentValue,
        Impairments, Path, RawTopology, RouterConfig, ServiceConfig, SwitchConfig, Timer,
        TopologyConfig,
    },
    flags::{GenerationFlags, IpVersion, Target},
    graph::TopologyGraph,
};

/// Ports used by the telemetry stack. Entities must not expose them.
pub const TELEMETRY_PORTS: [u16; 5] = [1686, 14268, 4317, 4318, 7123];

/// Smallest MTU allowed by IPv6.
pub const MIN_IPV6_MTU: u32 = 1280;

/// Optional connection fields, besides the impairments.
const CONNECTION_OPTIONAL_FIELDS: [&str; 2] = ["vlan", "timers"];

/// Fields allowed in a firewall rule.
const FIREWALL_RULE_FIELDS: [&str; 8] = [
    "source",
    "sport",
    "destination",
    "dport",
    "protocol",
    "action",
    "extension",
    "custom",
];

lazy_static! {
    static ref RATE: Regex =
        Regex::new(r"^[0-9]+(bit|kbit|mbit|gbit|tbit|bps|kbps|mbps|gbps|tbps)$").unwrap();
    static ref TIME: Regex = Regex::new(r"^[0-9]+(s|ms|us)$").unwrap();
    static ref PERCENT: Regex = Regex::new(r"^([0-9]{1,2}|100)%$").unwrap();
    static ref SECONDS: Regex = Regex::new(r"^[0-9]*(\.[0-9]+)?$").unwrap();
}

/// Validation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Presence of the `type` field and known types
    CommonFields,
    /// Per-type fields, connections, impairments, and timers
    EntityFields,
    /// Reachability and legality of every hop
    Connectivity,
    /// Cycle-freedom of the topology graph
    Cycles,
    /// Uniqueness of exposed ports
    Ports,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::CommonFields => f.write_str("common fields"),
            Phase::EntityFields => f.write_str("entity-specific fields"),
            Phase::Connectivity => f.write_str("connections"),
            Phase::Cycles => f.write_str("no cycles"),
            Phase::Ports => f.write_str("unique ports"),
        }
    }
}

/// A single problem found in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The entity at fault
    pub entity: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

/// The topology is invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "check {phase} failed:\n{}",
    .diagnostics.iter().map(|d| format!("  - {d}")).join("\n")
)]
pub struct ValidationError {
    /// The phase that failed
    pub phase: Phase,
    /// All problems found in that phase
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationError {
    /// Returns `true` if any diagnostic message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.message.contains(needle) || d.entity == needle)
    }
}

/// Collection of diagnostics of a single phase.
#[derive(Debug)]
struct Diagnostics {
    /// The phase being checked
    phase: Phase,
    /// Problems found so far
    found: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Start a new phase.
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            found: Vec::new(),
        }
    }

    /// Report a problem.
    fn push(&mut self, entity: &str, message: impl Into<String>) {
        let message = message.into();
        warn!("{entity}: {message}");
        self.found.push(Diagnostic {
            entity: entity.to_string(),
            message,
        });
    }

    /// Finish the phase, failing if any problem was reported.
    fn finish(self) -> Result<(), ValidationError> {
        if self.found.is_empty() {
            info!("passing check {}", self.phase);
            Ok(())
        } else {
            Err(ValidationError {
                phase: self.phase,
                diagnostics: self.found,
            })
        }
    }
}

/// Validate the raw topology and produce its typed form.
pub fn validate(
    raw: &RawTopology,
    flags: &GenerationFlags,
) -> Result<TopologyConfig, ValidationError> {
    check_common_fields(raw)?;
    let config = parse_entities(raw, flags)?;
    check_connectivity(&config)?;
    check_no_cycles(&config)?;
    check_unique_ports(&config)?;
    Ok(config)
}

/// Phase 1
fn check_common_fields(raw: &RawTopology) -> Result<(), ValidationError> {
    let mut d = Diagnostics::new(Phase::CommonFields);
    for (name, value) in raw.iter() {
        let Some(map) = value.as_mapping() else {
            d.push(name, "entity must be a mapping");
            continue;
        };
        match map.get("type") {
            None => d.push(name, "missing type field"),
            Some(t) => match t.as_str().and_then(EntityType::from_key) {
                Some(_) => {}
                None => d.push(name, format!("unknown type {}", display(t))),
            },
        }
    }
    d.finish()
}

/// Phase 2
fn parse_entities(
    raw: &RawTopology,
    flags: &GenerationFlags,
) -> Result<TopologyConfig, ValidationError> {
    let mut d = Diagnostics::new(Phase::EntityFields);
    let mut entities = Vec::with_capacity(raw.len());
    for (name, value) in raw.iter() {
        let mut p = EntityParser {
            name,
            flags,
            d: &mut d,
        };
        if let Some(entity) = p.entity(value) {
            entities.push(entity);
        }
    }
    d.finish()?;
    Ok(TopologyConfig { entities })
}

/// Parser for the fields of a single entity.
struct EntityParser<'a> {
    /// Name of the entity
    name: &'a str,
    /// Generation flags
    flags: &'a GenerationFlags,
    /// Diagnostics of the phase
    d: &'a mut Diagnostics,
}

impl EntityParser<'_> {
    /// Parse an entity whose type is known to be valid.
    fn entity(&mut self, value: &Value) -> Option<EntityConfig> {
        let map = value.as_mapping()?;
        let ty = map.get("type").and_then(Value::as_str).and_then(EntityType::from_key)?;
        let kind = match ty {
            EntityType::Service => EntityKindConfig::Service(self.service(map)?),
            EntityType::External => EntityKindConfig::External(self.external(map)?),
            EntityType::Router => EntityKindConfig::Router(RouterConfig {
                connections: self.connections(map, ty)?,
            }),
            EntityType::Firewall => EntityKindConfig::Firewall(self.firewall(map)?),
            EntityType::Switch => {
                if self.flags.target() == Target::Kubernetes {
                    self.d.push(self.name, "switches cannot be exported to Kubernetes");
                }
                EntityKindConfig::Switch(SwitchConfig {
                    connections: self.connections(map, ty)?,
                })
            }
        };
        Some(EntityConfig {
            name: self.name.to_string(),
            kind,
        })
    }

    /// Get a mandatory field.
    fn require<'v>(&mut self, map: &'v Mapping, field: &str) -> Option<&'v Value> {
        let value = map.get(field);
        if value.is_none() {
            self.d.push(self.name, format!("missing {field} field"));
        }
        value
    }

    /// Parse a port number.
    fn port(&mut self, value: &Value) -> Option<u16> {
        let port = value.as_u64().and_then(|p| u16::try_from(p).ok());
        if port.is_none() {
            self.d.push(
                self.name,
                format!("port {} is not an integer between 0 and 65535", display(value)),
            );
        }
        port
    }

    /// Parse the optional `expose` field.
    fn expose(&mut self, map: &Mapping) -> Option<bool> {
        match map.get("expose") {
            None => Some(true),
            Some(Value::Bool(b)) => Some(*b),
            Some(v) => {
                self.d.push(self.name, format!("expose {} is not a boolean", display(v)));
                None
            }
        }
    }

    /// Parse a service.
    fn service(&mut self, map: &Mapping) -> Option<ServiceConfig> {
        let port = self.require(map, "port");
        let endpoints = self.require(map, "endpoints");
        let port = port.and_then(|p| self.port(p));
        let expose = self.expose(map);
        let endpoints = endpoints.and_then(|e| self.endpoints(e));
        Some(ServiceConfig {
            port: port?,
            expose: expose?,
            endpoints: endpoints?,
        })
    }

    /// Parse the endpoints of a service.
    fn endpoints(&mut self, value: &Value) -> Option<Vec<EndpointConfig>> {
        let Some(seq) = value.as_sequence() else {
            self.d.push(self.name, "endpoints must be a list");
            return None;
        };
        let mut endpoints = Vec::new();
        let mut ok = true;
        for ep in seq {
            let Some(map) = ep.as_mapping() else {
                self.d.push(self.name, format!("endpoint {} must be a mapping", display(ep)));
                ok = false;
                continue;
            };
            let entrypoint = self.require(map, "entrypoint").and_then(|e| {
                let s = scalar(e);
                if s.is_none() {
                    self.d.push(self.name, "entrypoint must be a string");
                }
                s
            });
            let psize = self.require(map, "psize").and_then(|p| {
                let s = p.as_u64();
                if s.is_none() {
                    self.d.push(self.name, format!("psize {} is not an integer", display(p)));
                }
                s
            });
            let connections = self.connections(map, EntityType::Service);
            match (entrypoint, psize, connections) {
                (Some(entrypoint), Some(psize), Some(connections)) => {
                    endpoints.push(EndpointConfig {
                        entrypoint,
                        psize,
                        connections,
                    })
                }
                _ => ok = false,
            }
        }
        ok.then_some(endpoints)
    }

    /// Parse an external container.
    fn external(&mut self, map: &Mapping) -> Option<ExternalConfig> {
        let image = self.require(map, "image");
        let ports = self.require(map, "ports");
        self.require(map, "connections");
        let image = image.and_then(|i| {
            let s = scalar(i);
            if s.is_none() {
                self.d.push(self.name, "image must be a string");
            }
            s
        });
        let ports = ports.and_then(|p| match p.as_sequence() {
            Some(seq) => {
                let ports = seq.iter().map(|p| self.port(p)).collect_vec();
                ports.into_iter().collect::<Option<Vec<_>>>()
            }
            None => {
                self.d.push(self.name, "ports must be a list");
                None
            }
        });
        let expose = self.expose(map);
        let connections = self.connections(map, EntityType::External);
        Some(ExternalConfig {
            image: image?,
            ports: ports?,
            expose: expose?,
            connections: connections?,
        })
    }

    /// Parse a firewall.
    fn firewall(&mut self, map: &Mapping) -> Option<FirewallConfig> {
        let default = self.require(map, "default");
        let rules = self.require(map, "rules");
        self.require(map, "connections");
        let policy = default.and_then(|p| {
            match p.as_str().map(str::to_lowercase).as_deref() {
                Some("accept") => Some(FirewallPolicy::Accept),
                Some("drop") => Some(FirewallPolicy::Drop),
                _ => {
                    self.d.push(
                        self.name,
                        format!("default policy {} must be \"accept\" or \"drop\"", display(p)),
                    );
                    None
                }
            }
        });
        let rules = rules.and_then(|r| self.rules(r));
        let connections = self.connections(map, EntityType::Firewall);
        Some(FirewallConfig {
            policy: policy?,
            rules: rules?,
            connections: connections?,
        })
    }

    /// Parse the rules of a firewall.
    fn rules(&mut self, value: &Value) -> Option<Vec<FirewallRule>> {
        if value.is_null() {
            return Some(Vec::new());
        }
        let Some(seq) = value.as_sequence() else {
            self.d.push(self.name, "rules must be a list");
            return None;
        };
        let mut rules = Vec::new();
        let mut ok = true;
        for rule in seq {
            let Some(map) = rule.as_mapping() else {
                self.d.push(self.name, format!("rule {} must be a mapping", display(rule)));
                ok = false;
                continue;
            };
            let before = self.d.found.len();
            self.unexpected(map, &FIREWALL_RULE_FIELDS, "rule");
            let field = |f: &str| map.get(f).and_then(scalar);
            let parsed = if let Some(custom) = field("custom") {
                if map.len() != 1 {
                    self.d.push(
                        self.name,
                        format!("custom rule {custom:?} cannot have other fields"),
                    );
                }
                FirewallRule::Custom(custom)
            } else {
                FirewallRule::Match {
                    source: field("source"),
                    sport: field("sport"),
                    destination: field("destination"),
                    dport: field("dport"),
                    protocol: field("protocol"),
                    action: field("action"),
                    extension: field("extension"),
                }
            };
            if self.d.found.len() == before {
                rules.push(parsed);
            } else {
                ok = false;
            }
        }
        ok.then_some(rules)
    }

    /// Report all keys of `map` that are not in `allowed`.
    fn unexpected(&mut self, map: &Mapping, allowed: &[&str], what: &str) {
        for key in map.keys() {
            let known = key.as_str().map(|k| allowed.contains(&k)).unwrap_or(false);
            if !known {
                self.d
                    .push(self.name, format!("unexpected field {} in {what}", display(key)));
            }
        }
    }

    /// Parse the `connections` field of `map`. A missing or null field means no connections.
    fn connections(&mut self, map: &Mapping, ty: EntityType) -> Option<Vec<ConnectionConfig>> {
        let value = match map.get("connections") {
            None | Some(Value::Null) => return Some(Vec::new()),
            Some(v) => v,
        };
        let Some(seq) = value.as_sequence() else {
            self.d.push(self.name, "connections must be a list");
            return None;
        };
        let conns = seq.iter().map(|c| self.connection(c, ty)).collect_vec();
        conns.into_iter().collect()
    }

    /// Parse a single connection.
    fn connection(&mut self, value: &Value, ty: EntityType) -> Option<ConnectionConfig> {
        let Some(map) = value.as_mapping() else {
            self.d.push(self.name, format!("connection {} must be a mapping", display(value)));
            return None;
        };
        let before = self.d.found.len();

        let mut mandatory = vec!["path"];
        if ty == EntityType::Service {
            mandatory.push("url");
        }
        let mut allowed = mandatory.clone();
        allowed.push("vlan");
        if ty != EntityType::Switch {
            allowed.extend(CONNECTION_OPTIONAL_FIELDS);
            allowed.extend(Impairment::ALL.iter().map(Impairment::key));
        }
        for field in &mandatory {
            if !map.contains_key(*field) {
                self.d
                    .push(self.name, format!("missing field {field} for connection {}", display(value)));
            }
        }
        self.unexpected(map, &allowed, "connection");

        let path = map.get("path").and_then(|p| match p.as_str() {
            Some(s) if !s.trim().is_empty() && !s.split("->").any(|h| h.trim().is_empty()) => {
                Some(Path::parse(s))
            }
            _ => {
                self.d.push(self.name, format!("path {} is not a valid path", display(p)));
                None
            }
        });
        let url = map.get("url").and_then(scalar);
        let vlan = map.get("vlan").and_then(|v| {
            let vlan = v.as_u64().and_then(|v| u16::try_from(v).ok()).filter(|v| *v < 4096);
            if vlan.is_none() {
                self.d.push(self.name, format!("vlan {} is not a valid VLAN id", display(v)));
            }
            vlan
        });
        let impairments = self.impairments(map, value);
        let timers = map
            .get("timers")
            .map(|t| self.timers(t, &impairments, value))
            .unwrap_or_default();

        (self.d.found.len() == before).then(|| ConnectionConfig {
            path: path.unwrap_or_else(|| Path::new(Vec::new())),
            url,
            vlan,
            impairments,
            timers,
        })
    }

    /// Parse the impairments of a connection.
    fn impairments(&mut self, map: &Mapping, conn: &Value) -> Impairments {
        let mut imp = Impairments::default();
        for i in Impairment::ALL {
            let Some(value) = map.get(i.key()) else {
                continue;
            };
            match impairment_value(i, value, self.flags) {
                Ok(v) => imp = imp.with(i, &v),
                Err(e) => self
                    .d
                    .push(self.name, format!("{e} in connection {}", display(conn))),
            }
        }
        if imp.netem.jitter.is_some() && imp.netem.delay.is_none() {
            self.d.push(
                self.name,
                format!("jitter requires delay to be set in connection {}", display(conn)),
            );
        }
        imp
    }

    /// Parse the timers of a connection.
    fn timers(&mut self, value: &Value, imp: &Impairments, conn: &Value) -> Vec<Timer> {
        if value.is_null() {
            return Vec::new();
        }
        let Some(seq) = value.as_sequence() else {
            self.d.push(self.name, "timers must be a list");
            return Vec::new();
        };
        let mut timers = Vec::new();
        for timer in seq {
            let Some(map) = timer.as_mapping() else {
                self.d.push(self.name, format!("timer {} must be a mapping", display(timer)));
                continue;
            };
            for field in ["option", "start", "newValue"] {
                if !map.contains_key(field) {
                    self.d.push(
                        self.name,
                        format!("missing field {field} for timer {} of connection {}", display(timer), display(conn)),
                    );
                }
            }
            self.unexpected(map, &["option", "start", "newValue", "duration"], "timer");

            let option = map.get("option").and_then(|o| {
                match o.as_str().map(str::parse::<Impairment>) {
                    Some(Ok(i)) if imp.has(i) => Some(i),
                    Some(Ok(i)) => {
                        self.d.push(
                            self.name,
                            format!("timer changes {i}, which is not set on connection {}", display(conn)),
                        );
                        None
                    }
                    _ => {
                        self.d.push(self.name, format!("timer option {} is not an impairment", display(o)));
                        None
                    }
                }
            });
            let start = map.get("start").and_then(|s| self.seconds(s, "start"));
            let duration = match map.get("duration") {
                None => Ok(None),
                Some(s) => self.seconds(s, "duration").map(Some).ok_or(()),
            };
            let new_value = match (option, map.get("newValue")) {
                (Some(i), Some(v)) => match impairment_value(i, v, self.flags) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        self.d.push(self.name, format!("timer {}: {e}", display(timer)));
                        None
                    }
                },
                _ => None,
            };
            if let (Some(option), Some(start), Some(new_value), Ok(duration)) =
                (option, start, new_value, duration)
            {
                timers.push(Timer {
                    option,
                    start,
                    new_value,
                    duration,
                });
            }
        }
        timers
    }

    /// Parse a non-negative amount of seconds.
    fn seconds(&mut self, value: &Value, what: &str) -> Option<Seconds> {
        let secs = match value {
            Value::Number(n) => n.as_f64().filter(|x| x.is_finite() && *x >= 0.0),
            Value::String(s) if !s.is_empty() && SECONDS.is_match(s) => s.parse().ok(),
            _ => None,
        };
        if secs.is_none() {
            self.d.push(
                self.name,
                format!("timer {what} {} must be a non-negative amount of seconds", display(value)),
            );
        }
        secs.map(Seconds)
    }
}

/// Check and parse the value of an impairment.
fn impairment_value(
    impairment: Impairment,
    value: &Value,
    flags: &GenerationFlags,
) -> Result<ImpairmentValue, String> {
    let text = || value.as_str().map(String::from);
    match impairment {
        Impairment::Mtu => {
            let mtu = value
                .as_u64()
                .and_then(|x| u32::try_from(x).ok())
                .ok_or_else(|| format!("mtu {} must be an integer", display(value)))?;
            if flags.ip_version() == IpVersion::V6 && mtu < MIN_IPV6_MTU {
                return Err(format!("mtu {mtu} must be at least {MIN_IPV6_MTU} for IPv6"));
            }
            Ok(ImpairmentValue::Integer(mtu))
        }
        Impairment::BufferSize => value
            .as_u64()
            .and_then(|x| u32::try_from(x).ok())
            .map(ImpairmentValue::Integer)
            .ok_or_else(|| format!("buffer_size {} must be an integer", display(value))),
        Impairment::Rate => text()
            .filter(|s| RATE.is_match(s))
            .map(ImpairmentValue::Text)
            .ok_or_else(|| format!("rate {} must be a rate", display(value))),
        Impairment::Delay | Impairment::Jitter => text()
            .filter(|s| TIME.is_match(s))
            .map(ImpairmentValue::Text)
            .ok_or_else(|| format!("{impairment} {} must be a time", display(value))),
        Impairment::Loss | Impairment::Corrupt | Impairment::Duplicate | Impairment::Reorder => {
            text()
                .filter(|s| PERCENT.is_match(s))
                .map(ImpairmentValue::Text)
                .ok_or_else(|| {
                    format!(
                        "{impairment} {} must be a percentage between 0% and 100%",
                        display(value)
                    )
                })
        }
    }
}

/// Phase 3
fn check_connectivity(config: &TopologyConfig) -> Result<(), ValidationError> {
    let mut d = Diagnostics::new(Phase::Connectivity);
    for entity in &config.entities {
        let ty = entity.entity_type();
        for conn in entity.connections() {
            let path = &conn.path;
            if path.is_direct() {
                match config.entity_type(path.first()) {
                    None => d.push(
                        &entity.name,
                        format!("connection {path} is to an entity that does not exist"),
                    ),
                    Some(dest) if ty.is_end_host() && !dest.is_end_host() => d.push(
                        &entity.name,
                        format!("destination of connection {path} is not an end host"),
                    ),
                    _ => {}
                }
                continue;
            }
            check_path(config, &entity.name, path, &mut d);
        }
    }
    d.finish()
}

/// Check a single multi-hop path of `owner`.
fn check_path(config: &TopologyConfig, owner: &str, path: &Path, d: &mut Diagnostics) {
    let hops = path.hops();
    for (i, hop) in hops.iter().enumerate() {
        let Some(hop_cfg) = config.get(hop) else {
            d.push(owner, format!("hop {hop} of connection {path} does not exist"));
            return;
        };
        let Some(next) = hops.get(i + 1) else {
            if !hop_cfg.entity_type().is_end_host() {
                d.push(owner, format!("last hop {hop} in path {path} must be an end host"));
            }
            continue;
        };
        if !hop_cfg.entity_type().is_intermediary() {
            d.push(
                owner,
                format!("intermediary hop {hop} of connection {path} is not an intermediary node"),
            );
            continue;
        }
        let named = hop_cfg.connections().iter().map(|c| c.path.first()).collect_vec();
        if !named.contains(&next.as_str()) {
            d.push(
                owner,
                format!(
                    "intermediary hop {hop} of connection {path} should specify {next} (has {})",
                    named.join(", ")
                ),
            );
        }
    }
}

/// Phase 4
fn check_no_cycles(config: &TopologyConfig) -> Result<(), ValidationError> {
    let mut d = Diagnostics::new(Phase::Cycles);
    if let Some(entity) = TopologyGraph::build(config).find_cycle() {
        d.push(entity, "cannot have cycles in the architecture");
    }
    d.finish()
}

/// Phase 5
fn check_unique_ports(config: &TopologyConfig) -> Result<(), ValidationError> {
    let mut d = Diagnostics::new(Phase::Ports);
    let mut used: HashMap<u16, &str> = HashMap::new();
    for entity in &config.entities {
        for port in entity.exposed_ports() {
            if TELEMETRY_PORTS.contains(&port) {
                d.push(
                    &entity.name,
                    format!("port {port} is used for telemetry, do not use it"),
                );
            } else if let Some(other) = used.get(&port) {
                d.push(
                    &entity.name,
                    format!("port {port} is already used by {other}, cannot assign it to {}", entity.name),
                );
            } else {
                used.insert(port, &entity.name);
            }
        }
    }
    d.finish()
}

/// Convert a scalar to a string.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a value compactly for diagnostics.
fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{s:?}"),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().replace('\n', ", "))
            .unwrap_or_else(|_| "?".to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grammars() {
        assert!(RATE.is_match("10mbit"));
        assert!(RATE.is_match("1gbps"));
        assert!(!RATE.is_match("10 mbit"));
        assert!(!RATE.is_match("mbit"));
        assert!(TIME.is_match("50ms"));
        assert!(TIME.is_match("1s"));
        assert!(!TIME.is_match("1.5s"));
        assert!(PERCENT.is_match("0%"));
        assert!(PERCENT.is_match("100%"));
        assert!(!PERCENT.is_match("101%"));
        assert!(!PERCENT.is_match("5"));
        assert!(SECONDS.is_match("2.5"));
        assert!(SECONDS.is_match(".5"));
        assert!(!SECONDS.is_match("-1"));
        assert!(!SECONDS.is_match("1."));
    }

    #[test]
    fn ipv6_mtu() {
        let v4 = GenerationFlags::builder().build().unwrap();
        let v6 = GenerationFlags::builder()
            .ip_version(IpVersion::V6)
            .build()
            .unwrap();
        let small = Value::from(1000);
        assert_eq!(
            impairment_value(Impairment::Mtu, &small, &v4),
            Ok(ImpairmentValue::Integer(1000))
        );
        assert!(impairment_value(Impairment::Mtu, &small, &v6).is_err());
        assert!(impairment_value(Impairment::Mtu, &Value::from("1500"), &v4).is_err());
    }
}
