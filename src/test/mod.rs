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

//! End-to-end tests of the compiler on small topologies.

use crate::{
    flags::{IpVersion, Target, Tracing},
    Architecture, Error, GenerationFlags, RawTopology,
};

mod scenarios;
mod timers;

/// Service `a` reaches service `b` through router `r1`, with netem impairments on the first hop.
const THREE_HOPS: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: r1->b
          url: /api
          delay: 50ms
          jitter: 10ms
          loss: 1%
r1:
  type: router
  connections:
    - path: b
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /api
      psize: 128
"#;

/// Service `a` reaches service `b` through two chained switches.
const SWITCH_CHAIN: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw1->sw2->b
          url: /
sw1:
  type: switch
  connections:
    - path: a
      vlan: 10
    - path: sw2
sw2:
  type: switch
  connections:
    - path: sw1
    - path: b
      vlan: 10
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /
      psize: 64
"#;

/// Service `a` reaches service `b` through firewall `fw`.
const FIREWALL: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: fw->b
          url: /
          rate: 10mbit
fw:
  type: firewall
  default: drop
  rules:
    - source: a
      destination: b
      dport: 8081
      protocol: tcp
      action: accept
    - custom: iptables -A FORWARD -j LOG
  connections:
    - path: b
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /
      psize: 64
"#;

/// Service `a` connects directly to the external container `db`.
const DIRECT: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: db
          url: /
db:
  type: external
  image: postgres
  ports: [5432]
  expose: false
  connections: []
"#;

/// Compile a topology.
fn build(yaml: &str, flags: GenerationFlags) -> Result<Architecture, Error> {
    let raw = RawTopology::from_yaml(yaml)?;
    Architecture::build(&raw, flags)
}

/// Build consistent flags.
fn flags(ip_version: IpVersion, target: Target, tracing: Tracing) -> GenerationFlags {
    GenerationFlags::builder()
        .ip_version(ip_version)
        .target(target)
        .tracing(tracing)
        .build()
        .unwrap()
}

/// IPv4 on the compose target without tracing.
fn compose_v4() -> GenerationFlags {
    flags(IpVersion::V4, Target::Compose, Tracing::Off)
}

/// Rendered commands of an entity.
fn commands(arch: &Architecture, entity: &str) -> Vec<String> {
    arch.entity(entity)
        .unwrap()
        .commands
        .iter()
        .map(ToString::to_string)
        .collect()
}
