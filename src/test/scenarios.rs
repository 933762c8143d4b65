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

//! Test the compiler on the three reference scenarios, and on firewalls and direct connections.

use std::net::IpAddr;

use ipnet::IpNet;
use maplit::btreeset;
use pretty_assertions::assert_eq;
use shell_command::{IoamTraceType, Netem, NextHop, RouteDestination, ShellCommand};
use test_log::test;

use super::{build, commands, compose_v4, flags, DIRECT, FIREWALL, SWITCH_CHAIN, THREE_HOPS};
use crate::{
    entity::HostAlias,
    flags::{IpVersion, Target, Tracing},
    network::NetworkKind,
    validator::Phase,
    Error,
};

/// Parse an address.
fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Parse a subnet.
fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

#[test]
fn three_hops_ipv6_ioam() {
    let arch = build(THREE_HOPS, flags(IpVersion::V6, Target::Compose, Tracing::Ioam)).unwrap();

    assert_eq!(
        arch.networks().iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
        vec!["network_a_r1", "network_r1_b"]
    );
    let near = net("0:0:0:2::/64");
    let far = net("0:0:0:3::/64");
    assert_eq!(arch.networks()[0].subnet, near);
    assert_eq!(arch.networks()[1].subnet, far);
    assert_eq!(arch.networks()[0].gateway, Some(ip("0:0:0:2::1")));

    let a = arch.entity("a").unwrap();
    assert_eq!(
        a.commands,
        vec![
            ShellCommand::IoamRoute {
                destination: RouteDestination::Subnet(far),
                trace_type: IoamTraceType::default(),
                size: 12,
                next_hop: NextHop::Via(ip("0:0:0:2::3")),
            },
            ShellCommand::AddNetem {
                dev: "eth0_a".to_string(),
                netem: Netem {
                    delay: Some("50ms".to_string()),
                    jitter: Some("10ms".to_string()),
                    loss: Some("1%".to_string()),
                    ..Default::default()
                },
            },
        ]
    );
    assert_eq!(
        commands(&arch, "a"),
        vec![
            format!(
                "/sbin/ip -6 r a {far} encap ioam6 trace prealloc type 0x800000 ns 123 size 12 via {}",
                ip("0:0:0:2::3")
            ),
            "tc qdisc add dev eth0_a root netem delay 50ms 10ms loss 1%".to_string(),
        ]
    );

    let r1 = arch.entity("r1").unwrap();
    assert_eq!(
        r1.commands,
        vec![
            ShellCommand::Route {
                destination: far,
                via: ip("0:0:0:3::3"),
            },
            ShellCommand::Route {
                destination: near,
                via: ip("0:0:0:2::2"),
            },
            ShellCommand::SetInterfaces,
            ShellCommand::IoamNamespace,
            ShellCommand::DeleteDefaultRoute(IpVersion::V4),
            ShellCommand::DeleteDefaultRoute(IpVersion::V6),
            ShellCommand::Idle,
        ]
    );

    let b = arch.entity("b").unwrap();
    assert_eq!(
        b.commands,
        vec![ShellCommand::Route {
            destination: near,
            via: ip("0:0:0:3::2"),
        }]
    );
}

#[test]
fn three_hops_entities() {
    let arch = build(THREE_HOPS, compose_v4()).unwrap();
    let a = arch.entity("a").unwrap();
    let r1 = arch.entity("r1").unwrap();
    let b = arch.entity("b").unwrap();

    assert_eq!((a.trace_id, r1.trace_id, b.trace_id), (1, 2, 3));
    assert_eq!(a.depends_on, btreeset! {"r1".to_string(), "b".to_string()});
    assert_eq!(r1.depends_on, btreeset! {"b".to_string()});
    assert!(b.depends_on.is_empty());

    assert_eq!(
        a.extra_hosts,
        vec![HostAlias {
            name: "b".to_string(),
            ip: ip("0.0.12.3")
        }]
    );
    assert_eq!(
        b.extra_hosts,
        vec![HostAlias {
            name: "a".to_string(),
            ip: ip("0.0.8.2")
        }]
    );

    assert_eq!(
        r1.interfaces.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
        vec!["eth0_r1", "eth1_r1"]
    );
    assert_eq!(r1.ip_on("network_r1_b"), Some(ip("0.0.12.2")));
    assert_eq!(arch.interface_id("r1", "b"), Ok(1));
    assert_eq!(arch.interface_id("r1", "a"), Ok(0));

    // IPv4 never carries IOAM traces
    assert_eq!(
        commands(&arch, "a")[0],
        "/sbin/ip r a 0.0.12.0/22 via 0.0.8.3".to_string()
    );
}

#[test]
fn duplicate_port_names_both_entities() {
    let yaml = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 1
b:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 1
"#;
    match build(yaml, compose_v4()) {
        Err(Error::Validation(e)) => {
            assert_eq!(e.phase, Phase::Ports);
            assert_eq!(e.diagnostics.len(), 1);
            assert_eq!(
                e.diagnostics[0].message,
                "port 8080 is already used by a, cannot assign it to b"
            );
        }
        x => panic!("expected a validation error, got {x:?}"),
    }
}

#[test]
fn unexposed_ports_may_repeat() {
    let yaml = r#"
a:
  type: service
  port: 8080
  expose: false
  endpoints:
    - entrypoint: /
      psize: 1
b:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 1
"#;
    assert!(build(yaml, compose_v4()).is_ok());
}

#[test]
fn switch_chain_is_one_l2_network() {
    let arch = build(SWITCH_CHAIN, compose_v4()).unwrap();

    assert_eq!(arch.networks().len(), 1);
    let l2 = &arch.networks()[0];
    assert_eq!(l2.name, "network_switch_sw1");
    assert_eq!(l2.kind, NetworkKind::L2);
    assert_eq!(
        l2.interfaces.iter().map(|i| i.entity.as_str()).collect::<Vec<_>>(),
        vec!["a", "sw1", "sw2", "b"]
    );
    assert_eq!(
        l2.interfaces.iter().map(|i| i.ip).collect::<Vec<_>>(),
        vec![Some(ip("0.0.8.2")), None, None, Some(ip("0.0.8.3"))]
    );
    assert_eq!(
        l2.interfaces.iter().map(|i| i.mac.to_string()).collect::<Vec<_>>(),
        vec![
            "00:00:00:00:02:01",
            "00:00:00:00:02:02",
            "00:00:00:00:02:03",
            "00:00:00:00:02:04"
        ]
    );
    assert_eq!(l2.interface("a").unwrap().vlan, Some(10));
    assert_eq!(l2.interface("b").unwrap().vlan, Some(10));

    assert_eq!(
        commands(&arch, "a"),
        vec!["/sbin/ip r a 0.0.8.0/22 via 0.0.8.3"]
    );
    assert_eq!(
        commands(&arch, "b"),
        vec!["/sbin/ip r a 0.0.8.0/22 via 0.0.8.2"]
    );
    assert_eq!(
        commands(&arch, "sw1"),
        vec![
            "service openvswitch-switch start",
            "ovs-vsctl add-br sw1",
            "ovs-vsctl add-port sw1 a_sw1 tag=10",
            "ovs-vsctl add-port sw1 sw2_sw1",
            "tail -f /dev/null",
        ]
    );
    assert!(arch.entity("sw1").unwrap().depends_on.is_empty());
    assert_eq!(arch.interface_id("sw2", "b"), Ok(0));
}

#[test]
fn switch_network_is_reused() {
    let yaml = format!(
        "{SWITCH_CHAIN}{}",
        r#"
c:
  type: service
  port: 8082
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw2->b
          url: /
"#
    );
    let arch = build(&yaml, compose_v4()).unwrap();
    assert_eq!(arch.networks().len(), 1);
    let l2 = &arch.networks()[0];
    assert_eq!(
        l2.interfaces.iter().map(|i| i.entity.as_str()).collect::<Vec<_>>(),
        vec!["a", "sw1", "sw2", "b", "c"]
    );
    assert_eq!(l2.ip_of("c"), Some(ip("0.0.8.4")));
}

/// Two separate switch segments that a third path chains together.
const JOINED_SEGMENTS: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw1->b
          url: /
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /
      psize: 64
c:
  type: service
  port: 8082
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw2->d
          url: /
d:
  type: service
  port: 8083
  endpoints:
    - entrypoint: /
      psize: 64
e:
  type: service
  port: 8084
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw2->sw1->f
          url: /
f:
  type: service
  port: 8085
  endpoints:
    - entrypoint: /
      psize: 64
sw1:
  type: switch
  connections:
    - path: b
    - path: f
sw2:
  type: switch
  connections:
    - path: d
    - path: sw1
"#;

#[test]
fn chained_segments_are_bridged_together() {
    let arch = build(JOINED_SEGMENTS, compose_v4()).unwrap();

    assert_eq!(arch.networks().len(), 1);
    let l2 = &arch.networks()[0];
    assert_eq!(l2.name, "network_switch_sw1");
    assert_eq!(
        l2.interfaces.iter().map(|i| i.entity.as_str()).collect::<Vec<_>>(),
        vec!["a", "sw1", "b", "c", "sw2", "d", "e", "f"]
    );
    let adjacent = [
        ("a", "sw1"),
        ("sw1", "b"),
        ("c", "sw2"),
        ("e", "sw2"),
        ("sw2", "sw1"),
        ("sw1", "f"),
    ];
    for (x, y) in adjacent {
        assert_eq!(arch.shared_network(x, y).unwrap(), l2, "{x} -> {y}");
    }

    assert_eq!(commands(&arch, "e"), vec!["/sbin/ip r a 0.0.8.0/22 via 0.0.8.7"]);
    assert_eq!(commands(&arch, "f"), vec!["/sbin/ip r a 0.0.8.0/22 via 0.0.8.6"]);
    assert_eq!(
        commands(&arch, "sw1"),
        vec![
            "service openvswitch-switch start",
            "ovs-vsctl add-br sw1",
            "ovs-vsctl add-port sw1 a_sw1",
            "ovs-vsctl add-port sw1 b_sw1",
            "ovs-vsctl add-port sw1 sw2_sw1",
            "ovs-vsctl add-port sw1 f_sw1",
            "tail -f /dev/null",
        ]
    );
    assert_eq!(
        &commands(&arch, "sw2")[2..6],
        &[
            "ovs-vsctl add-port sw2 c_sw2",
            "ovs-vsctl add-port sw2 d_sw2",
            "ovs-vsctl add-port sw2 e_sw2",
            "ovs-vsctl add-port sw2 sw1_sw2",
        ]
    );
}

#[test]
fn switch_bridges_unlisted_upstream() {
    let yaml = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: sw1->b
          url: /
sw1:
  type: switch
  connections:
    - path: b
      vlan: 20
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /
      psize: 64
"#;
    let arch = build(yaml, compose_v4()).unwrap();
    assert_eq!(
        commands(&arch, "sw1"),
        vec![
            "service openvswitch-switch start",
            "ovs-vsctl add-br sw1",
            "ovs-vsctl add-port sw1 a_sw1",
            "ovs-vsctl add-port sw1 b_sw1 tag=20",
            "tail -f /dev/null",
        ]
    );
}

#[test]
fn firewall() {
    let arch = build(FIREWALL, compose_v4()).unwrap();
    let fw = arch.entity("fw").unwrap();

    assert_eq!(
        commands(&arch, "fw"),
        vec![
            "/sbin/ip r a 0.0.12.0/22 via 0.0.12.3",
            "/sbin/ip r a 0.0.8.0/22 via 0.0.8.2",
            "iptables -P FORWARD DROP",
            "iptables -A FORWARD -p tcp -s a -d b --dport 8081 -j ACCEPT",
            "iptables -A FORWARD -j LOG",
            "ip r d default",
            "ip -6 r d default",
            "tail -f /dev/null",
        ]
    );
    assert_eq!(
        fw.traversals,
        vec![vec!["a".to_string(), "fw".to_string(), "b".to_string()]]
    );
    assert_eq!(
        fw.extra_hosts,
        vec![HostAlias {
            name: "a".to_string(),
            ip: ip("0.0.8.2")
        }]
    );
    assert_eq!(
        commands(&arch, "a")[1],
        "tc qdisc add dev eth0_a root netem rate 10mbit"
    );
}

#[test]
fn firewall_ipv6_uses_ip6tables() {
    let arch = build(FIREWALL, flags(IpVersion::V6, Target::Compose, Tracing::Off)).unwrap();
    let cmds = commands(&arch, "fw");
    assert!(cmds.contains(&"ip6tables -P FORWARD DROP".to_string()));
    assert!(cmds.contains(&"ip6tables -A FORWARD -p tcp -s a -d b --dport 8081 -j ACCEPT".to_string()));
}

#[test]
fn direct_connection() {
    let arch = build(DIRECT, compose_v4()).unwrap();
    assert_eq!(arch.networks().len(), 1);
    assert_eq!(arch.networks()[0].name, "network_a_db");
    // without tracing, direct connections need no routes
    assert!(arch.entity("a").unwrap().commands.is_empty());
    assert_eq!(
        arch.entity("a").unwrap().extra_hosts,
        vec![HostAlias {
            name: "db".to_string(),
            ip: ip("0.0.8.3")
        }]
    );
    assert_eq!(
        arch.entity("db").unwrap().extra_hosts,
        vec![HostAlias {
            name: "a".to_string(),
            ip: ip("0.0.8.2")
        }]
    );
}

#[test]
fn direct_connection_ioam() {
    let arch = build(DIRECT, flags(IpVersion::V6, Target::Compose, Tracing::Ioam)).unwrap();
    let db = ip("0:0:0:2::3");
    assert_eq!(
        arch.entity("a").unwrap().commands,
        vec![ShellCommand::IoamRoute {
            destination: RouteDestination::Host(db),
            trace_type: IoamTraceType::default(),
            size: 8,
            next_hop: NextHop::Dev("eth0_a".to_string()),
        }]
    );
    assert_eq!(
        commands(&arch, "a"),
        vec![format!(
            "/sbin/ip -6 r a {db} encap ioam6 trace prealloc type 0x800000 ns 123 size 8 dev eth0_a"
        )]
    );
}
