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

//! Test timed changes of impairments.

use pretty_assertions::assert_eq;
use shell_command::{Impairment, ShellCommand};
use test_log::test;

use super::{build, commands, compose_v4};
use crate::{error::ResolutionError, Error};

/// Topology with a delay timer (with duration) and an MTU timer (without duration).
const TIMERS: &str = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: r1->b
          url: /
          mtu: 1400
          delay: 50ms
          timers:
            - option: delay
              start: 5
              newValue: 100ms
              duration: 10
            - option: mtu
              start: 2.5
              newValue: 1300
r1:
  type: router
  connections:
    - path: b
b:
  type: service
  port: 8081
  endpoints:
    - entrypoint: /
      psize: 64
"#;

#[test]
fn timer_commands() {
    let arch = build(TIMERS, compose_v4()).unwrap();
    assert_eq!(
        commands(&arch, "a"),
        vec![
            "/sbin/ip r a 0.0.12.0/22 via 0.0.8.3",
            "/sbin/ip link set dev eth0_a mtu 1400",
            "tc qdisc add dev eth0_a root netem delay 50ms",
            "sleep 5 && tc qdisc del dev eth0_a root && tc qdisc add dev eth0_a root netem delay 100ms",
            "sleep 15 && tc qdisc del dev eth0_a root && tc qdisc add dev eth0_a root netem delay 50ms",
            "sleep 2.5 && /sbin/ip link set dev eth0_a mtu 1300",
        ]
    );
}

#[test]
fn timer_completeness() {
    let arch = build(TIMERS, compose_v4()).unwrap();
    let a = arch.entity("a").unwrap();
    let scheduled: Vec<(f64, &Vec<ShellCommand>)> = a
        .commands
        .iter()
        .filter_map(|c| match c {
            ShellCommand::Delayed { after, steps } => Some((after.0, steps)),
            _ => None,
        })
        .collect();

    // the delay timer has a duration and yields two commands, the mtu timer only one.
    assert_eq!(scheduled.len(), 3);
    let netem: Vec<_> = scheduled
        .iter()
        .filter(|(_, steps)| steps.iter().any(|s| s.shapes(Impairment::Delay, "eth0_a")))
        .collect();
    assert_eq!(netem.len(), 2);
    assert_eq!(netem[0].0, 5.0);
    assert_eq!(netem[1].0, 15.0);

    // the restoration reproduces the original netem command
    let original = a
        .commands
        .iter()
        .find(|c| matches!(c, ShellCommand::AddNetem { .. }))
        .unwrap();
    assert_eq!(netem[1].1.last(), Some(original));
    assert_ne!(netem[0].1.last(), Some(original));
}

#[test]
fn ambiguous_timer_target() {
    let yaml = r#"
a:
  type: service
  port: 8080
  endpoints:
    - entrypoint: /
      psize: 64
      connections:
        - path: r1->b
          url: /
          delay: 10ms
          timers:
            - option: delay
              start: 1
              newValue: 20ms
        - path: r1->c
          url: /
          delay: 30ms
r1:
  type: router
  connections:
    - path: b
    - path: c
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
"#;
    match build(yaml, compose_v4()) {
        Err(Error::Resolution(ResolutionError::AmbiguousTimerTarget {
            entity,
            impairment,
            interface,
            matches,
        })) => {
            assert_eq!(entity, "a");
            assert_eq!(impairment, Impairment::Delay);
            assert_eq!(interface, "eth0_a");
            assert_eq!(matches, 2);
        }
        x => panic!("expected an ambiguous timer, got {x:?}"),
    }
}

#[test]
fn jitter_timer_keeps_delay() {
    let yaml = TIMERS.replace(
        "          delay: 50ms\n",
        "          delay: 50ms\n          jitter: 5ms\n",
    );
    let yaml = yaml.replace("option: delay", "option: jitter").replace("100ms", "20ms");
    let arch = build(&yaml, compose_v4()).unwrap();
    let cmds = commands(&arch, "a");
    assert_eq!(
        cmds[3],
        "sleep 5 && tc qdisc del dev eth0_a root && tc qdisc add dev eth0_a root netem delay 50ms 20ms"
    );
    assert_eq!(
        cmds[4],
        "sleep 15 && tc qdisc del dev eth0_a root && tc qdisc add dev eth0_a root netem delay 50ms 5ms"
    );
}
