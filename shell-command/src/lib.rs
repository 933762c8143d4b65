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

//! This library contains the vocabulary of shell commands emitted by `topoplan`. Every command is
//! a typed value that renders (through [`std::fmt::Display`]) to a string that is directly
//! executable inside the runtime shell of the entity it was generated for.
//!
//! Keeping commands typed (instead of plain strings) allows later stages to find the command that
//! shapes a given impairment on a given interface without matching on substrings.

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms
)]

use std::{
    fmt::{self, Display},
    net::IpAddr,
    ops::Add,
    str::FromStr,
};

use ipnet::IpNet;
use itertools::Itertools;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The IOAM namespace used for all traces.
pub const IOAM_NAMESPACE: u16 = 123;

/// Address family of the generated plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("IPv4"),
            IpVersion::V6 => f.write_str("IPv6"),
        }
    }
}

/// All impairments that can be induced on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Impairment {
    /// Maximum transmission unit of the interface.
    Mtu,
    /// Length of the transmit queue of the interface.
    BufferSize,
    /// Rate limit
    Rate,
    /// Added delay
    Delay,
    /// Jitter on the added delay
    Jitter,
    /// Packet loss
    Loss,
    /// Packet corruption
    Corrupt,
    /// Packet duplication
    Duplicate,
    /// Packet reordering
    Reorder,
}

impl Impairment {
    /// All impairments in the order in which they are applied.
    pub const ALL: [Impairment; 9] = [
        Impairment::Mtu,
        Impairment::BufferSize,
        Impairment::Rate,
        Impairment::Delay,
        Impairment::Jitter,
        Impairment::Loss,
        Impairment::Corrupt,
        Impairment::Duplicate,
        Impairment::Reorder,
    ];

    /// The key used to write this impairment in the topology file.
    pub fn key(&self) -> &'static str {
        match self {
            Impairment::Mtu => "mtu",
            Impairment::BufferSize => "buffer_size",
            Impairment::Rate => "rate",
            Impairment::Delay => "delay",
            Impairment::Jitter => "jitter",
            Impairment::Loss => "loss",
            Impairment::Corrupt => "corrupt",
            Impairment::Duplicate => "duplicate",
            Impairment::Reorder => "reorder",
        }
    }

    /// Returns `true` if the impairment is realized by the netem queueing discipline.
    pub fn is_netem(&self) -> bool {
        !matches!(self, Impairment::Mtu | Impairment::BufferSize)
    }
}

impl Display for Impairment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Impairment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Impairment::ALL
            .into_iter()
            .find(|i| i.key() == s)
            .ok_or_else(|| format!("{s} is not an impairment"))
    }
}

/// A non-negative amount of seconds, used to schedule timers.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Seconds(pub f64);

impl Add for Seconds {
    type Output = Seconds;

    fn add(self, rhs: Self) -> Self::Output {
        Seconds(self.0 + rhs.0)
    }
}

impl Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // integral values print without a fraction (`7`, not `7.0`)
        write!(f, "{}", self.0)
    }
}

/// Parameters of a netem queueing discipline. Values are kept in the `tc` syntax in which they
/// were written (`50ms`, `1%`, `10mbit`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Netem {
    /// Rate limit
    pub rate: Option<String>,
    /// Added delay
    pub delay: Option<String>,
    /// Jitter of the delay. Only rendered if `delay` is set.
    pub jitter: Option<String>,
    /// Loss percentage
    pub loss: Option<String>,
    /// Corruption percentage
    pub corrupt: Option<String>,
    /// Duplication percentage
    pub duplicate: Option<String>,
    /// Reordering percentage
    pub reorder: Option<String>,
}

impl Netem {
    /// Returns `true` if no netem parameter is set.
    pub fn is_empty(&self) -> bool {
        self.rate.is_none()
            && self.delay.is_none()
            && self.loss.is_none()
            && self.corrupt.is_none()
            && self.duplicate.is_none()
            && self.reorder.is_none()
    }

    /// Get a mutable reference to the field that stores the given impairment. Returns `None` for
    /// impairments that are not realized by netem.
    pub fn field_mut(&mut self, impairment: Impairment) -> Option<&mut Option<String>> {
        match impairment {
            Impairment::Rate => Some(&mut self.rate),
            Impairment::Delay => Some(&mut self.delay),
            Impairment::Jitter => Some(&mut self.jitter),
            Impairment::Loss => Some(&mut self.loss),
            Impairment::Corrupt => Some(&mut self.corrupt),
            Impairment::Duplicate => Some(&mut self.duplicate),
            Impairment::Reorder => Some(&mut self.reorder),
            Impairment::Mtu | Impairment::BufferSize => None,
        }
    }

    /// Get the value of the given impairment.
    pub fn field(&self, impairment: Impairment) -> Option<&str> {
        match impairment {
            Impairment::Rate => self.rate.as_deref(),
            Impairment::Delay => self.delay.as_deref(),
            Impairment::Jitter => self.jitter.as_deref(),
            Impairment::Loss => self.loss.as_deref(),
            Impairment::Corrupt => self.corrupt.as_deref(),
            Impairment::Duplicate => self.duplicate.as_deref(),
            Impairment::Reorder => self.reorder.as_deref(),
            Impairment::Mtu | Impairment::BufferSize => None,
        }
    }
}

impl Display for Netem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rate) = &self.rate {
            write!(f, " rate {rate}")?;
        }
        if let Some(delay) = &self.delay {
            write!(f, " delay {delay}")?;
            if let Some(jitter) = &self.jitter {
                write!(f, " {jitter}")?;
            }
        }
        for (name, value) in [
            ("loss", &self.loss),
            ("corrupt", &self.corrupt),
            ("duplicate", &self.duplicate),
            ("reorder", &self.reorder),
        ] {
            if let Some(value) = value {
                write!(f, " {name} {value}")?;
            }
        }
        Ok(())
    }
}

/// IOAM trace type, a 24-bit bitmap. Bit 0 is the most significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct IoamTraceType(u32);

impl Default for IoamTraceType {
    /// Only bit 0 (hop limit and node id) is set.
    fn default() -> Self {
        Self::from_bits([0])
    }
}

impl IoamTraceType {
    /// Create a trace type with the given bits set. Bits outside of `0..24` are ignored.
    pub fn from_bits(bits: impl IntoIterator<Item = u8>) -> Self {
        Self(
            bits.into_iter()
                .filter(|b| *b < 24)
                .fold(0, |acc, b| acc | (1 << (23 - b))),
        )
    }

    /// Check if bit `bit` is set.
    pub fn is_set(&self, bit: u8) -> bool {
        bit < 24 && self.0 & (1 << (23 - bit)) != 0
    }

    /// Number of bytes every hop adds to the trace.
    pub fn per_hop_size(&self) -> u32 {
        let short = [0, 1, 2, 3, 5, 6].into_iter().filter(|b| self.is_set(*b));
        let wide = [8, 9, 10].into_iter().filter(|b| self.is_set(*b));
        4 * short.count() as u32 + 8 * wide.count() as u32
    }
}

impl Display for IoamTraceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}", self.0)
    }
}

/// Destination of an IOAM-encapsulating route.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum RouteDestination {
    /// A whole subnet
    Subnet(IpNet),
    /// A single host
    Host(IpAddr),
}

impl Display for RouteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDestination::Subnet(net) => net.fmt(f),
            RouteDestination::Host(ip) => ip.fmt(f),
        }
    }
}

/// How packets leave for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum NextHop {
    /// Through a gateway address
    Via(IpAddr),
    /// Directly out of the named interface
    Dev(String),
}

impl Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextHop::Via(ip) => write!(f, "via {ip}"),
            NextHop::Dev(dev) => write!(f, "dev {dev}"),
        }
    }
}

/// A shell command executed inside an entity.
///
/// ```
/// # use shell_command::ShellCommand;
/// let cmd = ShellCommand::SetMtu { dev: "eth0".to_string(), mtu: 1400 };
/// assert_eq!(cmd.to_string(), "/sbin/ip link set dev eth0 mtu 1400");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum ShellCommand {
    /// Plain route towards a subnet. The address family follows the destination.
    Route {
        /// Destination subnet
        destination: IpNet,
        /// Next-hop address
        via: IpAddr,
    },
    /// IPv6 route that pre-allocates an IOAM trace in every packet.
    IoamRoute {
        /// Destination of the route
        destination: RouteDestination,
        /// Which data every node adds to the trace
        trace_type: IoamTraceType,
        /// Pre-allocated trace size in bytes
        size: u32,
        /// Where the packets leave
        next_hop: NextHop,
    },
    /// Set the MTU of an interface.
    SetMtu {
        /// Interface name
        dev: String,
        /// New MTU
        mtu: u32,
    },
    /// Set the transmit queue length of an interface.
    SetTxQueueLen {
        /// Interface name
        dev: String,
        /// New queue length
        len: u32,
    },
    /// Attach a netem root qdisc to an interface.
    AddNetem {
        /// Interface name
        dev: String,
        /// Netem parameters
        netem: Netem,
    },
    /// Remove the root qdisc of an interface.
    DeleteQdisc {
        /// Interface name
        dev: String,
    },
    /// Run a sequence of commands after a delay.
    Delayed {
        /// Time to wait
        after: Seconds,
        /// Commands to run, in order, once the time has passed
        steps: Vec<ShellCommand>,
    },
    /// Remove the default route of the given family.
    DeleteDefaultRoute(IpVersion),
    /// Set the default policy of the forward chain.
    ForwardPolicy {
        /// `iptables` or `ip6tables`
        version: IpVersion,
        /// Accept (`true`) or drop (`false`) by default.
        accept: bool,
    },
    /// Append a rule to the forward chain.
    ForwardRule {
        /// `iptables` or `ip6tables`
        version: IpVersion,
        /// Everything after `-A FORWARD`
        rule: String,
    },
    /// Register the IOAM namespace.
    IoamNamespace,
    /// Run the interface setup script shipped with IOAM-enabled images.
    SetInterfaces,
    /// Drop incoming and outgoing ICMP redirects.
    DropIcmpRedirect,
    /// Start the Open vSwitch service.
    OvsStart,
    /// Create a bridge.
    OvsAddBridge {
        /// Bridge name
        bridge: String,
    },
    /// Add a port to a bridge, optionally as an access port of a VLAN.
    OvsAddPort {
        /// Bridge name
        bridge: String,
        /// Port name
        port: String,
        /// VLAN tag
        tag: Option<u16>,
    },
    /// Command given verbatim in the topology.
    Raw(String),
    /// Keep the container alive.
    Idle,
}

impl ShellCommand {
    /// Returns `true` if this command realizes `impairment` on interface `dev`.
    ///
    /// ```
    /// # use shell_command::{Impairment, Netem, ShellCommand};
    /// let cmd = ShellCommand::AddNetem { dev: "eth1".to_string(), netem: Netem::default() };
    /// assert!(cmd.shapes(Impairment::Delay, "eth1"));
    /// assert!(!cmd.shapes(Impairment::Mtu, "eth1"));
    /// assert!(!cmd.shapes(Impairment::Delay, "eth10"));
    /// ```
    pub fn shapes(&self, impairment: Impairment, interface: &str) -> bool {
        match self {
            ShellCommand::SetMtu { dev, .. } => impairment == Impairment::Mtu && dev == interface,
            ShellCommand::SetTxQueueLen { dev, .. } => {
                impairment == Impairment::BufferSize && dev == interface
            }
            ShellCommand::AddNetem { dev, .. } => impairment.is_netem() && dev == interface,
            _ => false,
        }
    }

    /// Wrap the command such that it is executed after `after` seconds.
    pub fn delayed(self, after: Seconds) -> Self {
        ShellCommand::Delayed {
            after,
            steps: vec![self],
        }
    }
}

impl Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellCommand::Route { destination, via } => match destination {
                IpNet::V4(_) => write!(f, "/sbin/ip r a {destination} via {via}"),
                IpNet::V6(_) => write!(f, "/sbin/ip -6 r a {destination} via {via}"),
            },
            ShellCommand::IoamRoute {
                destination,
                trace_type,
                size,
                next_hop,
            } => write!(
                f,
                "/sbin/ip -6 r a {destination} encap ioam6 trace prealloc type {trace_type} ns {IOAM_NAMESPACE} size {size} {next_hop}"
            ),
            ShellCommand::SetMtu { dev, mtu } => write!(f, "/sbin/ip link set dev {dev} mtu {mtu}"),
            ShellCommand::SetTxQueueLen { dev, len } => {
                write!(f, "/sbin/ip link set dev {dev} txqueuelen {len}")
            }
            ShellCommand::AddNetem { dev, netem } => {
                write!(f, "tc qdisc add dev {dev} root netem{netem}")
            }
            ShellCommand::DeleteQdisc { dev } => write!(f, "tc qdisc del dev {dev} root"),
            ShellCommand::Delayed { after, steps } => {
                write!(f, "sleep {after} && {}", steps.iter().join(" && "))
            }
            ShellCommand::DeleteDefaultRoute(IpVersion::V4) => f.write_str("ip r d default"),
            ShellCommand::DeleteDefaultRoute(IpVersion::V6) => f.write_str("ip -6 r d default"),
            ShellCommand::ForwardPolicy { version, accept } => write!(
                f,
                "{} -P FORWARD {}",
                iptables(*version),
                if *accept { "ACCEPT" } else { "DROP" }
            ),
            ShellCommand::ForwardRule { version, rule } => {
                write!(f, "{} -A FORWARD {rule}", iptables(*version))
            }
            ShellCommand::IoamNamespace => {
                write!(f, "/sbin/ip ioam namespace add {IOAM_NAMESPACE}")
            }
            ShellCommand::SetInterfaces => f.write_str("sh set_interfaces.sh"),
            ShellCommand::DropIcmpRedirect => f.write_str(
                "iptables -A OUTPUT -p icmp --icmp-type 5 -j DROP && iptables -A INPUT -p icmp --icmp-type 5 -j DROP",
            ),
            ShellCommand::OvsStart => f.write_str("service openvswitch-switch start"),
            ShellCommand::OvsAddBridge { bridge } => write!(f, "ovs-vsctl add-br {bridge}"),
            ShellCommand::OvsAddPort { bridge, port, tag } => match tag {
                Some(tag) => write!(f, "ovs-vsctl add-port {bridge} {port} tag={tag}"),
                None => write!(f, "ovs-vsctl add-port {bridge} {port}"),
            },
            ShellCommand::Raw(cmd) => f.write_str(cmd),
            ShellCommand::Idle => f.write_str("tail -f /dev/null"),
        }
    }
}

/// Name of the packet filter binary for the given family.
fn iptables(version: IpVersion) -> &'static str {
    match version {
        IpVersion::V4 => "iptables",
        IpVersion::V6 => "ip6tables",
    }
}
