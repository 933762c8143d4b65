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

//! # Topoplan: compiling microservice test topologies into network plans
//!
//! Topoplan takes a declarative description of a microservice test network (services, external
//! containers, routers, firewalls and switches, together with the impairments of their
//! connections) and resolves it into a complete network plan: subnets, addresses, MAC addresses,
//! VLANs, and the shell commands every entity runs at startup. The commands set up routes, shape
//! the traffic with `tc`, and schedule timed changes of the impairments.
//!
//! The compiler is a single, deterministic pass. Compiling the same topology with the same flags
//! always yields the same plan.
//!
//! ```
//! use topoplan::{Architecture, GenerationFlags, RawTopology};
//!
//! let raw = RawTopology::from_yaml(
//!     r#"
//! frontend:
//!   type: service
//!   port: 8080
//!   endpoints:
//!     - entrypoint: /
//!       psize: 64
//!       connections:
//!         - path: r1->backend
//!           url: /
//!           delay: 50ms
//! r1:
//!   type: router
//!   connections:
//!     - path: backend
//! backend:
//!   type: service
//!   port: 8081
//!   endpoints:
//!     - entrypoint: /
//!       psize: 64
//! "#,
//! )?;
//! let flags = GenerationFlags::builder().build()?;
//! let arch = Architecture::build(&raw, flags)?;
//! assert_eq!(arch.networks().len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Structure
//!
//! - [`config`]: the raw and the typed topology.
//! - [`validator`]: checks the raw topology in phases and produces the typed topology.
//! - [`graph`]: the directed graph used to reject cycles.
//! - [`addressing`]: deterministic subnets and MAC addresses.
//! - [`network`] and [`path`]: the L2 and L3 networks along every end-to-end path.
//! - [`synthesis`]: routes, impairments, timers and setup commands.
//! - [`architecture`]: runs all stages and owns the result.

#![deny(
    missing_docs,
    clippy::missing_docs_in_private_items,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::result_large_err)]

pub mod addressing;
pub mod architecture;
pub mod config;
pub mod entity;
pub mod error;
pub mod flags;
pub mod graph;
pub mod network;
pub mod path;
pub mod synthesis;
pub mod validator;
#[cfg(test)]
mod test;

pub use architecture::Architecture;
pub use config::RawTopology;
pub use error::Error;
pub use flags::GenerationFlags;
pub use shell_command::ShellCommand;
