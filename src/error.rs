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

//! Error types of the compiler.

use shell_command::Impairment;
use thiserror::Error;

use crate::{
    addressing::AddressError, config::LoadError, flags::FlagsError, validator::ValidationError,
};

/// Any error that aborts the compilation.
#[derive(Debug, Error)]
pub enum Error {
    /// The topology could not be loaded.
    #[error("{0}")]
    Load(#[from] LoadError),
    /// The generation flags are inconsistent.
    #[error("Invalid flags: {0}")]
    Flags(#[from] FlagsError),
    /// The topology is invalid.
    #[error("Invalid topology: {0}")]
    Validation(#[from] ValidationError),
    /// Addresses could not be assigned.
    #[error("Address assignment failed: {0}")]
    Address(#[from] AddressError),
    /// The resolved networks do not match the topology.
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
}

/// The resolved networks diverged from the topology. These errors indicate an inconsistency
/// between stages, and are always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The entity does not exist.
    #[error("Entity {0} does not exist")]
    UnknownEntity(String),
    /// Two adjacent hops do not share a network.
    #[error("Cannot find a network shared by {0} and {1}")]
    NoSharedNetwork(String, String),
    /// The entity has no interface on the network.
    #[error("Entity {entity} has no interface on {network}")]
    InterfaceNotFound {
        /// The entity
        entity: String,
        /// The network
        network: String,
    },
    /// The entity has an interface on the network, but without an address.
    #[error("Entity {entity} has no address on {network}")]
    AddressNotFound {
        /// The entity
        entity: String,
        /// The network
        network: String,
    },
    /// A sequence of switches is not terminated by an addressed entity.
    #[error("Path {0} has no addressed entity after its switches")]
    NoAddressedHop(String),
    /// A timer must change exactly one command.
    #[error("Timer on {impairment} of {entity} matches {matches} commands on {interface}, expected exactly one")]
    AmbiguousTimerTarget {
        /// The entity owning the connection
        entity: String,
        /// The impairment changed by the timer
        impairment: Impairment,
        /// The outgoing interface of the connection
        interface: String,
        /// Number of matching commands
        matches: usize,
    },
}
