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

//! Generation flags. These are resolved once before the compiler runs and are never mutated
//! afterwards.

use thiserror::Error;

#[cfg(feature = "json")]
use serde::Serialize;

pub use shell_command::IpVersion;

/// Deployment target of the generated plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum Target {
    /// Containers on a local container network (with a gateway on every network).
    Compose,
    /// Pods on a cluster. Every pod has an additional default interface assigned by the CNI.
    Kubernetes,
}

/// End-to-end tracing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum Tracing {
    /// No end-to-end tracing
    #[default]
    Off,
    /// IOAM traces, without a collector
    Ioam,
    /// Closed-loop telemetry: IOAM traces with a collector
    Clt,
}

/// Inconsistent combination of generation flags.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FlagsError {
    /// IOAM only exists for IPv6.
    #[error("IOAM requires IPv6")]
    IoamRequiresIpv6,
    /// CLT needs IOAM, and thus IPv6.
    #[error("CLT requires IPv6")]
    CltRequiresIpv6,
    /// CLT reports to the telemetry collector.
    #[error("CLT requires jaeger to be enabled")]
    CltRequiresJaeger,
}

/// Flags that parameterize the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct GenerationFlags {
    ip_version: IpVersion,
    target: Target,
    jaeger: bool,
    tracing: Tracing,
}

impl GenerationFlags {
    /// Create a builder for the flags. The builder defaults to IPv4 on the compose target with
    /// all tracing disabled.
    pub fn builder() -> GenerationFlagsBuilder {
        GenerationFlagsBuilder::default()
    }

    /// Address family
    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Deployment target
    pub fn target(&self) -> Target {
        self.target
    }

    /// Whether telemetry tracing (jaeger) is enabled.
    pub fn jaeger(&self) -> bool {
        self.jaeger
    }

    /// The end-to-end tracing mode.
    pub fn tracing(&self) -> Tracing {
        self.tracing
    }

    /// Whether routes should carry IOAM traces (either IOAM-only or CLT).
    pub fn e2e_tracing(&self) -> bool {
        self.tracing != Tracing::Off
    }

    /// Name of the interface with the given index inside `entity`.
    pub fn interface_name(&self, index: usize, entity: &str) -> String {
        match self.target {
            Target::Kubernetes => format!("eth{index}"),
            Target::Compose => format!("eth{index}_{entity}"),
        }
    }
}

/// Builder for [`GenerationFlags`].
#[derive(Debug, Clone)]
pub struct GenerationFlagsBuilder {
    /// Address family. The default is IPv4.
    pub ip_version: IpVersion,
    /// Deployment target. The default is compose.
    pub target: Target,
    /// Telemetry tracing. Disabled by default.
    pub jaeger: bool,
    /// End-to-end tracing. Disabled by default.
    pub tracing: Tracing,
}

impl Default for GenerationFlagsBuilder {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::V4,
            target: Target::Compose,
            jaeger: false,
            tracing: Tracing::Off,
        }
    }
}

impl GenerationFlagsBuilder {
    /// Set the address family.
    pub fn ip_version(&mut self, x: IpVersion) -> &mut Self {
        self.ip_version = x;
        self
    }

    /// Set the deployment target.
    pub fn target(&mut self, x: Target) -> &mut Self {
        self.target = x;
        self
    }

    /// Enable or disable telemetry tracing.
    pub fn jaeger(&mut self, x: bool) -> &mut Self {
        self.jaeger = x;
        self
    }

    /// Set the end-to-end tracing mode.
    pub fn tracing(&mut self, x: Tracing) -> &mut Self {
        self.tracing = x;
        self
    }

    /// Check the flags for consistency and build them.
    pub fn build(&self) -> Result<GenerationFlags, FlagsError> {
        match (self.tracing, self.ip_version, self.jaeger) {
            (Tracing::Ioam, IpVersion::V4, _) => Err(FlagsError::IoamRequiresIpv6),
            (Tracing::Clt, IpVersion::V4, _) => Err(FlagsError::CltRequiresIpv6),
            (Tracing::Clt, _, false) => Err(FlagsError::CltRequiresJaeger),
            _ => Ok(GenerationFlags {
                ip_version: self.ip_version,
                target: self.target,
                jaeger: self.jaeger,
                tracing: self.tracing,
            }),
        }
    }
}
