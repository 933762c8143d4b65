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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use topoplan::{
    flags::{IpVersion, Target, Tracing},
    Architecture, GenerationFlags, RawTopology,
};

/// Address family of the generated topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Ip {
    /// IPv4
    #[value(name = "4")]
    V4,
    /// IPv6
    #[value(name = "6")]
    V6,
}

/// Compile a microservice test topology into a network plan.
#[derive(Debug, Parser)]
struct Cli {
    /// Topology file to compile
    #[clap(long, short, default_value = "config.yml")]
    config: PathBuf,
    /// Address family
    #[clap(long)]
    ip: Ip,
    /// Generate the plan for Kubernetes instead of docker compose
    #[clap(long, short)]
    kubernetes: bool,
    /// Enable telemetry tracing with jaeger
    #[clap(long, short)]
    jaeger: bool,
    /// Add IOAM traces to all end-to-end routes. Requires IPv6.
    #[clap(long, conflicts_with = "clt")]
    ioam: bool,
    /// Enable closed-loop telemetry. Requires IPv6 and jaeger.
    #[clap(long)]
    clt: bool,
    /// Print the resolved architecture as json
    #[cfg(feature = "json")]
    #[clap(long)]
    json: bool,
    /// Print debug output
    #[clap(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    if args.debug && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "debug");
    }
    pretty_env_logger::init_timed();

    let flags = GenerationFlags::builder()
        .ip_version(match args.ip {
            Ip::V4 => IpVersion::V4,
            Ip::V6 => IpVersion::V6,
        })
        .target(if args.kubernetes {
            Target::Kubernetes
        } else {
            Target::Compose
        })
        .jaeger(args.jaeger)
        .tracing(match (args.ioam, args.clt) {
            (_, true) => Tracing::Clt,
            (true, false) => Tracing::Ioam,
            (false, false) => Tracing::Off,
        })
        .build()?;

    let raw = RawTopology::from_file(&args.config)?;
    let arch = Architecture::build(&raw, flags)?;

    #[cfg(feature = "json")]
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "flags": arch.flags(),
                "networks": arch.networks(),
                "telemetry": arch.telemetry_network(),
                "entities": arch.entities(),
            }))?
        );
        return Ok(());
    }

    for net in arch.networks().iter().chain(arch.telemetry_network()) {
        println!("{net}");
    }
    for entity in arch.entities() {
        println!("{entity}");
    }
    Ok(())
}
