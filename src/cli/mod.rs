//! Command-line interface definitions for the `mist` worker.
//!
//! This module centralises the clap parser structures so both the worker
//! binary and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `mist` worker.
#[derive(Debug, Parser)]
#[command(
    name = "mist",
    version,
    about = "Provision disposable build hosts for a build/test fleet over MessagePack-RPC"
)]
pub(crate) struct Cli {
    /// Backend used to build resources.
    #[arg(long, value_enum, env = "MIST_DRIVER")]
    pub(crate) driver: DriverKind,
    /// Worker number; the RPC listener binds port 18800 plus this value.
    #[arg(long, env = "MIST_WORKER_ID", default_value_t = 0)]
    pub(crate) worker_id: u16,
}

/// Backends a worker can drive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum DriverKind {
    /// Google Compute Engine virtual machines.
    Gce,
    /// Local LXC containers.
    Lxc,
}
