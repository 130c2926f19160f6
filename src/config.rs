//! Port layout, CLI surface, and startup validation shared by the node
//! and client binaries.

use clap::{Parser, ValueEnum};

use crate::error::{Error, ErrorKind, Result};

/// The base TCP port for peer-to-peer traffic; node `id`'s peer listener
/// binds `PEER_BASE + id`.
pub const PEER_BASE: u16 = 9000;

/// The base TCP port for the HTTP front end; node `id`'s HTTP listener
/// binds `CLIENT_BASE + id`.
pub const CLIENT_BASE: u16 = 8080;

/// Which replication backend a node process should run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ReplicationType {
    /// Single node, no peer traffic.
    None,
    /// Chain replication, as specified.
    Chain,
    /// Reserved; always rejected at startup.
    Gossip,
    /// Not a server mode -- present for parity with the original CLI
    /// surface, but `minikv-node` never dispatches to it.
    Client,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// CLI arguments for the `minikv-node` binary.
#[derive(Parser, Debug)]
#[command(name = "minikv-node")]
pub struct NodeArgs {
    /// Which replication backend to run.
    #[arg(value_enum)]
    pub replication_type: ReplicationType,

    /// This node's numeric id (0 <= index < 1000).
    #[arg(long, default_value_t = 0)]
    pub index: u32,

    /// Logging verbosity.
    #[arg(long, value_enum, default_value = "info")]
    pub loglevel: LogLevel,

    /// Comma-separated list of peer ids to connect to. At most one for
    /// `chain` (the predecessor); ignored for `none`.
    #[arg(short = 'C', long = "connect-to", default_value = "")]
    pub connect_to: String,
}

impl NodeArgs {
    /// Parses `--connect-to` into a list of peer ids, validating it
    /// against the constraints for `replication_type`.
    pub fn connect_to_ids(&self) -> Result<Vec<u32>> {
        let ids = if self.connect_to.is_empty() {
            Vec::new()
        } else {
            self.connect_to
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<u32>()
                        .map_err(|e| Error::wrapped(ErrorKind::Config, e))
                })
                .collect::<Result<Vec<_>>>()?
        };

        if self.index >= 1000 {
            return Err(Error::simple(ErrorKind::Config));
        }

        match self.replication_type {
            ReplicationType::Chain if ids.len() > 1 => {
                Err(Error::wrapped(
                    ErrorKind::Config,
                    "chain replication accepts at most one predecessor id",
                ))
            }
            ReplicationType::Gossip => Err(Error::wrapped(
                ErrorKind::Config,
                "gossip replication is not implemented",
            )),
            _ => Ok(ids),
        }
    }
}
