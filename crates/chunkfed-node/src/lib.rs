#![warn(missing_docs)]

//! chunkfed node: configuration, driver registry and node assembly behind the
//! `cfed-node` binary.

pub mod cli;
pub mod config;
pub mod node;
pub mod registry;

pub use config::{CacheConfig, LogFormat, NodeConfig, RemoteClusterConfig, TransportConfig};
pub use node::{loopback_address, Node};
pub use registry::DriverRegistry;
