//! Reassembly, stats, and environment abstractions shared by the NetTool
//! BLE proxy driver.
//!
//! This crate knows about correlation IDs and frame flags (via
//! `nettool-proto`) but nothing about D-Bus, BlueZ, or sockets; it is the
//! pure-logic layer the driver in `nettool-server` is built on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod reassembly;
pub mod stats;

pub use env::Environment;
pub use reassembly::{AdmitOutcome, PendingRequest, ReassemblyTable};
pub use stats::{ConnectionStats, StatusSnapshot};
