//! Packet-scheduling hierarchy management
//!
//! This library programs emulated network conditions onto a Linux interface
//! with tc: a flat netem node, or a layered HTB/netem/SFQ chain with a port
//! filter. Commands go through a [`TcBackend`], either the `tc` binary or,
//! with the `test-utils` feature, an in-memory model of the kernel tables.

pub mod backend;
pub mod interface;
pub mod ops;
pub mod preflight;
pub mod qdisc;
pub mod runtime;
pub mod show;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod memory;

pub use backend::{CommandBackend, TcBackend};
pub use interface::{InterfaceChoice, InterfaceResolver, IpCommand, LinkSource, NoPrompt, Prompt};
pub use ops::{NetemSpec, TcObject, TcOp};
pub use qdisc::{ApplyOutcome, Hierarchy, QdiscManager, Teardown};
pub use runtime::apply_preset;
pub use show::{HierarchyVariant, LayeredObservation, ObservedHierarchy};
pub use types::{InterfaceError, PreflightError, QdiscError};

#[cfg(feature = "test-utils")]
pub use memory::MemoryBackend;
