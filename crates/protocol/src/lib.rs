//! Shared protocol crate for the simulation server.
//!
//! This crate contains:
//! - The inbound control envelope and its input payload
//! - The outbound per-client snapshot
//! - Shared types (EntityId, Position)

mod error;
pub mod packets;

pub use error::ProtocolError;
pub use packets::{ClientMessage, EntityState, InputPayload, Snapshot};

/// Server-assigned entity identifier. Never reused within a process.
pub type EntityId = u64;

/// Represents a 3D position using glam's Vec3.
pub type Position = glam::Vec3;
