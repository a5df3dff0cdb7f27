//! Message definitions for the simulation protocol.
//!
//! Client -> server traffic is a JSON envelope with a type discriminator.
//! Server -> client traffic is one JSON snapshot per tick.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Envelope discriminators understood by the server.
pub mod kinds {
    /// Control input carrying an acceleration vector.
    pub const INPUT: &str = "input";
}
