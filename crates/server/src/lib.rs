//! Authoritative simulation server library.
//!
//! The [`World`] owns entity positions and is advanced by [`run_tick_loop`]
//! at a fixed rate. Connection tasks feed it inputs and drain per-client
//! snapshots filtered through the spatial index.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod input;
pub mod mirror;
pub mod server;
pub mod spatial;
pub mod tick;
pub mod world;

// Re-export commonly used types
pub use broadcast::BroadcastReport;
pub use config::Config;
pub use input::Input;
pub use server::{run, ClientSession};
pub use tick::run_tick_loop;
pub use world::{TickReport, World, WORLD_MAX, WORLD_MIN};
