//! Network subsystem for TCP voice transport
//!
//! The server relays frames between peers over a blocking thread-per-peer
//! model; the client runs capture, send and receive threads against one
//! connection. Reads use a short timeout so every thread can observe the
//! shared shutdown flag.

pub mod client;
pub mod connection;
pub mod registry;
pub mod server;
pub mod socket;

pub use client::{ClientStatus, ConnectionState, VoiceClient};
pub use connection::Connection;
pub use registry::{PeerInfo, PeerRegistry};
pub use server::{ServerHandle, ServerStatus, VoiceServer};
