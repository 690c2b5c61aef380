//! # DriftLink Rendezvous
//!
//! PIN-based session registry and WebSocket signaling relay. Two peers pair
//! by a short human-typed PIN; once paired, this service relays opaque
//! handshake payloads (offer/answer/ICE candidates, in WebRTC terms) between
//! them without inspecting their contents. It never touches file bytes —
//! that happens over the data pipe the two peers establish using whatever
//! the relayed payloads negotiate.
//!
//! ## Modules
//!
//! - [`pin`] - PIN alphabet, generation, and validation
//! - [`store`] - the `SessionStore` abstraction plus an in-memory implementation
//! - [`session`] - `SessionRegistry`: create/join/lookup/remove over a store
//! - [`signaling`] - the axum WebSocket handler and envelope relay logic
//! - [`config`] - `RendezvousConfig`, the binary's clap surface
//! - [`error`] - `RegistryError` and its wire-code mapping

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod pin;
pub mod session;
pub mod signaling;
pub mod store;

#[cfg(feature = "redis-store")]
pub mod redis_store;

pub use error::{RegistryError, Result};
