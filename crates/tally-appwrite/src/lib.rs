//! Appwrite document client for Tally's inventory collections.
//!
//! This crate provides the gateway the cache layer talks to: list/create/
//! update/delete over the databases REST API plus realtime change channels.
//!
//! ## Features
//!
//! - **HTTP Client**: document CRUD with retry on transient failures
//! - **Realtime**: WebSocket channel per collection with reconnect backoff
//! - **Gateway**: the [`DocumentStore`] trait, so callers can swap in fakes

mod client;
mod error;
pub mod gateway;
mod query;
pub mod realtime;
mod types;

pub use client::{AppwriteClient, GatewayConfig};
pub use error::AppwriteError;
pub use gateway::{ChannelHandle, Collection, DocumentStore, EventHandler, RealtimeEvent};
pub use query::Query;
pub use realtime::RealtimeClient;
pub use types::*;
