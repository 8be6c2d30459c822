//! # ragchat core
//!
//! Runtime-free logic for the ragchat retrieval-augmented chat pipeline:
//! data models, the error taxonomy, chunking, provider traits, the vector
//! store abstraction, context assembly, and prompt building.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Network
//! adapters, retries, timeouts, and persistence live in the `ragchat` app
//! crate and plug in through the traits defined here.

pub mod chat;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod reply;
pub mod store;
