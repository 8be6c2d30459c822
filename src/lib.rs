//! # ragchat
//!
//! A retrieval-augmented chat assistant over your own documents.
//!
//! Uploaded files are extracted, split into overlapping chunks, embedded via
//! an external embedding model, and stored in a vector store. Questions are
//! embedded the same way; the nearest chunks are merged into a bounded
//! context block and handed to a chat model together with the recent
//! conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ extract  │──▶│ chunk+embed  │──▶│ VectorStore  │
//! │ pdf/docx │   │  (ingest)    │   │ SQLite / mem │
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │
//!           ┌──────────────┐   ┌───────────┴──┐
//!           │  composer    │◀──│  retriever   │
//!           │ (chat model) │   │ merge + pack │
//!           └──────┬───────┘   └──────────────┘
//!                  ▼
//!           CLI (ragchat) / HTTP (axum)
//! ```
//!
//! Pure logic (models, chunker, context assembly, prompt budgeting, reply
//! parsing, the `VectorStore` trait) lives in the `ragchat-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init
//! ragchat ingest notes.md handbook.pdf
//! ragchat ask "what did we decide about the offsite?"
//! ragchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`assistant`] | Shared state and the chat pipeline |
//! | [`ingest`] | Ingestion pipeline |
//! | [`extract`] | Text extraction from uploaded files |
//! | [`embedding`] | Embedding providers and the batching/retrying client |
//! | [`llm`] | Chat model providers |
//! | [`retriever`] | Query embedding, search, and context assembly |
//! | [`composer`] | Prompt building, model call, reply parsing |
//! | [`session`] | In-memory conversation sessions |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assistant;
pub mod composer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod locks;
pub mod migrate;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod turn;
