//! # Auspex Core
//!
//! Domain types, capability traits, and error definitions for the Auspex
//! guidance pipeline. This crate has **no framework dependencies**: it
//! defines the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`] turns a fused prompt into text
//! - [`Embedder`] turns text into a fixed-length vector
//! - [`VectorStore`] answers nearest-neighbour queries over knowledge chunks
//! - [`SecurityEventSink`] receives gate decisions
//!
//! Implementations live in their own crates and are selected once, at
//! construction time, from configuration.

pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod security_event;

// Re-export key types at crate root for ergonomics
pub use embedding::Embedder;
pub use error::{EmbeddingError, Error, ProviderError, Result, StoreError};
pub use knowledge::{ChunkFilter, KnowledgeChunk, Mode, ScoredChunk, UnknownMode, VectorStore};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use security_event::{SecurityEvent, SecurityEventKind, SecurityEventSink, Severity};
