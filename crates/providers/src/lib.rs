//! Generation and embedding backends for Auspex.
//!
//! Generation providers implement `auspex_core::Provider`; embedding
//! backends implement `auspex_core::Embedder`. The router builds both from
//! configuration once at startup.

pub mod anthropic;
pub mod embedding;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use embedding::{HashingEmbedder, OpenAiCompatEmbedder};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_embedder, build_from_config, ProviderRouter};
