//! # codescope
//!
//! A local retrieval-augmented code search and Q&A backend.
//!
//! codescope registers local project directories, indexes their source files
//! into per-project SQLite stores (content-hash incremental, code-aware
//! chunking, embedding vectors), and answers semantic search and RAG
//! questions over them through a JSON HTTP API and a CLI. Embeddings and
//! completions come from any OpenAI-compatible endpoint.
//!
//! ## Quick Start
//!
//! ```bash
//! codescope create ~/work/myproject   # register a project
//! codescope index <project-id>       # build its vector index
//! codescope search <project-id> "where is auth handled"
//! codescope serve                    # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`registry`] | Project registry and per-project store handles |
//! | [`scan`] | Filesystem enumeration and language detection |
//! | [`chunk`] | Code-aware chunking |
//! | [`store`] | Per-project vector store |
//! | [`indexer`] | Background index runs |
//! | [`deps`] | Dependency extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Completion provider abstraction |
//! | [`retrieval`] | Search and RAG answering |
//! | [`cache`] | TTL/LRU response cache |
//! | [`ratelimit`] | Fixed-window rate limiting |
//! | [`server`] | JSON HTTP API |
//! | [`error`] | API error taxonomy |

pub mod cache;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod deps;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod models;
pub mod ratelimit;
pub mod registry;
pub mod retrieval;
pub mod scan;
pub mod server;
pub mod store;
