// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # noesis
//!
//! A knowledge graph reasoning engine. Facts are stored as weighted triples
//! with provenance; reasoning and exploration operations read them through a
//! cached query layer and may write derived facts back.
//!
//! ## Architecture
//!
//! - **Triple store** (`graph`): indexed triples and inference rules, optionally
//!   backed by redb (`store`)
//! - **Patterns** (`pattern`): reusable solution structures with usage tracking
//! - **Query layer** (`query`, `kb`): planned, cached reads with metrics
//! - **Reasoning** (`reason`): deduction, induction, abduction
//! - **Exploration** (`explore`): analogy, causal chains, sequential analysis,
//!   candidate generation
//! - **Hypergraph** (`hyper`): cross-domain n-ary relationships and context
//!   expansion
//! - **Dispatch** (`dispatch`): one closed [`dispatch::Operation`] enum for
//!   every engine operation
//!
//! ## Library usage
//!
//! ```no_run
//! use noesis::config::EngineConfig;
//! use noesis::engine::Engine;
//! use noesis::graph::NewTriple;
//!
//! let engine = Engine::new(EngineConfig::in_memory()).unwrap();
//! engine.add_triple(NewTriple::new("socrates", "is_a", "human")).unwrap();
//! let deduction = engine
//!     .deduce(&["socrates is_a human".to_string()], "")
//!     .unwrap();
//! println!("{} ({:.2})", deduction.conclusion, deduction.confidence);
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod explore;
pub mod extract;
pub mod graph;
pub mod hyper;
pub mod kb;
pub mod pattern;
pub mod provenance;
pub mod query;
pub mod reason;
pub mod store;
