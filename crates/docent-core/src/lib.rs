//! # Docent Core
//!
//! Shared, I/O-free logic for Docent: data models, document segmentation,
//! the content-addressed document cache, lexical relevance ranking,
//! token-budgeted context assembly, cost accounting, and the structured
//! model-output protocol.
//!
//! This crate contains no tokio, network, or filesystem dependencies.
//! Time is read through the [`clock::Clock`] trait so that expiry and
//! daily-budget behaviour can be driven deterministically.
//!
//! ## Pipeline
//!
//! ```text
//!  raw text ──▶ Segmenter ──▶ Document{Small | Large(sections)} ──▶ DocumentCache
//!                                                     │
//!  question ──▶ RelevanceRetriever::rank ─────────────┘
//!                     │
//!                     ▼
//!              ContextAssembler ──▶ prompt context ──▶ (model) ──▶ CostMonitor
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Document`, `Section`, `CostEntry`, `QueryAnalysis` |
//! | [`tokens`] | chars/4 token estimate |
//! | [`clock`] | Injectable time source |
//! | [`segment`] | Structure detection and section splitting |
//! | [`cache`] | TTL + capacity bounded document cache |
//! | [`retrieve`] | Keyword, concept-expansion, and hybrid ranking |
//! | [`assemble`] | Context formatting, compression, and expansion |
//! | [`cost`] | Token/dollar ledger and budget alerts |
//! | [`protocol`] | Sentinel replies and defensive JSON parsing |

pub mod assemble;
pub mod cache;
pub mod clock;
pub mod cost;
pub mod models;
pub mod protocol;
pub mod retrieve;
pub mod segment;
pub mod tokens;

pub use assemble::{
    AssembledContext, AssemblerConfig, CompressionLevel, ContextAssembler, ExpansionMode,
};
pub use cache::{cache_key, CacheConfig, CacheStats, DocumentCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cost::{BudgetStatus, CostConfig, CostMonitor, CostSummary, DailyCost};
pub use models::{CostEntry, Document, DocumentKind, Operation, QueryAnalysis, Section};
pub use retrieve::{RankingMode, RelevanceRetriever, RetrieverConfig, ScoredSection};
pub use segment::{DivisionStrategy, Segmenter, SegmenterConfig};
