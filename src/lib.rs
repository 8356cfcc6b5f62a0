//! # Docent
//!
//! Ask questions about long documents without sending the whole document
//! to the model on every turn.
//!
//! Docent segments each attached document once (cached by content hash),
//! ranks its sections against every question, packs the best ones into a
//! token-budgeted context block, and lets the model ask for more context
//! through a bounded escalation protocol. Every model call is priced and
//! checked against a daily budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌───────────────┐
//! │ extract      │──▶│ QueryOrchestrator   │──▶│ LanguageModel │
//! │ pdf/docx/txt │   │ per-session state   │   │ (OpenAI API)  │
//! └──────────────┘   └─────────┬──────────┘   └───────────────┘
//!                              │ docent-core
//!          ┌──────────┬────────┴───┬─────────────┬────────────┐
//!          ▼          ▼            ▼             ▼            ▼
//!     Segmenter  DocumentCache  Retriever  ContextAssembler  CostMonitor
//!                              │
//!                 ┌────────────┴────────────┐
//!                 ▼                         ▼
//!            ┌──────────┐             ┌──────────┐
//!            │   CLI    │             │   HTTP   │
//!            │ (docent) │             │  (axum)  │
//!            └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docent segment handbook.pdf            # inspect the division
//! docent rank handbook.pdf "leave policy"
//! docent ask handbook.pdf "How many vacation days do I get?"
//! docent chat --file handbook.pdf        # interactive session
//! docent serve                           # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Model transport and engine errors |
//! | [`extract`] | Text extraction from PDF, DOCX, and plain text |
//! | [`llm`] | Language-model abstraction and OpenAI-compatible client |
//! | [`analyzer`] | Fast local query classification |
//! | [`prompts`] | Prompt text and fixed replies |
//! | [`orchestrator`] | Per-session query state machine |
//! | [`sweeper`] | Background cache expiry and idle-session eviction |
//! | [`engine`] | Process-wide wiring |
//! | [`store`] | Object storage for attachments |
//! | [`server`] | HTTP API |

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod server;
pub mod store;
pub mod sweeper;
