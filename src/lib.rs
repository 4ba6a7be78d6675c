//! # SE Letters
//!
//! Obsolescence letter ingestion and IBcatalogue product matching.
//!
//! Letters (PDF, DOCX, DOC) are read from disk, their text is sent to an LLM
//! for structured metadata extraction, and every withdrawn product is
//! matched against the IBcatalogue: a broad SQL candidate search, a
//! deterministic score, then LLM arbitration over the shortlist. Letters,
//! products and confirmed matches are stored in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Letters  │──▶│ Extraction │──▶│  Discovery   │──▶│  SQLite  │
//! │ PDF/DOCX │   │ text + LLM │   │ SQL+score+LLM│   │ letters  │
//! └──────────┘   └────────────┘   └──────────────┘   └────┬─────┘
//!                                                         │
//!                                  ┌──────────────────────┤
//!                                  ▼                      ▼
//!                             ┌──────────┐          ┌──────────┐
//!                             │   CLI    │          │   HTTP   │
//!                             │  (sel)   │          │   API    │
//!                             └──────────┘          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Letters, letter products, candidates, matches |
//! | [`extract`] | PDF / DOCX / DOC / XLSX text extraction |
//! | [`letters_source`] | Letter discovery on disk |
//! | [`llm`] | xAI chat-completions client |
//! | [`extraction`] | LLM metadata extraction |
//! | [`filters`] | Search filter construction |
//! | [`catalogue`] | IBcatalogue search and import |
//! | [`scoring`] | Candidate scoring and ranking |
//! | [`matching`] | LLM arbitration |
//! | [`store`] | Letters persistence |
//! | [`pipeline`] | Processing orchestration |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod catalogue;
pub mod config;
pub mod db;
pub mod export;
pub mod extract;
pub mod extraction;
pub mod filters;
pub mod letters_cmd;
pub mod letters_source;
pub mod llm;
pub mod matching;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod scoring;
pub mod server;
pub mod stats;
pub mod store;
