//! # Knowledge Copilot
//!
//! Answers natural-language questions about a source-code repository from a
//! previously built knowledge graph index (entities, relationships, text
//! units).
//!
//! ## Architecture
//!
//! ```text
//!  query ──▶ intent ──┬──▶ structured lookup ──────────────┬──▶ merge ──▶ answer
//!                     └──▶ strategy ──▶ semantic search ───┘
//! ```
//!
//! Every stage writes into a [`state::PipelineState`] whose fields each have
//! a fixed merge rule (first-wins scalars, append-only evidence lists).
//! Retrieval failures become evidence entries, never errors, so the answer
//! always says which sources were unavailable.
//!
//! ## Quick Start
//!
//! ```bash
//! kc reindex                          # build the index
//! kc reset                            # delete the index output
//! kc query "what does SlackNotifier do"
//! kc serve                            # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Retrieval error taxonomy |
//! | [`models`] | Intents, strategies, table rows, evidence items |
//! | [`store`] | Evidence table loading and lookups |
//! | [`structured`] | Keyword lookup over the tables |
//! | [`llm`] | Chat-completion backends |
//! | [`classify`] | Intent classification |
//! | [`strategy`] | Retrieval strategy selection |
//! | [`semantic`] | Semantic search adapter |
//! | [`state`] | Pipeline state and merge rules |
//! | [`risk`] | Risk signals |
//! | [`synthesis`] | Final answer rendering |
//! | [`pipeline`] | Orchestrator |
//! | [`reindex`] | Index rebuild and reset |
//! | [`graph`] | Node/link graph view |
//! | [`server`] | HTTP API |

pub mod classify;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod reindex;
pub mod risk;
pub mod semantic;
pub mod server;
pub mod state;
pub mod store;
pub mod strategy;
pub mod structured;
pub mod synthesis;
