//! # Snippet Search Core
//!
//! Shared logic for snippet-search: snippet models, the closed language
//! table, the error taxonomy, the table-store trait with an in-memory
//! backend, embedding and re-ranking traits, and the query engine.
//!
//! This crate contains no tokio, sqlx, filesystem walking, or network
//! dependencies.

pub mod embedding;
pub mod error;
pub mod language;
pub mod models;
pub mod rerank;
pub mod search;
pub mod store;
