//! # Snippet Search
//!
//! Clone source repositories, index their files as vector-searchable
//! snippets, and answer natural-language code-search queries scoped to one
//! repository.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Download  │──▶│  Extract +   │──▶│ Table store   │
//! │ git/GitHub│   │  Embed batch │   │ SQLite/memory │
//! └───────────┘   └──────────────┘   └──────┬────────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │ (snips)  │        │  (axum)  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! snips init                         # create database
//! snips download alice               # clone alice's repositories
//! snips train alice demo             # index one of them
//! snips search alice demo "parse config" --limit 3
//! snips serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite table store |
//! | [`extract`] | Snippet extraction from a checkout |
//! | [`embedding`] | Embedding providers |
//! | [`rerank`] | Re-ranker construction, cross-encoder |
//! | [`registry`] | Engine registry and manifest |
//! | [`train`] | Training coordinator |
//! | [`hosting`] | Hosting client (GitHub) |
//! | [`download`] | Bulk download jobs |
//! | [`service`] | Service wiring |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod download;
pub mod embedding;
pub mod extract;
pub mod hosting;
pub mod migrate;
pub mod registry;
pub mod rerank;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod train;
