//! # Labelizer
//!
//! Backend for a human labeling tool. Annotators are shown triplets of
//! images (a reference and two candidates) and pick the candidate closer to
//! the reference; the results train and validate image-similarity encoders.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ zip upload  │──▶│  Pipeline   │──▶│  SQLite  │
//! │ (HTTP/CLI)  │   │ validate+   │   │  items + │
//! └─────────────┘   │ commit      │   │ triplets │
//!                   └─────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! Pure logic (models, the lease rule, vector math, image naming, the
//! [`Store`](labelizer_core::store::Store) trait and its in-memory backend)
//! lives in the `labelizer-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` backend |
//! | [`error`] | Service error taxonomy |
//! | [`triplets`] | Lease, label, stats, delete |
//! | [`archive`] | Scratch directories and zip extraction |
//! | [`upload`] | Upload ingestion pipeline |
//! | [`similarity`] | Cosine similarity and nearest neighbours |
//! | [`export`] | CSV export of labeled triplets |
//! | [`images`] | Stored image lookup |
//! | [`auth`] | Proxy-header identity |
//! | [`server`] | HTTP API |

pub mod archive;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod images;
pub mod migrate;
pub mod server;
pub mod similarity;
pub mod sqlite_store;
pub mod triplets;
pub mod upload;
