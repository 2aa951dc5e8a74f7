//! # Labelizer Core
//!
//! Shared logic for Labelizer: data models, the soft-lease rule for handing
//! out triplets, the storage abstraction with an in-memory backend, image
//! file naming, and vector similarity.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP code.

pub mod embedding;
pub mod images;
pub mod lease;
pub mod models;
pub mod search;
pub mod store;
