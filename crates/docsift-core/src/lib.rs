//! # docsift core
//!
//! Shared logic for docsift: data models, metadata schema and
//! validation, chunking, vector codecs and the embedding-model registry,
//! Reciprocal Rank Fusion, query planning, and the store traits.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies; everything here is pure computation over
//! the types the application crate persists.

pub mod chunk;
pub mod error;
pub mod metadata;
pub mod models;
pub mod query;
pub mod rank;
pub mod store;
pub mod vector;
