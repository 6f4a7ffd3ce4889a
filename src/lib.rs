//! Folio: a personal knowledge-library engine.
//!
//! A library is a directory tree of typed records ("things"). Each record
//! directory holds a `thing.json` sentinel and may also declare a type with
//! `type.json`; types inherit property definitions from their path ancestors
//! and from named facets. Queries resolve ids through an in-memory path
//! index, enforce inherited ACLs, and externalize records into paginated,
//! link-bearing JSON. Record history comes from a content-addressed commit
//! journal kept alongside the tree.
//!
//! # Architecture
//!
//! - **Storage**: plain JSON files under the library home, mirrored by a
//!   path index built in one startup scan
//! - **Types**: schema files merged along the id hierarchy at load time
//! - **Security**: per-record ACL maps with containment and parent-library
//!   inheritance
//! - **History**: leaf-by-leaf manifest diffs over the commit journal,
//!   bounded by a recency window
//! - **Concurrency**: cooperative async with coalesced file reads and a
//!   bounded task throttle
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`error`] — The engine error taxonomy
//! - [`journal`] — Commit-journal access and the on-disk journal format
//! - [`library`] — The library itself: records, types, queries, security, history
//! - [`throttle`] — Order-preserving bounded concurrency for async tasks

pub mod config;
pub mod error;
pub mod journal;
pub mod library;
pub mod throttle;
