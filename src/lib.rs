//! Package sync engine for RepoHub.
//!
//! Gathers package listings from several OS package ecosystems into one store.
//! Each sync target runs at most one sync at a time; runs report pollable
//! progress and prune records upstream stopped listing. A scheduler sweeps all
//! targets periodically, and a shared secret gates triggers and writes.

pub mod api;
pub mod common;
pub mod config;
pub mod error;
pub mod fetch;
pub mod package;
pub mod platform;
pub mod store;
pub mod sync;
pub mod ui;

pub use error::{Result, SyncError};
