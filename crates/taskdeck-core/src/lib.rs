//! Core library for taskdeck: a local-first task tracker.
//!
//! Holds the SQLite-backed store and its schema lifecycle, the byte codec
//! and persistence adapter for key-value backends, the sectioned snapshot
//! format, and the merge engines used to reconcile devices.

pub mod codec;
pub mod error;
pub mod merge;
pub mod model;
pub mod persist;
pub mod replica;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use error::{CoreError, CoreResult};
