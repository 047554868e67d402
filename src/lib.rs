//! retrocache - local cache and save reconciliation for a remote game library
//!
//! Tracks which catalog items are on disk, reconciles the remote catalog with
//! the local install index, drives one download at a time and ranks save
//! candidates when an item is resumed.

pub mod catalog;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod pagination;
pub mod remote;
pub mod saves;
pub mod sources;
pub mod status;

pub use engine::{Collaborators, Engine, EngineEvent, LaunchTarget};
pub use error::{EngineError, Result};
