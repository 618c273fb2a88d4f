//! vvsync - encrypted multi-device budget vault
//!
//! Derives a vault key and budget id from a password and a four-word share
//! code, keeps budget data encrypted at rest, syncs it between devices
//! through an opaque remote store and coordinates concurrent edits with
//! lease locks.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod session;
pub mod share;
pub mod store;
pub mod sync;
pub mod ui;

pub use error::{VaultError, VaultResult};
