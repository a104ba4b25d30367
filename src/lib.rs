// ABOUTME: Public library API for the QuickBooks Online sync client
// ABOUTME: Re-exports credential lifecycle, sync tracking, and update orchestration

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod edits;
pub mod error;
pub mod export;
pub mod model;
pub mod storage;
pub mod sync;
pub mod sync_state;
pub mod util;

pub use error::{Error, Result};
pub use model::{Credential, EntityKind, EntityVersion, ItemEdit};
