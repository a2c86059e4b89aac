#![forbid(unsafe_code)]

//! The site runtime: library scanning, torrent generation, status
//! reporting, and command execution against the hub.
//!
//! A site keeps no database. Its durable state is the content on disk,
//! a handful of JSON files under the state directory (server identity,
//! inventory snapshot, generation checkpoints), and the hub's tables.

pub mod client;
pub mod commands;
pub mod error;
pub mod generator;
pub mod identity;
pub mod link;
pub mod reporter;
pub mod runtime;
pub mod scanner;

pub use client::HubClient;
pub use error::{SiteError, SiteResult};
pub use runtime::SiteRuntime;
