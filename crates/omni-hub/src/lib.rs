#![forbid(unsafe_code)]

//! The hub: authoritative HTTP API, tracker host, state reconciler,
//! transfer orchestration, and the hub→site command channel.
//!
//! The hub is a value created once at startup ([`state::HubState`]) and
//! passed explicitly into every handler and background loop; the only
//! ambient state is the OS signal handler owned by the binary.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod link;
pub mod reaper;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use link::{CommandChannel, LinkRegistry, spawn_link_listener};
pub use reaper::spawn_generation_reaper;
pub use routes::{build_router, build_tracker_router};
pub use state::{HubSettings, HubState};
