//! HTTP handlers, grouped by resource.

pub mod canonical;
pub mod commands;
pub mod health;
pub mod inventory;
pub mod queue;
pub mod reports;
pub mod servers;
pub mod torrents;
pub mod tracker;
pub mod transfers;
