//! Administration REST API for the LMP event relay.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
mod views;
