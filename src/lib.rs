//! Escrow verification oracle
//!
//! Watches an escrow contract for submitted work, fetches each submission
//! from IPFS, measures its test coverage and records an approve/reject
//! verdict on the ledger. Also exposes a small HTTP API over the same
//! components.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
