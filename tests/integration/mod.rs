//! Integration tests
//!
//! Exercise the engine end to end against a real SQLite store and a
//! scripted or mocked remote service.

pub mod durability;
pub mod http_remote;
pub mod offline_replay;
pub mod session;
pub mod triggers;
