//! # AgroLink application library
//!
//! HTTP API, CLI and the collaborators the server wires around the
//! `agrolink-core` pipeline engine. Exposed as a library so integration
//! tests can build the router without binding a socket.

pub mod api;
pub mod cli;
pub mod config;
pub mod documents;
