//! Ops session broker library.
//!
//! Mediates between web clients and two AI backends (a local CLI subprocess
//! and the hosted Anthropic Messages API) behind one SSE streaming protocol.

pub mod anthropic;
pub mod api;
pub mod cli;
pub mod config;
pub mod store;
pub mod turn;
