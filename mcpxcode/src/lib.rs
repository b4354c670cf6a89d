//! Xcode command-line tools exposed as structured MCP tools.
//!
//! A closed [`catalog`] of tool descriptors drives everything: arguments are
//! checked by [`validate`] before any process exists, [`invoke`] runs one
//! process group per request with a timeout and cancellation, and
//! [`normalize`] turns its output into a JSON payload.

pub mod catalog;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod mcp;
pub mod normalize;
pub mod validate;
