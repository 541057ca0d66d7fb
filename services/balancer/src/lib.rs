//! Stream balancer service library.
//!
//! This crate primarily ships a `balancer` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod state;
