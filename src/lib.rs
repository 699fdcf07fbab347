//! TriPool Backend Library
//!
//! Pari-mutuel settlement engine for three-outcome events, plus the HTTP
//! surface that drives it. Exposed as a library so binaries and integration
//! tests share the same modules.

pub mod api;
pub mod middleware;
pub mod models;
pub mod settlement;
