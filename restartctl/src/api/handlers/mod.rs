//! HTTP request handlers for the admin API.
//!
//! - [`restart`]: request, cancel, and inspect restart attempts

pub mod restart;
