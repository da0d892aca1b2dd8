//! Administrative HTTP surface for the restart lifecycle.
//!
//! - **[`handlers`]**: Axum route handlers mounted under `/admin/api/v1`
//! - **[`models`]**: Request/response bodies
//!
//! These routes are not subject to admission control, so operators can watch and cancel a
//! restart while the service itself is turning requests away.

pub mod handlers;
pub mod models;
