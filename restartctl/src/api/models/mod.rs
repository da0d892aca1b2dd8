//! Request and response bodies for the admin API.

pub mod restart;
