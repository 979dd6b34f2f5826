//! Middleware applied to every API route.

pub mod request_id;
