//! HTTP API over the cache registry.

pub mod cache;
pub mod error;
pub mod middleware;
pub mod movies;
pub mod routes;
pub mod status;
pub mod user;

pub use routes::*;
