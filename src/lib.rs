pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod provider;
pub mod services;
pub mod state;
pub mod utils;
pub mod web;
