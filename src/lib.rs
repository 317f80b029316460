pub mod api;
pub mod auth;
pub mod billing;
pub mod cli;
pub mod config;
pub mod notion;
