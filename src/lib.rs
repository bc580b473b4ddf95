//! Read-through, self-warming view cache for dashboard read endpoints.

pub mod cache;
pub mod config;
pub mod http;
pub mod infra;
