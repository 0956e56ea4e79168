//! Caching, team ownership and issue hierarchy engine for a customer issue
//! portal backed by Linear.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod invalidation;
pub mod linear;
pub mod logging;
pub mod ownership;
pub mod service;
pub mod store;

pub use error::EngineError;
pub use service::{ApiResponse, PortalService};
