//! Crownex: a multi-tenant trading platform.
//!
//! The core is a decision-and-execution kernel fusing three subsystems into
//! one transactional pipeline: an in-process AMM + order-book exchange, a
//! multi-strategy technical-analysis engine, and an auto-trading scheduler
//! that routes signed orders to external venues. A single gateway funnels
//! every authenticated operation through rate limiting, persistence and
//! event publication.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod server;
