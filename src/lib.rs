//! Ratekeeper - In-Process Admission Control Service
//!
//! This crate decides whether to admit or reject requests under per-route
//! rate policies. Per-client limiter state lives in a sharded, expiring
//! in-memory store shared by every limiter, and each check is a single
//! atomic read-modify-write against that store.

pub mod config;
pub mod error;
pub mod http;
pub mod policy;
pub mod ratelimit;
pub mod storage;
