//! Case Study Builder - case study authoring and approval with compliance
//! tooling
//!
//! This crate provides:
//! - Case study workflow (draft, review, publish) and a searchable library
//! - Tamper-evident, hash-chained audit log
//! - Data retention policies with scheduled cleanup
//! - GDPR erasure requests and data exports
//! - Break-glass emergency access and startup secrets validation
//! - HTTP API and operator CLI

pub mod audit;
pub mod cases;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod db;
pub mod error;
pub mod gdpr;
pub mod mail;
pub mod paths;
pub mod retention;
pub mod security;
pub mod server;
pub mod users;

pub use config::Config;
pub use error::{Error, Result};
