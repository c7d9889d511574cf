//! Credit Score API Library
//!
//! Classifies a customer's credit score (Good / Standard / Poor) with a
//! previously trained model and records every prediction in a per-day audit
//! dataset and in monitoring metrics.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: Storage and metrics backends.
//! - `audit_log`: Per-day CSV audit dataset.
//! - `circuit_breaker`: Circuit breaker for sink backends.
//! - `config`: Configuration management.
//! - `encoder`: Attribute map to feature vector.
//! - `errors`: Error handling types.
//! - `handlers`: Invocation pipeline and HTTP handlers.
//! - `invocation`: Gateway / direct event shapes.
//! - `metrics`: Monitoring metrics and backends.
//! - `models`: Core data models.
//! - `object_store`: Blob storage with conditional writes.
//! - `prediction`: Model loading and scoring.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod audit_log;
pub mod circuit_breaker;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod handlers;
pub mod invocation;
pub mod metrics;
pub mod models;
pub mod object_store;
pub mod prediction;
