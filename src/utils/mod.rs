//! # Utility Modules
//!
//! Supporting utilities for deadlines, logging and metrics.
//!
//! ## Components
//! - **Timeout**: Fresh per-operation deadlines and the wrapper that enforces them
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;
pub mod timeout;
