//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `listener` - TCP listener for NDJSON client updates
//! - `alerts` - Alert feed and incident egress (JSONL format)
//! - `http` - Prometheus metrics and dashboard query endpoints

pub mod alerts;
pub mod http;
pub mod listener;

// Re-export commonly used types
pub use alerts::AlertEgress;
pub use http::{start_http_server, HttpContext};
pub use listener::{start_update_listener, UpdateListenerConfig};
