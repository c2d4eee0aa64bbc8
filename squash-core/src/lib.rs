//! # squash-core
//!
//! Client library for Squash, the exception reporting and management system.
//!
//! This library provides:
//! - Occurrence records built from panics, reported errors and fatal signals
//! - A durable on-disk queue of occurrences awaiting delivery
//! - The delivery loop that drains the queue to a Squash server
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Failures flow through three stages:
//! - **Capture:** the [`Interceptor`] (or the application, via
//!   [`SquashClient::record_error`]) builds an [`Occurrence`]
//! - **Queue:** the occurrence is enriched and written to
//!   `~/.SquashOccurrences/<api key>/<uuid>` before the fault proceeds
//! - **Delivery:** [`SquashClient::report_errors`] uploads queued occurrences
//!   at a safe point, typically on the next startup
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use squash_core::{Config, Interceptor, SquashClient};
//!
//! let config = Config::load().expect("failed to load config");
//! let client = Arc::new(SquashClient::new(config.client));
//!
//! // Send anything left over from previous crashes, then start capturing.
//! client.report_errors_http().expect("failed to read occurrence queue");
//! let _interceptor = Interceptor::hook(Arc::clone(&client)).expect("failed to hook");
//! ```

// Re-export commonly used items at the crate root
pub use client::SquashClient;
pub use config::{ClientConfig, Config};
pub use delivery::ReportSummary;
pub use error::{Error, Result};
pub use interceptor::Interceptor;
pub use occurrence::{ExceptionInfo, Frame, Occurrence, OccurrenceBuilder, RawFrame};
pub use queue::OccurrenceQueue;
pub use signals::Signal;
pub use transport::{HttpTransport, Transport, TransportError};

// Public modules
pub mod client;
pub mod config;
pub mod delivery;
pub mod deploy;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod occurrence;
pub mod platform;
pub mod queue;
pub mod redact;
pub mod signals;
pub mod transport;
