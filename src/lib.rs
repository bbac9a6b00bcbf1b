//! # Commvault Exporter
//!
//! A multi-target Prometheus exporter for Commvault backup servers, built on
//! the blackbox-exporter probe pattern: Prometheus scrapes
//! `/probe?target=<name>` and every request collects a fresh snapshot from
//! the named CommServe.
//!
//! ## Overview
//!
//! Each probe:
//!
//! - resolves the target in the [`targets::TargetRegistry`]
//! - obtains a session token from the [`session::SessionManager`], logging in
//!   at most once at a time per target
//! - fetches jobs, VM/SQL client status and system info concurrently through
//!   the [`client::CommvaultClient`]
//! - maps each successful category to samples ([`mapper`]) and assembles a
//!   request-scoped [`metrics::ProbeRegistry`]
//! - renders it in the Prometheus text format ([`exposition`])
//!
//! A failing category only removes its own metrics and sets
//! `commvault_scrape_success` to 0; the probe still answers with HTTP 200.
//!
//! ## Quick Start
//!
//! ```no_run
//! use commvault_exporter::{config::Settings, probe::Prober, server::start_server, targets::TargetRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(Some("config/config.toml"))?;
//!
//!     let targets = TargetRegistry::from_settings(&settings);
//!     let prober = Prober::new(targets, settings.probe.clone())?;
//!
//!     start_server(&settings.exporter.listen_address, prober).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter can be configured via:
//! - TOML configuration file
//! - Environment variables (with `COMMVAULT_EXPORTER__` prefix)
//! - Command-line arguments
//!
//! See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`client`] - Commvault API client and response schemas
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`exposition`] - Prometheus text encoding
//! - [`mapper`] - Payload to metric sample mapping
//! - [`metrics`] - Metric samples and the per-probe registry
//! - [`probe`] - Probe orchestration
//! - [`server`] - HTTP server for the probe endpoint
//! - [`session`] - Session token cache
//! - [`targets`] - Target registry

pub mod client;
pub mod config;
pub mod error;
pub mod exposition;
pub mod mapper;
pub mod metrics;
pub mod probe;
pub mod server;
pub mod session;
pub mod targets;

pub use error::{CommvaultError, Result};
