//! recon-core — multi-gateway payment reconciliation.
//!
//! Ingests payment observations from independent gateways and reconciles
//! them against registrations created through a separate booking flow.
//!
//! RULES:
//!   - Only the store module talks to the database.
//!   - Canonical time is i64 epoch-seconds; the normalizer is the single
//!     place raw source timestamps are converted.
//!   - Components report per-item outcomes; one bad item never fails a batch.

pub mod config;
pub mod entities;
pub mod error;
pub mod event;
pub mod import_queue;
pub mod inventory;
pub mod matcher;
pub mod normalizer;
pub mod repair;
pub mod store;
pub mod types;
pub mod version_ledger;
