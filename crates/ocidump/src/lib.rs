//! # ocidump
//!
//! The core library behind the `oci-resource-dump` CLI: concurrent,
//! timeout-bounded discovery of the resources in an OCI tenancy, plus the
//! offline diff engine over two discovery snapshots.
//!
//! ## Features
//!
//! - **Bounded fan-out** — one task per compartment, capped by a semaphore
//!   sized for typical per-tenant API rate limits, with the enabled
//!   resource-type probes running sequentially inside each slot.
//! - **Deadline obedience** — a single global deadline that every remote
//!   call, retry sleep, and opaque bootstrap call races against; nothing
//!   outlives it.
//! - **Governed retries** — transient failures (timeouts, resets, 5xx,
//!   throttles) retry under exponential backoff with jitter; permanent
//!   failures surface immediately and degrade only their own probe.
//! - **Early filtering** — compartment, resource-type, and name filters
//!   trim work at the earliest possible stage; a filtered-out resource
//!   never costs an enrichment call.
//! - **Name caching** — compartment identifiers resolve to display names
//!   through a per-run cache with double-checked locking and an adaptive
//!   preload.
//! - **Snapshot diffing** — a pure comparator producing added / removed /
//!   modified / unchanged partitions with per-field change records.
//!
//! ## Pipeline
//!
//! The core flow is **configure → discover → emit**, with diffing as an
//! offline second mode:
//!
//! 1. [`config::EffectiveConfig::resolve`] merges defaults, the YAML config
//!    file, and explicitly-set CLI flags.
//! 2. [`engine::discover`] enumerates compartments, preloads the name
//!    cache, and fans probes out over the surviving
//!    (compartment x resource-type) pairs.
//! 3. [`output::emit`] writes the snapshot as JSON, CSV, or TSV.
//! 4. [`diff::compare_files`] compares two emitted snapshots.
//!
//! ## Modules
//!
//! - [`types`] — Domain types: resource records, compartments, snapshots
//! - [`config`] — Config file loading and the explicit-flag merge
//! - [`filter`] — The three-stage filter pipeline
//! - [`cache`] — Compartment name resolution
//! - [`client`] — The abstract seam over the remote API
//! - [`probes`] — The per-resource-type probe catalog and driver
//! - [`engine`] — The discovery fan-out itself
//! - [`output`] — Snapshot emitters
//! - [`diff`] — The snapshot diff engine
//! - [`rest`] — Default REST bindings behind the client seam

/// Domain types: resource records, compartments, snapshots.
pub mod types;

/// Config file loading and the explicit-flag merge.
pub mod config;

/// The three-stage filter pipeline.
pub mod filter;

/// Compartment name resolution with double-checked locking.
pub mod cache;

/// The abstract seam over the remote API.
pub mod client;

/// The per-resource-type probe catalog and driver.
pub mod probes;

/// The discovery fan-out engine.
pub mod engine;

/// Snapshot emitters: JSON, CSV, TSV.
pub mod output;

/// The snapshot diff engine.
pub mod diff;

/// Default REST bindings behind the client seam.
pub mod rest;

/// Retry governance: classification, backoff, deadlines.
/// Re-exported from the ocidump-retry microcrate.
pub use ocidump_retry as retry;

/// Discovery progress tracking.
/// Re-exported from the ocidump-progress microcrate.
pub use ocidump_progress as progress;

/// In-memory client fixtures shared by the test modules.
#[cfg(test)]
pub(crate) mod testutil;
