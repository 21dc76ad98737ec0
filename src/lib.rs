//! CEP Geocoder Library
//!
//! Resolves Brazilian customer addresses to validated coordinates through a
//! cascade of geocoding providers, and runs that resolution over a whole
//! customer base as a resumable, rate-limited batch job.
//!
//! # Modules
//!
//! - `normalizer`: Address cleaning, CEP cleaning and cache keys.
//! - `models`: Core data models.
//! - `providers`: Provider contract and HTTP clients (Google, OpenCage, Nominatim, BrasilAPI, AwesomeAPI).
//! - `registry`: Ordered provider catalog.
//! - `validator`: National and per-state bounding boxes.
//! - `city_table`: Static coordinates for capitals and large cities.
//! - `rate_limiter`: Sliding-window admission, backoff and retries.
//! - `circuit_breaker`: Per-provider circuit breakers.
//! - `cache`: Geocode cache (in-memory and Postgres).
//! - `resolver`: Per-record provider cascade with fallbacks.
//! - `regions`: Region detection and processing order.
//! - `progress`: Batch counters, breakdowns and observers.
//! - `integrity`: Checksum envelope for persisted snapshots.
//! - `checkpoint`: Checkpoint persistence for resume.
//! - `store`: Customer record store.
//! - `orchestrator`: Batch runs.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.

pub mod cache;
pub mod checkpoint;
pub mod circuit_breaker;
pub mod city_table;
pub mod config;
pub mod db;
pub mod errors;
pub mod integrity;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod rate_limiter;
pub mod regions;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod validator;
