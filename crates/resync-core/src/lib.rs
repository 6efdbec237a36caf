//! resync-core
//!
//! Offline-resilient generation request queue and sync engine.
//!
//! # Modules
//! - **domain**: ids, requests, artifacts, errors
//! - **ports**: seams to the outside (storage, generation service, credentials, clock, ids)
//! - **store**: persistent artifacts, sync queue and dead letters
//! - **app**: retry, client, poller, connectivity, submission, sync engine, runtime
//! - **impls**: file / memory backends, HTTP and scripted services, probe, env credentials
//! - **config**: `RESYNC_*` environment configuration
//! - **observability**: store counts

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod store;
