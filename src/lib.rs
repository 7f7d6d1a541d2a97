//! dlkeeper core library
//!
//! Durable download jobs: each submitted URL and expected digest becomes a
//! row in SQLite that a worker drives to a terminal state. Workers download,
//! verify the digest, probe media metadata, and retry failed attempts up to a
//! ceiling. Jobs interrupted by a restart are picked up again by recovery.
//!
//! # Architecture
//!
//! - [`db`] - Database connection, WAL setup, and migrations
//! - [`jobs`] - Job rows and the guarded state-transition writes
//! - [`checksum`] - Expected-digest parsing and streaming file digests
//! - [`transfer`] - HTTP transfer with progress counters and resume
//! - [`probe`] - `ffprobe` metadata extraction
//! - [`claim`] - Cross-process job ownership via file locks
//! - [`controller`] - Per-job attempt loop
//! - [`supervisor`] - Worker launching and crash recovery
//! - [`service`] - Submission and status facade
//! - [`config`] - Config file parsing and settings resolution

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checksum;
pub mod claim;
pub mod config;
pub mod controller;
pub mod db;
pub mod jobs;
pub mod probe;
pub mod service;
pub mod supervisor;
pub mod transfer;

// Re-export commonly used types
pub use checksum::{ChecksumError, DigestAlgorithm, ExpectedDigest, digest_file};
pub use claim::{ClaimError, JobClaim};
pub use config::{Overrides, Settings};
pub use controller::{ControllerError, ControllerSettings, JobController, JobOutcome};
pub use db::{Database, DatabaseOptions, DbError};
pub use jobs::{Job, JobRepository, JobState, JobStore, StoreError};
pub use probe::{FfprobeProber, MediaInfo, NoopProber, ProbeError, Prober};
pub use service::{JobLookup, JobService, ServiceError};
pub use supervisor::{JobRunner, RecoverySupervisor, WorkerError, WorkerHandle};
pub use transfer::{HttpTransfer, HttpTransferSettings, Transfer, TransferError};
