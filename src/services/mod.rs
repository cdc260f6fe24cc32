//! Service layer for govharvest business logic.
//!
//! This module contains domain logic separated from UI concerns.
//! Services are shared by the CLI and the trigger server.

pub mod generator;
pub mod ingest;
pub mod retry;

#[allow(unused_imports)]
pub use generator::{DownstreamGenerator, GeneratorOutcome, NoopGenerator};
#[allow(unused_imports)]
pub use ingest::{IngestOptions, IngestService};
#[allow(unused_imports)]
pub use retry::{RetryOptions, RetryService, RetrySummary};
