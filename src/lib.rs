//! govharvest - resumable ingestion for government award and topic portals.
//!
//! Sweeps public procurement and research-topic portals into a local store
//! of normalized, quality-scored records, tracking progress at page
//! granularity so any run can be stopped and resumed.

pub mod cli;
pub mod config;
pub mod models;
pub mod normalize;
pub mod portal;
pub mod quality;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
