//! coderipper execution service
//!
//! Accepts code submissions over HTTP and runs them on one of three
//! interchangeable backends: directly on the host (local dev), inside a
//! Docker container, or as a Kubernetes Job. The cluster-side pod admission
//! validator ships as a second binary and shares the policy module.

pub mod admission;
pub mod auth;
pub mod badge;
pub mod config;
pub mod metrics;
pub mod rate_limit;
pub mod runner;
pub mod server;
pub mod storage;
pub mod submission;
pub mod transport;
