//! The Occupancy Control Engine: a capacity-bounded admission controller,
//! removal-score ranker, auto-exit sweeper, occupancy forecaster, and
//! notification hub, wired together under a single space-wide lock.
//!
//! `admission::Engine` is the composition root; `facade::Facade` is the
//! validated request surface most callers should use; `http` exposes that
//! surface over HTTP/WebSocket for the `occ-server` binary.

pub mod admission;
pub mod config;
pub mod directory;
pub mod error;
pub mod event_log;
pub mod facade;
pub mod forecaster;
pub mod http;
pub mod model;
pub mod notifications;
pub mod persistence;
pub mod ranker;
pub mod session_registry;
pub mod status_scheduler;
pub mod sweeper;

pub use admission::{Engine, ScanOutcome};
pub use error::ScanError;
pub use facade::Facade;
