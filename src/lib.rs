//! Orderwatch - Conditional Trading Mission Scheduler
//!
//! A durable, crash-tolerant scheduler for conditional trading missions:
//! deferred actions ("swap once the price drops below X") that wait on
//! market conditions and execute exactly one settled outcome per attempt.
//!
//! - **Durable**: missions are plain store records; a process restart
//!   loses nothing and resumes the backlog immediately
//! - **Multi-worker safe**: claiming is an atomic lease, every outcome
//!   write re-checks ownership, and a reaper recovers abandoned leases
//! - **At-least-once**: a crash between execution and settlement means
//!   re-execution, never lost state; the execution service is required to
//!   be idempotent
//!
//! # Architecture
//!
//! The service is organized into several key modules:
//!
//! - [`config`]: Configuration management
//! - [`domain`]: The mission record and its state vocabulary
//! - [`store`]: Durable mission repository with conditional-write semantics
//! - [`market`]: Price oracle and token resolution collaborators
//! - [`execution`]: Swap execution, credentials, and activity recording
//! - [`scheduler`]: Admission, claiming, evaluation, dispatch, and loops
//! - [`api`]: HTTP API endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use orderwatch::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::default();
//!     let (app, _scheduler) = create_app(&config, store, collaborators);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod domain;
pub mod execution;
pub mod market;
pub mod scheduler;
pub mod server;
pub mod store;

use std::sync::Arc;

use scheduler::AdmissionController;
use store::MissionStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Mission repository.
    pub store: Arc<dyn MissionStore>,
    /// Mission admission (validation, target resolution, capped insert).
    pub admission: Arc<AdmissionController>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &"MissionStore")
            .field("admission", &self.admission)
            .finish()
    }
}
