//! InfraFlow Engine
//!
//! Ties the state store, discovery, dependency graph and conflict resolver
//! together into a reconciliation cycle.
//!
//! ```no_run
//! use infraflow_discovery::SnapshotLister;
//! use infraflow_engine::{Reconciler, setup};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> infraflow_engine::Result<()> {
//! let (config, _) = infraflow_config::load_or_default()?;
//! let store = Arc::new(setup::state_store(&config)?);
//! store.load_state().await?;
//!
//! let lister = Arc::new(SnapshotLister::new("live.json"));
//! let reconciler = Reconciler::from_config(&config, store, lister);
//! let report = reconciler.run(&CancellationToken::new()).await?;
//! println!("{} drifted", report.drift.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod reconciler;
pub mod setup;

pub use error::{EngineError, Result};
pub use reconciler::{ApplySummary, DeploymentPlan, ReconcileReport, Reconciler};
