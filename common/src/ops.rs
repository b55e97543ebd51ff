// Operational triggers
// Force a validation pass plus a scheduler tick, and report loop state.

use crate::errors::OpsError;
use crate::models::Platform;
use crate::scheduler::{FlagStatus, Scheduler, SchedulerEngine, TickReport};
use crate::validator::{StatusValidator, ValidationReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpsReport {
    pub validation: ValidationReport,
    pub tick: TickReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpsStatus {
    pub tick_flag: FlagStatus,
    /// Circuit state per configured platform
    pub circuits: BTreeMap<Platform, &'static str>,
}

#[derive(Clone)]
pub struct Operations {
    engine: Arc<SchedulerEngine>,
    validator: Arc<StatusValidator>,
}

impl Operations {
    pub fn new(engine: Arc<SchedulerEngine>, validator: Arc<StatusValidator>) -> Self {
        Self { engine, validator }
    }

    /// One validation pass, then one tick, both awaited
    ///
    /// The tick goes through the same flag as the loop, so it reports
    /// `skipped` when a loop tick is in flight.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<OpsReport, OpsError> {
        let validation = self.validator.run_pass().await.map_err(OpsError::Validation)?;
        let tick = self.engine.run_tick().await?;
        info!(
            corrected = validation.corrected,
            published = tick.published,
            skipped = tick.skipped,
            "Run-once cycle completed"
        );
        Ok(OpsReport { validation, tick })
    }

    pub fn status(&self) -> OpsStatus {
        let registry = self.engine.registry();
        let circuits = registry
            .platforms()
            .into_iter()
            .filter_map(|platform| {
                registry
                    .route(platform)
                    .map(|route| (platform, route.circuit.state().as_str()))
            })
            .collect();

        OpsStatus {
            tick_flag: self.engine.guard().status(),
            circuits,
        }
    }
}
