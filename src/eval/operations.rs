//! Named timed operations.
//!
//! A minimal stopwatch keyed by operation name. Starting an operation that is
//! already running restarts it; there is no nesting.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How an operation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Failure(String),
}

/// Timing and summary fields recorded for one operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub started_at: Instant,
    pub duration: Option<Duration>,
    pub outcome: Option<OperationOutcome>,
    pub fields: Map<String, Value>,
}

impl OperationMetrics {
    fn started() -> Self {
        Self {
            started_at: Instant::now(),
            duration: None,
            outcome: None,
            fields: Map::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.duration.is_some()
    }
}

/// Collects per-operation timings.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    operations: HashMap<String, OperationMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of `name`, replacing any earlier record of it.
    pub fn start_operation(&mut self, name: &str) {
        self.operations
            .insert(name.to_string(), OperationMetrics::started());
        info!(operation = name, "starting operation");
    }

    /// Finish `name`, merging `fields` into its record.
    ///
    /// Ending an operation that was never started only logs a warning.
    pub fn end_operation(&mut self, name: &str, outcome: OperationOutcome, fields: Map<String, Value>) {
        let Some(metrics) = self.operations.get_mut(name) else {
            warn!(operation = name, "operation was not started");
            return;
        };

        let duration = metrics.started_at.elapsed();
        metrics.duration = Some(duration);
        metrics.fields.extend(fields);

        let fields = Value::Object(metrics.fields.clone());
        let duration = format!("{:.3}s", duration.as_secs_f64());

        match &outcome {
            OperationOutcome::Success => {
                info!(operation = name, %duration, success = true, %fields, "operation completed")
            }
            OperationOutcome::Failure(reason) => {
                error!(operation = name, %duration, success = false, %fields, error = %reason, "operation failed")
            }
        }

        metrics.outcome = Some(outcome);
    }

    pub fn get(&self, name: &str) -> Option<&OperationMetrics> {
        self.operations.get(name)
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }
}
