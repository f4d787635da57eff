use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for simulator telemetry sinks.
pub struct SimulationTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
}

impl SimulationTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<SimulationTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(SimulationTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared across simulators. Clones write to the same sink.
#[derive(Clone)]
pub struct SimulationTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SimulationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
}

impl SimulationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SimulationTelemetryBuilder {
        SimulationTelemetryBuilder::new(module)
    }

    /// Module label attached to every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs a record with JSON metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("sim.log");
        let telemetry = SimulationTelemetry::builder("simulators")
            .log_path(&log_path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "simulation.sample.start", json!({ "seed": 1 }))
            .unwrap();
        let records = shared_logging::read_records(&log_path).unwrap();
        assert_eq!(records[0].module, "simulators");
        assert_eq!(records[0].metadata["seed"], json!(1));
    }

    #[test]
    fn telemetry_without_sink_is_a_no_op() {
        let telemetry = SimulationTelemetry::builder("simulators").build().unwrap();
        telemetry
            .log(LogLevel::Error, "simulation.sample.failed", Value::Null)
            .unwrap();
        assert_eq!(telemetry.module(), "simulators");
    }
}
