//! Structured logging system with tracing
//!
//! Provides configurable logging with JSON output and slow operation logging

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Slow operations kept in memory for reporting
const MAX_SLOW_OPERATIONS: usize = 1000;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,

    /// Enable JSON format output
    pub json_format: bool,

    /// Enable slow operation logging
    pub slow_operation_logging: bool,

    /// Slow operation threshold in milliseconds
    pub slow_operation_threshold_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
            slow_operation_logging: true,
            slow_operation_threshold_ms: 100,
        }
    }
}

impl LoggingConfig {
    /// Parse log level from string
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.level.to_uppercase().as_str() {
            "ERROR" | "WARN" | "INFO" | "DEBUG" | "TRACE" => Ok(()),
            other => Err(StoreError::Config(format!("unknown log level '{}'", other))),
        }
    }
}

/// Initialize the logging system
///
/// Logs go to stderr. `RUST_LOG` takes precedence over the configured level. Calling this
/// twice in one process returns [`StoreError::Config`].
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let subscriber = Registry::default().with(env_filter);

    let result = if config.json_format {
        let json_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true);
        subscriber.with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .compact();
        subscriber.with(fmt_layer).try_init()
    };
    result.map_err(|e| StoreError::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        "Logging initialized: level={}, json={}, slow_operations={}",
        config.level,
        config.json_format,
        config.slow_operation_logging
    );

    Ok(())
}

/// Slow operation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowOperation {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub operation: String,
    pub database: String,
    pub collection: String,
}

/// Collects operations that exceeded the configured threshold
#[derive(Debug)]
pub struct SlowOperationLog {
    threshold: Duration,
    enabled: bool,
    operations: RwLock<Vec<SlowOperation>>,
}

impl SlowOperationLog {
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            operations: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(
            Duration::from_millis(config.slow_operation_threshold_ms),
            config.slow_operation_logging,
        )
    }

    /// Start timing an operation; the timer reports itself when dropped
    pub fn start(
        self: &Arc<Self>,
        operation: &'static str,
        database: &str,
        collection: &str,
    ) -> OperationTimer {
        OperationTimer {
            start_time: Instant::now(),
            operation,
            database: database.to_string(),
            collection: collection.to_string(),
            log: Arc::clone(self),
        }
    }

    fn record(&self, timer: &OperationTimer) {
        let duration = timer.start_time.elapsed();
        tracing::trace!(
            operation = timer.operation,
            collection = %timer.collection,
            elapsed_us = duration.as_micros() as u64,
            "operation finished"
        );

        if !self.enabled || duration < self.threshold {
            return;
        }

        let slow = SlowOperation {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            operation: timer.operation.to_string(),
            database: timer.database.clone(),
            collection: timer.collection.clone(),
        };

        tracing::warn!(
            target: "slow_operation",
            duration_ms = slow.duration_ms,
            operation = %slow.operation,
            database = %slow.database,
            collection = %slow.collection,
            "Slow operation detected"
        );

        let mut operations = self.operations.write();
        operations.push(slow);
        if operations.len() > MAX_SLOW_OPERATIONS {
            let len = operations.len();
            operations.drain(0..len - MAX_SLOW_OPERATIONS);
        }
    }

    /// Most recent slow operations, newest first
    pub fn recent(&self, limit: usize) -> Vec<SlowOperation> {
        let operations = self.operations.read();
        operations.iter().rev().take(limit).cloned().collect()
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// Times one collection operation
pub struct OperationTimer {
    start_time: Instant,
    operation: &'static str,
    database: String,
    collection: String,
    log: Arc<SlowOperationLog>,
}

impl OperationTimer {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let log = Arc::clone(&self.log);
        log.record(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "INFO");
        assert_eq!(config.parse_level(), Level::INFO);

        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_level(), Level::DEBUG);
        assert!(config.validate().is_ok());

        let config = LoggingConfig {
            level: "LOUD".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fast_operation_not_recorded() {
        let log = Arc::new(SlowOperationLog::new(Duration::from_secs(10), true));
        {
            let _timer = log.start("find_many", "shop", "orders");
        }
        assert!(log.recent(10).is_empty());
    }

    #[test]
    fn test_slow_operation_recorded() {
        let log = Arc::new(SlowOperationLog::new(Duration::ZERO, true));
        {
            let timer = log.start("update_many", "shop", "orders");
            assert_eq!(timer.operation(), "update_many");
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].operation, "update_many");
        assert_eq!(recent[0].collection, "orders");
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let log = Arc::new(SlowOperationLog::new(Duration::ZERO, false));
        drop(log.start("insert_one", "shop", "orders"));
        assert!(log.recent(10).is_empty());
    }
}
