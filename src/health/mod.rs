//! Dependency health monitoring

pub mod monitor;

pub use monitor::{
    HealthCheckResult, HealthConfig, HealthMetrics, HealthMonitor, HealthProbe, HealthStatus,
};
