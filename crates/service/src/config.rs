//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use event_bus::{BusConfig, RetryPolicy};
use saga::SagaConfig;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `METRICS_ADDR`: Prometheus listener (default: `0.0.0.0:9000`)
/// - `BUS_MAX_ATTEMPTS`: delivery attempts per subscriber (default: `5`)
/// - `BUS_BACKOFF_BASE_MS` / `BUS_BACKOFF_MAX_MS`: redelivery backoff
///   (default: `50` / `5000`)
/// - `HANDLER_DEADLINE_MS`: per-delivery deadline (default: `10000`)
/// - `GATEWAY_DEADLINE_MS`: payment gateway deadline (default: `5000`),
///   capped at three quarters of the handler deadline
/// - `DEMO_ORDERS`: orders placed by the demo run (default: `4`)
///
/// Values that fail to parse fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
    pub bus_max_attempts: u32,
    pub bus_backoff_base: Duration,
    pub bus_backoff_max: Duration,
    pub handler_deadline: Duration,
    pub gateway_deadline: Duration,
    pub demo_orders: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parse(key).map(Duration::from_millis).unwrap_or(default)
        };

        let handler_deadline = millis("HANDLER_DEADLINE_MS", defaults.handler_deadline);
        let gateway_deadline = millis("GATEWAY_DEADLINE_MS", defaults.gateway_deadline)
            .min(SagaConfig::max_gateway_deadline(handler_deadline));

        Self {
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            metrics_addr: lookup("METRICS_ADDR")
                .and_then(|a| a.trim().parse().ok())
                .unwrap_or(defaults.metrics_addr),
            bus_max_attempts: parse("BUS_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.bus_max_attempts),
            bus_backoff_base: millis("BUS_BACKOFF_BASE_MS", defaults.bus_backoff_base),
            bus_backoff_max: millis("BUS_BACKOFF_MAX_MS", defaults.bus_backoff_max),
            handler_deadline,
            gateway_deadline,
            demo_orders: parse("DEMO_ORDERS")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.demo_orders),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            retry: RetryPolicy {
                max_attempts: self.bus_max_attempts,
                base_delay: self.bus_backoff_base,
                max_delay: self.bus_backoff_max,
                ..RetryPolicy::default()
            },
            handler_deadline: self.handler_deadline,
            ..BusConfig::default()
        }
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            gateway_deadline: self.gateway_deadline,
            ..SagaConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let bus = BusConfig::default();
        let saga = SagaConfig::default();

        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            bus_max_attempts: bus.retry.max_attempts,
            bus_backoff_base: bus.retry.base_delay,
            bus_backoff_max: bus.retry.max_delay,
            handler_deadline: bus.handler_deadline,
            gateway_deadline: saga.gateway_deadline,
            demo_orders: 4,
        }
    }
}
