//! Subscriber installation.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace::{Config as TraceConfig, TracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Config;

const SERVICE_NAME: &str = "filedrop";

/// Installs the global tracing subscriber.
///
/// Idempotent: when a global subscriber is already set, the call does
/// nothing.
///
/// # Example
///
/// ```rust
/// use filedrop::observability::init_tracing;
/// use filedrop::Config;
///
/// let config = Config {
///     trace_level: Some("debug".to_string()),
///     ..Config::default()
/// };
/// init_tracing(&config);
///
/// tracing::debug!("tracing is now active");
/// ```
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.trace_level.as_deref().unwrap_or("info"))
    });

    let resource = Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)]);
    let provider = TracerProvider::builder()
        .with_config(TraceConfig::default().with_resource(resource))
        .build();
    let otel_layer = OpenTelemetryLayer::new(provider.tracer(SERVICE_NAME));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer);

    if subscriber.try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
