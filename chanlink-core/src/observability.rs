//! Logging, tracing and metrics bootstrap
//!
//! chanlink itself only emits `tracing` events and OpenTelemetry instruments.
//! Applications that want them exported call [`init_observability`] once at
//! startup and [`shutdown_observability`] before exit.
//!
//! Three pillars can be toggled independently:
//!
//! - **Traces**: `tracing` spans exported over OTLP/gRPC
//! - **Metrics**: the global meter provider used by `ClientMetrics`, exported
//!   over OTLP/gRPC every 30 seconds
//! - **Logs**: a local JSON log layer on stdout
//!
//! The level filter comes from `RUST_LOG` when set, otherwise from
//! [`ObservabilityConfig::log_level`].
//!
//! ```rust,no_run
//! use chanlink_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("orders-dashboard")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("chanlink_client=debug,info");
//!
//!     chanlink_core::init_observability(config).expect("observability");
//!     // ... run the channel client ...
//!     chanlink_core::shutdown_observability();
//! }
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

// Providers installed by `init_observability`, kept so shutdown can flush them
static INSTALLED: Mutex<Option<Providers>> = Mutex::new(None);

#[derive(Default)]
struct Providers {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

/// Telemetry settings for an application embedding chanlink
///
/// Defaults: service name `chanlink`, the crate version, the endpoint from
/// `OTEL_EXPORTER_OTLP_ENDPOINT` (falling back to `http://localhost:4317`),
/// every pillar enabled and the level from `RUST_LOG` or `info`.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// `service.name` resource attribute
    pub service_name: String,
    /// `service.version` resource attribute
    pub service_version: String,
    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,
    /// Export spans
    pub enable_traces: bool,
    /// Install the global meter provider
    pub enable_metrics: bool,
    /// Emit local JSON logs
    pub enable_logs: bool,
    /// Level filter directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "chanlink".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Defaults with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the fallback level filter directive
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Toggle span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Toggle the global meter provider
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Toggle local JSON logs
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    /// Whether any exporter needs a collector
    pub fn needs_collector(&self) -> bool {
        self.enable_traces || self.enable_metrics
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the tracing subscriber and the enabled OpenTelemetry providers
///
/// Call once per process. Fails if the collector exporters cannot be built,
/// the level directive does not parse, or a global subscriber is already set.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let mut providers = Providers::default();

    let tracer = if config.enable_traces {
        let (provider, tracer) = build_tracer(&config)?;
        global::set_tracer_provider(provider.clone());
        providers.tracer = Some(provider);
        Some(tracer)
    } else {
        None
    };

    if config.enable_metrics {
        let provider = build_meter(&config)?;
        global::set_meter_provider(provider.clone());
        providers.meter = Some(provider);
    }

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
    let json_layer = config.enable_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(json_layer)
        .try_init()?;

    if let Ok(mut installed) = INSTALLED.lock() {
        *installed = Some(providers);
    }

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "observability initialized"
    );
    Ok(())
}

fn build_tracer(config: &ObservabilityConfig) -> Result<(SdkTracerProvider, Tracer), BoxError> {
    use opentelemetry::trace::TracerProvider as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();
    let tracer = provider.tracer(config.service_name.clone());
    Ok((provider, tracer))
}

fn build_meter(config: &ObservabilityConfig) -> Result<SdkMeterProvider, BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build())
}

/// Flush and shut down the providers installed by [`init_observability`]
///
/// Safe to call more than once; later calls find nothing to shut down.
pub fn shutdown_observability() {
    let providers = match INSTALLED.lock() {
        Ok(mut installed) => installed.take(),
        Err(_) => None,
    };
    let Some(providers) = providers else {
        return;
    };

    tracing::info!("shutting down observability");
    if let Some(tracer) = providers.tracer {
        if let Err(e) = tracer.shutdown() {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
    }
    if let Some(meter) = providers.meter {
        if let Err(e) = meter.shutdown() {
            tracing::warn!(error = %e, "meter provider shutdown failed");
        }
    }
}
