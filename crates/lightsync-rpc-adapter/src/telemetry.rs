use anyhow::{bail, Context, Result};
use http::{Extensions, HeaderMap};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::task::{Context as TaskContext, Poll};
use tower::{Layer, Service};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const SERVICE_NAME: &str = "lightsync-rpc-adapter";
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://127.0.0.1:4317";
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// EnvFilter used when RUST_LOG is not set: the adapter plus the chain client
/// it drives.
pub const DEFAULT_ENV_FILTER: &str = "lightsync_rpc_adapter=info,lightsync_client=info";

/// W3C propagation headers carried from HTTP requests into RPC spans.
const TRACE_HEADERS: [&str; 3] = ["traceparent", "tracestate", "baggage"];

const INVALID_URL: &str = "<invalid-url>";

/// OpenTelemetry export settings. Export is off unless `enabled` is set.
#[derive(Debug, Clone)]
pub struct OtelSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    pub environment: String,
    pub service_version: String,
}

impl Default for OtelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: SERVICE_NAME.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Flushes pending spans on drop when OTLP export is on.
pub struct TelemetryGuard(Option<SdkTracerProvider>);

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.0.take() else {
            return;
        };
        if let Err(err) = provider.shutdown() {
            eprintln!("failed to flush spans on shutdown: {err}");
        }
    }
}

/// Install the global subscriber: env filter and stderr formatting, plus an
/// OTLP span exporter when `otel.enabled`.
pub fn init_tracing(otel: OtelSettings) -> Result<TelemetryGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_ENV_FILTER.into());

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let provider = if otel.enabled {
        let provider = otlp_tracer_provider(&otel)?;
        opentelemetry::global::set_tracer_provider(provider.clone());
        Some(provider)
    } else {
        None
    };
    let otel_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(TelemetryGuard(provider))
}

fn otlp_tracer_provider(otel: &OtelSettings) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(normalize_otlp_endpoint(&otel.endpoint)?)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_service_name(otel.service_name.clone())
        .with_attributes([
            KeyValue::new("deployment.environment.name", otel.environment.clone()),
            KeyValue::new("service.version", otel.service_version.clone()),
        ])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Accepts `host:port` or an http(s) URL and returns the URL without a
/// trailing slash.
pub fn normalize_otlp_endpoint(raw: &str) -> Result<String> {
    let url = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let parsed =
        reqwest::Url::parse(&url).with_context(|| format!("invalid OTLP endpoint: {url}"))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("unsupported OTLP endpoint scheme: {}", parsed.scheme());
    }
    if !parsed.has_host() {
        bail!("OTLP endpoint must include host");
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Scheme, host and port of `url`. Anything that could carry a secret
/// (credentials, path, query) is dropped.
pub fn sanitize_url_for_telemetry(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return INVALID_URL.to_string();
    };
    let host = parsed
        .host()
        .map(|host| host.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    }
}

/// Propagation headers copied off an HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContextHeaders {
    captured: Vec<(&'static str, String)>,
}

impl TraceContextHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let captured = TRACE_HEADERS
            .into_iter()
            .filter_map(|name| {
                let value = headers.get(name)?.to_str().ok()?;
                Some((name, value.to_owned()))
            })
            .collect();
        Self { captured }
    }

    /// Caller's trace context, when it names a valid remote span.
    fn remote_parent(&self) -> Option<opentelemetry::Context> {
        self.get("traceparent")?;
        let context = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(self)
        });
        context
            .span()
            .span_context()
            .is_valid()
            .then_some(context)
    }
}

impl Extractor for TraceContextHeaders {
    fn get(&self, key: &str) -> Option<&str> {
        self.captured
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.captured.iter().map(|(name, _)| *name).collect()
    }
}

/// HTTP middleware that stores [`TraceContextHeaders`] in the request
/// extensions for [`rpc_server_span`].
#[derive(Debug, Clone, Default)]
pub struct TraceContextLayer;

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TraceContextService<S> {
    inner: S,
}

impl<S, B> Service<http::Request<B>> for TraceContextService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        let headers = TraceContextHeaders::from_headers(request.headers());
        request.extensions_mut().insert(headers);
        self.inner.call(request)
    }
}

/// Server span for one RPC method, parented to the caller's trace when the
/// request carried one.
pub fn rpc_server_span(method: &'static str, extensions: &Extensions) -> tracing::Span {
    let span = tracing::info_span!(
        "rpc.request",
        otel.kind = "server",
        otel.name = method,
        rpc.system = "ethereum-jsonrpc",
        rpc.method = method
    );
    let parent = extensions
        .get::<TraceContextHeaders>()
        .and_then(TraceContextHeaders::remote_parent);
    if let Some(parent) = parent {
        let _ = span.set_parent(parent);
    }
    span
}
