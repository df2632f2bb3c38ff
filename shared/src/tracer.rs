use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::{runtime, trace, Resource};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use tokio::time;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// # PANICS
///
/// when failing to initialize tracing or set globals
///
/// # TRACING INIT
///
/// This should be a part of your application bootstrap code, before any code
/// that uses the tracing crate is called
///
/// Starts the tracing module with a open telemetry layer that will export the
/// spans to a OTLP GRPC endpoint (default port 4317), keep in mind that traces
/// are filtered using tracing_subscriber::EnvFilter
///
/// this will set the following globals:
///
/// - opentelemetry::global::set_text_map_propagator
/// - opentelemetry::global::set_tracer_provider
/// - global tracing subscriber (https://docs.rs/tracing/0.1.21/tracing/dispatcher/index.html#setting-the-default-subscriber)
///
pub fn init_tracing_with_otel(service_name: String, with_std_out_layer: bool) {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(trace::config().with_resource(Resource::new(vec![KeyValue::new(
            SERVICE_NAME,
            service_name.clone(),
        )])))
        .install_batch(runtime::Tokio)
        .expect("failed to initialize tracer");

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let stdout_layer = if with_std_out_layer {
        Some(tracing_subscriber::fmt::Layer::default())
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(stdout_layer)
        .with(otel_layer)
        .init();

    println!("[TRACER] initialized as service: {}", service_name);
}

/// async wrapper for `opentelemetry::global::shutdown_tracer_provider()` because it might hang forever
///
///  see: https://github.com/open-telemetry/opentelemetry-rust/issues/868
async fn shutdown_trace_provider() {
    println!("[TRACER] shutting down");
    opentelemetry::global::shutdown_tracer_provider();
}

/// # TRACING SHUTDOWN
///
/// Shutdowns tracing with a 5 second timeout to export all non exported spans.
///
/// basically a wrapper for opentelemetry::global::shutdown_tracer_provider()
pub async fn shutdown() {
    tokio::select! {
        _ = time::sleep(time::Duration::from_secs(5)) => {
            eprintln!("[TRACER] gracefull shutdown failed");
        },
        _ = tokio::task::spawn_blocking(shutdown_trace_provider) => {
            println!("[TRACER] gracefull shutdown ok");
        }
    }
}
