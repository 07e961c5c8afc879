//! Bunyan-formatted structured logging for the host application.

use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{Error, Result};

pub fn get_subscriber<Sink>(
    name: String,
    env_filter: String,
    sink: Sink,
) -> impl Subscriber + Sync + Send
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // RUST_LOG wins over the caller supplied default filter.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let formatting_layer = BunyanFormattingLayer::new(name, sink);

    // JsonStorageLayer keeps span fields around so the bunyan layer can emit them.
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Installs `subscriber` as the process-wide default. Call once at startup.
pub fn init_subscriber(subscriber: impl Subscriber + Sync + Send) -> Result<()> {
    // Route `log` records from sqlx and friends into tracing.
    LogTracer::init().map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;
    set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set subscriber: {}", e)))?;

    Ok(())
}
