//! Logging facade for the actor runtime.
//!
//! Built on the `tracing` ecosystem. [`init`] installs a process-global
//! subscriber exactly once; when the embedding application already installed
//! its own subscriber, runtime events flow through that instead and
//! [`set_level`] becomes a no-op.

use std::sync::{Once, OnceLock};

use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{fmt, prelude::*, reload};

/// Configuration for the runtime's own subscriber.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level to emit.
    pub level: Level,
    /// Emit JSON lines instead of the human-readable format.
    pub json_format: bool,
    /// Include the event target (module path).
    pub show_target: bool,
    /// Include thread names and ids.
    pub show_thread_info: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_target: true,
            show_thread_info: false,
        }
    }
}

static INIT: Once = Once::new();
static RELOAD: OnceLock<reload::Handle<LevelFilter, Registry>> = OnceLock::new();

/// Install the runtime's global subscriber with the given configuration.
///
/// Safe to call more than once; only the first call has any effect. Does
/// nothing when another subscriber is already installed globally.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let (filter, handle) = reload::Layer::new(LevelFilter::from_level(config.level));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                Registry::default()
                    .with(filter)
                    .with(fmt::layer().json().flatten_event(true)),
            )
        } else {
            Box::new(
                Registry::default().with(filter).with(
                    fmt::layer()
                        .with_target(config.show_target)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        };

        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            let _ = RELOAD.set(handle);
        }
    });
}

/// Install the runtime's subscriber with the default configuration.
pub fn init_default() {
    init(LogConfig::default());
}

/// Adjust the minimum level at runtime.
///
/// No-op when the global subscriber was installed by the embedding
/// application rather than by [`init`].
pub fn set_level(level: Level) {
    if let Some(handle) = RELOAD.get() {
        let _ = handle.modify(|filter| *filter = LevelFilter::from_level(level));
    }
}

/// Emit a final sync note. `tracing` format layers write through, so this
/// only marks the flush point in the stream.
pub fn flush() {
    tracing::info!(service = crate::SERVICE, "log sync");
}
