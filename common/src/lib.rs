//! Shared entry point for the scpup binaries.
//!
//! [`run`] sets up logging, builds the tokio runtime, runs the tool's main
//! future and reports its outcome the same way for every tool.

mod config;

pub use config::{OutputConfig, RuntimeConfig};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// RUST_LOG, when set, wins over the verbosity flags
fn make_filter(output: &OutputConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = output
        .level()
        .map_or(LevelFilter::OFF, LevelFilter::from_level);
    EnvFilter::default().add_directive(level.into())
}

fn init_tracing(output: &OutputConfig) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    // try_init: tests may call run() more than once in the same process
    let _ = tracing_subscriber::registry()
        .with(make_filter(output))
        .with(fmt_layer)
        .try_init();
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    Ok(builder.build()?)
}

/// Runs `func` on a fresh runtime.
///
/// Returns `None` if the tool failed; the error has already been logged. On
/// success the summary is printed when requested.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    if let Err(error) = output.validate() {
        eprintln!("{error}");
        return None;
    }
    init_tracing(&output);
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Failed to start runtime: {error:#}");
            return None;
        }
    };
    let result = runtime.block_on(func());
    match result {
        Ok(summary) => {
            if output.wants_summary() {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            // filtered out entirely with --quiet
            tracing::error!("{:#}", error);
            None
        }
    }
}
