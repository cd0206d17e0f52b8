/*!
Logging and profiling setup for the command-line front end.

Logs go to stderr so stdout only carries command output. When built with
the `profiling` feature and `ENABLE_PROFILING` is set, a chrome tracing
layer records spans to a `trace-*.json` file that is flushed when the
returned guard is dropped.
*/

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Keeps the profiling output alive until the end of `main`
#[derive(Default)]
pub struct LoggingGuard {
    #[cfg(feature = "profiling")]
    _chrome: Option<tracing_chrome::FlushGuard>,
}

/// Default filter used when `RUST_LOG` is unset
fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Initialize the global subscriber; call once at startup
pub fn setup_logging() -> LoggingGuard {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", default_filter());
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    #[cfg(feature = "profiling")]
    {
        let (chrome_layer, guard) = if std::env::var("ENABLE_PROFILING").is_ok() {
            let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new().build();
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };
        let enabled = chrome_layer.is_some();

        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();

        if enabled {
            tracing::info!("Tracing initialized with chrome profiling layer");
        }
        LoggingGuard { _chrome: guard }
    }

    #[cfg(not(feature = "profiling"))]
    {
        tracing_subscriber::registry().with(fmt_layer).init();
        LoggingGuard::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_is_valid() {
        assert!(EnvFilter::try_new(default_filter()).is_ok());
    }
}
