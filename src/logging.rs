use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "DOCFLOW_LOG";

/// Filter directive: `DOCFLOW_LOG` if set, else `debug` when verbose and
/// `info` otherwise.
pub fn filter_directive(env_value: Option<String>, verbose: bool) -> String {
    env_value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free
/// for event output.
pub fn init(verbose: bool) {
    let directive = filter_directive(std::env::var(LOG_ENV).ok(), verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_wins_over_verbose() {
        assert_eq!(filter_directive(Some("docflow=trace".into()), false), "docflow=trace");
        assert_eq!(filter_directive(None, true), "debug");
        assert_eq!(filter_directive(None, false), "info");
        assert_eq!(filter_directive(Some("  ".into()), false), "info");
    }
}
