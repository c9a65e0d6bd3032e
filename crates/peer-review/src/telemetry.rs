//! Logging setup for the binary.
//!
//! Library code only emits `tracing` events; this installs the subscriber.
//! `RUST_LOG` wins when set, otherwise `info` (or `debug` with `--verbose`).

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber. Logs go to stderr so stdout stays
/// clean for command output.
pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(verbose).into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
        assert!(EnvFilter::try_new(default_directive(true)).is_ok());
    }
}
