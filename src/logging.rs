//! Tracing subscriber setup for the binary.
//!
//! `RUST_LOG` wins when set. Otherwise colarun logs at `info`, or `debug`
//! with `--verbose`. Logs go to stderr so batch-system job logs capture them
//! alongside solver output.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "colarun=debug,info" } else { "colarun=info,warn" }
}

pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    // A second init (e.g. in tests) keeps the first subscriber
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
}
