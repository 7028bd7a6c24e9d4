//! Log output for the batch binaries.
use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::util::env::env_flag;

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` (e.g. `"info,sqlx=warn"`). With
/// `LOG_COMPACT` set, lines drop source locations so scheduled runs produce one
/// short line per work item.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if env_flag("LOG_COMPACT", false) {
        builder.compact().with_line_number(false).try_init()
    } else {
        builder.with_line_number(true).try_init()
    };
    installed.map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}
