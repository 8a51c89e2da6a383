use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "yeet.log";

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber: `RUST_LOG` filter (default `info`), stderr,
/// and a plain-text `yeet.log` in the data dir. Safe to call repeatedly.
pub fn init_logging(data_dir: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

        let path = Path::new(data_dir).join(LOG_FILE);
        let file_layer = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("yeet: cannot open {}: {e}", path.display());
                None
            }
        };

        // Another subscriber may already be installed (host app, test harness).
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_layer)
            .try_init();
    });
}
