use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_NAME: &str = "msgwin.log";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
///
/// `filter` (the config's `log_filter`) wins over `RUST_LOG`; the default is `info`. With a
/// non-empty `data_dir` lines are also appended to `<data_dir>/msgwin.log`.
pub fn init_logging(data_dir: &str, filter: Option<&str>) {
    INIT.call_once(|| {
        let env_filter = filter
            .and_then(|f| EnvFilter::try_new(f).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"));

        let file = if data_dir.is_empty() {
            None
        } else {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(Path::new(data_dir).join(LOG_FILE_NAME))
                .ok()
        };
        let file_layer = file.map(|f| {
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(f))
        });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_layer)
            .try_init();
    });
}
