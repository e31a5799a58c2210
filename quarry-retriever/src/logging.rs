//! Log output for the binaries.
//!
//! `RUST_LOG` takes precedence over the configured level:
//! ```bash
//! RUST_LOG=debug quarry-retriever query "what changed?" --file notes.pdf
//! RUST_LOG=quarry_embed=debug,quarry_retriever=info quarry-retriever stats *.docx
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Install the stderr subscriber. Only the first call has an effect.
///
/// `level` is an `EnvFilter` directive such as `"info"` or
/// `"warn,quarry_embed=debug"`; an unparsable one falls back to `info`.
pub fn init(level: &str) {
    INIT.call_once(|| {
        let directive = filter_directive(level, std::env::var("RUST_LOG").ok());
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_filter(filter);

        // Another subscriber may already be installed, e.g. by a test harness.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

fn filter_directive(level: &str, rust_log: Option<String>) -> String {
    match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ if level.trim().is_empty() => "info".to_string(),
        _ => level.to_string(),
    }
}
