//! Global `tracing` subscriber setup: an offset-aware timer and a level
//! controlled by `RUST_LOG` (defaulting to `info`).
use tracing_subscriber::EnvFilter;

pub fn init() {
    let timer = time::format_description::parse("[hour]:[minute]:[second]")
        .expect("could not create time format description");
    let time_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(time_offset, timer);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_timer(timer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default log subscriber failed");
}
