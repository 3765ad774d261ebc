use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `log` records from actix-web are
/// forwarded through the subscriber's log bridge.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({}), using info", filter, err);
        EnvFilter::new("info")
    });

    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
    {
        eprintln!("failed to install tracing subscriber: {}", err);
    }
}
