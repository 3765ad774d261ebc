use std::time::Duration;

use clap::Parser;
use stress_service::{logging, server, LoadController, ServiceArgs};
use tracing::{error, info};

#[actix_web::main]
async fn main() {
    let args = ServiceArgs::parse();
    logging::init(&args.log_filter);

    let config = match args.configuration() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid startup configuration");
            std::process::exit(2);
        }
    };
    let settings = args.engine_settings();
    info!(
        duration_seconds = config.duration_seconds,
        cpu_percentage = config.cpu_percentage,
        workers = settings.workers,
        window_ms = settings.window.as_millis() as u64,
        "stress-service configured"
    );

    let controller = LoadController::new(config, settings);
    if config.start_delay_seconds > 0 {
        controller.schedule_start(Duration::from_secs(config.start_delay_seconds));
    }

    if let Err(err) = server::run(controller.clone(), args.bind_address()).await {
        error!(error = %err, "server terminated with error");
        std::process::exit(1);
    }

    // Leave no spinning threads behind on graceful shutdown.
    controller.stop().await;
}
