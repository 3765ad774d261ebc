use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::info;

use crate::controller::LoadController;
use crate::routes;

/// Binds the control surface and serves until the server shuts down.
///
/// A bind failure is returned before any request is served.
pub async fn run(controller: LoadController, addr: (String, u16)) -> std::io::Result<()> {
    let data = web::Data::new(controller);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .configure(routes::configure)
    })
    .bind((addr.0.as_str(), addr.1))?;

    info!(host = %addr.0, port = addr.1, "stress-service listening");
    server.run().await
}
