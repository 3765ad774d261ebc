use actix_web::error::InternalError;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::warn;

use crate::config::ConfigUpdate;
use crate::controller::{ControlResponse, LoadController};
use crate::error::EngineError;

pub const SERVICE_NAME: &str = "stress-service";
const MSG_BAD_CONFIG: &str = "Unable to bind retrieved JSON data.";

#[derive(Serialize)]
struct Health {
    message: &'static str,
    status: &'static str,
}

#[get("/")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(Health {
        message: SERVICE_NAME,
        status: "ok",
    })
}

#[get("/start")]
async fn start(controller: web::Data<LoadController>) -> Result<HttpResponse, EngineError> {
    Ok(HttpResponse::Ok().json(controller.start().await?))
}

#[get("/stop")]
async fn stop(controller: web::Data<LoadController>) -> impl Responder {
    HttpResponse::Ok().json(controller.stop().await)
}

#[get("/status")]
async fn status(controller: web::Data<LoadController>) -> impl Responder {
    HttpResponse::Ok().json(controller.status_response().await)
}

#[get("/config")]
async fn get_config(controller: web::Data<LoadController>) -> impl Responder {
    HttpResponse::Ok().json(controller.config().await)
}

#[post("/config")]
async fn set_config(
    controller: web::Data<LoadController>,
    update: web::Json<ConfigUpdate>,
) -> Result<HttpResponse, EngineError> {
    let config = controller.set_config(update.into_inner()).await?;
    Ok(HttpResponse::Created().json(config))
}

/// Rejects unparsable configuration bodies with a 400 and the usual
/// `{message, status}` body.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _req| {
            warn!(error = %err, "rejected configuration payload");
            let response = HttpResponse::BadRequest().json(ControlResponse::error(MSG_BAD_CONFIG));
            InternalError::from_response(err, response).into()
        })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/simulation")
            .app_data(json_config())
            .service(start)
            .service(stop)
            .service(status)
            .service(get_config)
            .service(set_config),
    );
}
