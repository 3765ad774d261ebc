//! Control surface tests through the actix service stack.

use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use stress_service::controller::{MSG_ALREADY_STARTED, MSG_NOT_STARTED, MSG_STARTED, MSG_STOPPED};
use stress_service::{routes, Configuration, ControlResponse, EngineSettings, LoadController};

fn controller() -> LoadController {
    LoadController::new(
        Configuration {
            duration_seconds: 300,
            cpu_percentage: 80,
            start_delay_seconds: 0,
        },
        EngineSettings {
            window: Duration::from_millis(20),
            workers: 2,
            pin_cores: false,
            drain_timeout: Duration::from_secs(3),
            worker_stack_size: None,
        },
    )
}

macro_rules! app {
    ($controller:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($controller.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_service_name() {
    let app = app!(controller());
    let req = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"message": "stress-service", "status": "ok"}));
}

#[actix_web::test]
async fn start_and_stop_round_trip() {
    let controller = controller();
    let app = app!(controller);

    let req = test::TestRequest::get().uri("/simulation/start").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ControlResponse = test::read_body_json(resp).await;
    assert_eq!(body.message, MSG_STARTED);
    assert_eq!(body.status, "started");

    let req = test::TestRequest::get().uri("/simulation/start").to_request();
    let body: ControlResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.message, MSG_ALREADY_STARTED);

    let req = test::TestRequest::get().uri("/simulation/status").to_request();
    let body: ControlResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.status, "started");

    let req = test::TestRequest::get().uri("/simulation/stop").to_request();
    let body: ControlResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.message, MSG_STOPPED);
    assert_eq!(body.status, "stopped");
    assert_eq!(controller.live_workers(), 0);

    let req = test::TestRequest::get().uri("/simulation/stop").to_request();
    let body: ControlResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.message, MSG_NOT_STARTED);
}

#[actix_web::test]
async fn config_can_be_read_and_partially_updated() {
    let app = app!(controller());

    let req = test::TestRequest::get().uri("/simulation/config").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        body,
        json!({"test_time_seconds": 300, "percentage_cpu": 80, "start_after": 0})
    );

    let req = test::TestRequest::post()
        .uri("/simulation/config")
        .set_json(json!({"percentage_cpu": 50}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body,
        json!({"test_time_seconds": 300, "percentage_cpu": 50, "start_after": 0})
    );

    let req = test::TestRequest::post()
        .uri("/simulation/config")
        .set_json(json!({"test_time_seconds": 0, "percentage_cpu": 0}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["test_time_seconds"], 300);
    assert_eq!(body["percentage_cpu"], 50);
}

#[actix_web::test]
async fn malformed_config_is_a_client_error() {
    let controller = controller();
    let app = app!(controller);

    let req = test::TestRequest::post()
        .uri("/simulation/config")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ControlResponse = test::read_body_json(resp).await;
    assert_eq!(body.status, "error");

    let req = test::TestRequest::post()
        .uri("/simulation/config")
        .set_json(json!({"percentage_cpu": 150}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(controller.config().await.cpu_percentage, 80);
}
