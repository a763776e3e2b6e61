//! Per-endpoint request metrics.
//!
//! Endpoints are keyed by method and route pattern (`POST /agent/chat/{session_id}`).
//! Requests that match no route share one `<unmatched>` key per method, and
//! non-standard methods are folded into `OTHER`, so the key set stays fixed
//! whatever paths and methods clients send.

use crate::state::AppState;
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    http::Method,
    web, Error,
};
use std::time::Instant;
use tracing::debug;

/// Record duration and outcome of every request in [`AppState`] metrics.
///
/// Wire it up with `actix_web::middleware::from_fn(record_metrics)`.
pub async fn record_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = Instant::now();
    let endpoint = endpoint_name(&req);
    let app_state = req.app_data::<web::Data<AppState>>().cloned();

    let result = next.call(req).await;
    let duration_ms = start_time.elapsed().as_millis() as u64;

    let is_error = match &result {
        Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
        Err(_) => true,
    };

    if let Some(app_state) = app_state {
        app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
    }
    debug!(endpoint = %endpoint, duration_ms, is_error, "Request recorded");

    result
}

/// Key for scanned and unknown URLs.
const UNMATCHED: &str = "<unmatched>";

fn endpoint_name(req: &ServiceRequest) -> String {
    let method = match *req.method() {
        Method::GET | Method::POST | Method::PUT | Method::DELETE | Method::PATCH | Method::HEAD
        | Method::OPTIONS => req.method().as_str(),
        _ => "OTHER",
    };
    let path = req.match_pattern().unwrap_or_else(|| UNMATCHED.to_string());
    format!("{} {}", method, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{state_with, working_services};
    use actix_web::{middleware::from_fn, test as web_test, App, HttpResponse};

    #[actix_web::test]
    async fn test_requests_are_keyed_by_route_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(working_services(), dir.path());
        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(from_fn(record_metrics))
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/broken", web::get().to(|| async { HttpResponse::InternalServerError().finish() })),
        )
        .await;

        for uri in ["/items/1", "/items/2", "/broken", "/missing"] {
            let req = web_test::TestRequest::get().uri(uri).to_request();
            web_test::call_service(&app, req).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 4);
        assert_eq!(metrics.error_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /items/{id}"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /broken"].error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET <unmatched>"].error_count, 1);
    }

    #[actix_web::test]
    async fn test_unknown_urls_and_methods_share_fixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(working_services(), dir.path());
        let app = web_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(from_fn(record_metrics))
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for i in 0..50 {
            let req = web_test::TestRequest::get().uri(&format!("/scan/{}", i)).to_request();
            web_test::call_service(&app, req).await;
        }
        for verb in ["PROPFIND", "BREW"] {
            let req = web_test::TestRequest::default()
                .method(Method::from_bytes(verb.as_bytes()).unwrap())
                .uri("/anything")
                .to_request();
            web_test::call_service(&app, req).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 52);
        assert_eq!(metrics.endpoint_metrics.len(), 2);
        assert_eq!(metrics.endpoint_metrics["GET <unmatched>"].request_count, 50);
        assert_eq!(metrics.endpoint_metrics["OTHER <unmatched>"].request_count, 2);
    }
}
