use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::cache::OrderCache;
use crate::metrics::Metrics;
use crate::services::OrderService;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub orders: Arc<OrderService>,
    pub cache: Arc<dyn OrderCache>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler))
        .route("/order/{id}", web::get().to(order_handler));
}

/// Bind the HTTP server. The returned `Server` must be awaited (or spawned)
/// to start serving; its handle stops it.
pub fn start_http_server(state: AppState, address: &str) -> std::io::Result<Server> {
    tracing::info!("📊 Starting HTTP server on http://{}", address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
    })
    .disable_signals()
    .bind(address)?
    .run();

    Ok(server)
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let circuit = state.cache.circuit_state().await;
    state.metrics.update_circuit_breaker_state(circuit);

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "order-sync",
        "cache_circuit": circuit.as_str(),
    }))
}

async fn order_handler(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();

    match state.orders.get_order_by_id(&id).await {
        Ok(order) => HttpResponse::Ok().json(serde_json::json!({
            "status": "OK",
            "order": order,
        })),
        Err(e) if e.is_not_found() => HttpResponse::NotFound().json(serde_json::json!({
            "status": "Error",
            "error": "not found",
        })),
        Err(_) => HttpResponse::InternalServerError().json(serde_json::json!({
            "status": "Error",
            "error": "internal error",
        })),
    }
}
