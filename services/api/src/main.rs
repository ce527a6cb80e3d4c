//! API Service - Health checks and audit queries for the Transferegov pipeline
//!
//! Endpoints:
//! - GET /health - Liveness + database ping
//! - GET /health/pipeline - Pipeline freshness classification
//! - GET /extractions - Recent extraction log entries
//! - GET /lineage - Provenance lookup for an entity
//!
//! Read-only: everything here is a thin query over the tables the pipeline
//! writes. Freshness classification: healthy when the last run is under 25
//! hours old and did not fail, degraded under 48 hours, unhealthy otherwise.

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    database: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct PipelineHealthResponse {
    status: &'static str,
    details: String,
    hours_since: Option<f64>,
    last_run_status: Option<String>,
    last_run_date: Option<DateTime<Utc>>,
}

#[derive(Serialize, sqlx::FromRow)]
struct ExtractionResponse {
    id: i64,
    run_date: DateTime<Utc>,
    status: String,
    files_processed: Option<i64>,
    total_records: Option<i64>,
    records_inserted: Option<i64>,
    records_updated: Option<i64>,
    duration_seconds: Option<f64>,
    error_message: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
struct LineageResponse {
    entity_type: String,
    entity_id: String,
    source_file: String,
    extraction_date: Option<NaiveDate>,
    pipeline_version: Option<String>,
    record_hash: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct ExtractionsQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct LineageQuery {
    entity_type: String,
    entity_id: String,
}

// ============================================================================
// Freshness classification
// ============================================================================

/// Classify pipeline freshness from the latest audit row:
/// - healthy: last run under 25 hours ago and not failed
/// - degraded: last run between 25 and 48 hours ago
/// - unhealthy: no run, failed run, or older than 48 hours
fn classify_freshness(last: Option<(&str, f64)>) -> &'static str {
    match last {
        None => "unhealthy",
        Some(("failed", _)) => "unhealthy",
        Some((_, hours)) if hours < 25.0 => "healthy",
        Some((_, hours)) if hours < 48.0 => "degraded",
        Some(_) => "unhealthy",
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();

    Json(HealthResponse {
        ok: database,
        database,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn pipeline_health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last: Result<Option<(DateTime<Utc>, String)>, _> = sqlx::query_as(
        "SELECT run_date, status FROM extraction_logs ORDER BY run_date DESC LIMIT 1",
    )
    .fetch_optional(&state.pool)
    .await;

    let last = match last {
        Ok(row) => row,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let response = match last {
        None => PipelineHealthResponse {
            status: "unhealthy",
            details: "No extraction records found".to_string(),
            hours_since: None,
            last_run_status: None,
            last_run_date: None,
        },
        Some((run_date, status)) => {
            let hours_since = (Utc::now() - run_date).num_seconds() as f64 / 3600.0;
            let classified = classify_freshness(Some((status.as_str(), hours_since)));
            let details = format!(
                "Last extraction at {} (status: {}, {:.1}h ago)",
                run_date.format("%Y-%m-%d %H:%M"),
                status,
                hours_since
            );
            PipelineHealthResponse {
                status: classified,
                details,
                hours_since: Some((hours_since * 10.0).round() / 10.0),
                last_run_status: Some(status),
                last_run_date: Some(run_date),
            }
        }
    };

    Json(response).into_response()
}

async fn extractions_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtractionsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20).min(200);

    let rows: Result<Vec<ExtractionResponse>, _> = sqlx::query_as(
        r#"
        SELECT id, run_date, status, files_processed, total_records,
               records_inserted, records_updated, duration_seconds, error_message
        FROM extraction_logs
        ORDER BY run_date DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(extractions) => Json(serde_json::json!({ "extractions": extractions })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn lineage_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LineageQuery>,
) -> impl IntoResponse {
    let rows: Result<Vec<LineageResponse>, _> = sqlx::query_as(
        r#"
        SELECT entity_type, entity_id, source_file, extraction_date,
               pipeline_version, record_hash, created_at
        FROM data_lineage
        WHERE entity_type = $1 AND entity_id = $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(&params.entity_type)
    .bind(&params.entity_id)
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(lineage) if lineage.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!(
                    "No lineage found for {} {}",
                    params.entity_type, params.entity_id
                ),
            }),
        )
            .into_response(),
        Ok(lineage) => Json(serde_json::json!({ "lineage": lineage })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    println!("=== Transferegov Pipeline API ===");
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let state = Arc::new(AppState { pool });

    // CORS for dashboards and external monitors
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/health/pipeline", get(pipeline_health_handler))
        .route("/extractions", get(extractions_handler))
        .route("/lineage", get(lineage_handler))
        .layer(cors)
        .with_state(state);

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /health/pipeline");
    println!("  GET /extractions?limit=");
    println!("  GET /lineage?entity_type=&entity_id=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
