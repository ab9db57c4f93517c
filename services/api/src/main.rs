//! API Service - Read side for AMECO series
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /indicators - Series grouped by (variable, country), with filters
//! - GET /indicators/:variable_code/:country_code - One series
//! - GET /chapters - List chapters
//! - GET /subchapters - List subchapters, optionally by chapter
//! - GET /variables - List variables, optionally by chapter or subchapter
//! - GET /countries - List countries

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

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
    version: &'static str,
}

#[derive(Serialize, sqlx::FromRow)]
struct ChapterResponse {
    id: Uuid,
    name: String,
}

#[derive(Serialize, sqlx::FromRow)]
struct SubchapterResponse {
    id: Uuid,
    name: String,
    chapter_id: Uuid,
}

#[derive(Serialize, sqlx::FromRow)]
struct VariableResponse {
    id: Uuid,
    code: String,
    name: String,
    unit_code: String,
    unit_description: String,
    subchapter_id: Uuid,
    trn_code: Option<String>,
    agg_code: Option<String>,
    ref_code: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
struct CountryResponse {
    id: Uuid,
    code: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct YearValue {
    year: i32,
    amount: BigDecimal,
}

/// One series: a variable observed for one country
#[derive(Debug, Clone, PartialEq, Serialize)]
struct IndicatorResponse {
    variable_code: String,
    variable_name: String,
    unit_code: String,
    unit_description: String,
    chapter_name: String,
    subchapter_name: String,
    country_code: String,
    country_name: String,
    values: Vec<YearValue>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn db_error(e: sqlx::Error) -> Response {
    error!(error = %e, "query failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize, Default)]
struct IndicatorsQuery {
    country_code: Option<String>,
    variable_code: Option<String>,
    chapter_name: Option<String>,
    subchapter_name: Option<String>,
    /// Comma-separated, e.g. `2020,2021`
    years: Option<String>,
}

#[derive(Deserialize)]
struct SubchaptersQuery {
    chapter_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct VariablesQuery {
    chapter_id: Option<Uuid>,
    subchapter_id: Option<Uuid>,
}

// ============================================================================
// Grouping
// ============================================================================

/// One joined value row as returned by the indicators query
#[derive(Debug, Clone, sqlx::FromRow)]
struct IndicatorRow {
    variable_id: Uuid,
    country_id: Uuid,
    variable_code: String,
    variable_name: String,
    unit_code: String,
    unit_description: String,
    chapter_name: String,
    subchapter_name: String,
    country_code: String,
    country_name: String,
    year: i32,
    amount: BigDecimal,
}

/// Parse `2020,2021, 2022` into years. Empty segments are ignored.
fn parse_years(raw: &str) -> Result<Vec<i32>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i32>().map_err(|_| format!("Invalid year '{}'", s)))
        .collect()
}

/// Group rows by (variable, country). Group order follows the first row of
/// each group; values inside a group are ordered by year.
fn group_indicators(rows: Vec<IndicatorRow>) -> Vec<IndicatorResponse> {
    let mut index: std::collections::HashMap<(Uuid, Uuid), usize> = std::collections::HashMap::new();
    let mut groups: Vec<IndicatorResponse> = Vec::new();

    for row in rows {
        let key = (row.variable_id, row.country_id);
        let value = YearValue {
            year: row.year,
            amount: row.amount,
        };
        match index.get(&key) {
            Some(&i) => groups[i].values.push(value),
            None => {
                index.insert(key, groups.len());
                groups.push(IndicatorResponse {
                    variable_code: row.variable_code,
                    variable_name: row.variable_name,
                    unit_code: row.unit_code,
                    unit_description: row.unit_description,
                    chapter_name: row.chapter_name,
                    subchapter_name: row.subchapter_name,
                    country_code: row.country_code,
                    country_name: row.country_name,
                    values: vec![value],
                });
            }
        }
    }

    for group in &mut groups {
        group.values.sort_by_key(|v| v.year);
    }
    groups
}

async fn fetch_indicators(
    pool: &PgPool,
    params: &IndicatorsQuery,
    years: &[i32],
) -> Result<Vec<IndicatorResponse>, sqlx::Error> {
    let mut query = String::from(
        r#"
        SELECT v.variable_id, v.country_id,
               var.code AS variable_code, var.name AS variable_name,
               var.unit_code, var.unit_description,
               ch.name AS chapter_name, sc.name AS subchapter_name,
               c.code AS country_code, c.name AS country_name,
               v.year, v.amount
        FROM series_values v
        JOIN variables var ON v.variable_id = var.id
        JOIN subchapters sc ON var.subchapter_id = sc.id
        JOIN chapters ch ON sc.chapter_id = ch.id
        JOIN countries c ON v.country_id = c.id
        WHERE 1=1
        "#,
    );

    let mut idx = 1;
    if params.country_code.is_some() {
        query.push_str(&format!(" AND c.code = ${}", idx));
        idx += 1;
    }
    if params.variable_code.is_some() {
        query.push_str(&format!(" AND var.code = ${}", idx));
        idx += 1;
    }
    if params.chapter_name.is_some() {
        query.push_str(&format!(" AND ch.name = ${}", idx));
        idx += 1;
    }
    if params.subchapter_name.is_some() {
        query.push_str(&format!(" AND sc.name = ${}", idx));
        idx += 1;
    }
    if !years.is_empty() {
        query.push_str(&format!(" AND v.year = ANY(${})", idx));
    }
    query.push_str(" ORDER BY ch.name, sc.name, var.code, c.name, v.year");

    let mut q = sqlx::query_as::<_, IndicatorRow>(&query);
    if let Some(code) = &params.country_code {
        q = q.bind(code);
    }
    if let Some(code) = &params.variable_code {
        q = q.bind(code);
    }
    if let Some(name) = &params.chapter_name {
        q = q.bind(name);
    }
    if let Some(name) = &params.subchapter_name {
        q = q.bind(name);
    }
    if !years.is_empty() {
        q = q.bind(years.to_vec());
    }

    let rows = q.fetch_all(pool).await?;
    Ok(group_indicators(rows))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn indicators_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IndicatorsQuery>,
) -> Response {
    let years = match params.years.as_deref().map(parse_years).transpose() {
        Ok(years) => years.unwrap_or_default(),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match fetch_indicators(&state.pool, &params, &years).await {
        Ok(indicators) => Json(serde_json::json!({ "indicators": indicators })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn indicator_handler(
    State(state): State<Arc<AppState>>,
    Path((variable_code, country_code)): Path<(String, String)>,
) -> Response {
    let params = IndicatorsQuery {
        country_code: Some(country_code),
        variable_code: Some(variable_code),
        ..Default::default()
    };

    match fetch_indicators(&state.pool, &params, &[]).await {
        Ok(indicators) => match indicators.into_iter().next() {
            Some(indicator) => Json(indicator).into_response(),
            None => error_response(StatusCode::NOT_FOUND, "Indicator not found"),
        },
        Err(e) => db_error(e),
    }
}

async fn chapters_handler(State(state): State<Arc<AppState>>) -> Response {
    let chapters: Result<Vec<ChapterResponse>, _> =
        sqlx::query_as("SELECT id, name FROM chapters ORDER BY name")
            .fetch_all(&state.pool)
            .await;

    match chapters {
        Ok(c) => Json(serde_json::json!({ "chapters": c })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn subchapters_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubchaptersQuery>,
) -> Response {
    let subchapters: Result<Vec<SubchapterResponse>, _> = sqlx::query_as(
        r#"
        SELECT id, name, chapter_id
        FROM subchapters
        WHERE ($1::uuid IS NULL OR chapter_id = $1)
        ORDER BY name
        "#,
    )
    .bind(params.chapter_id)
    .fetch_all(&state.pool)
    .await;

    match subchapters {
        Ok(s) => Json(serde_json::json!({ "subchapters": s })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn variables_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VariablesQuery>,
) -> Response {
    let variables: Result<Vec<VariableResponse>, _> = sqlx::query_as(
        r#"
        SELECT v.id, v.code, v.name, v.unit_code, v.unit_description, v.subchapter_id,
               v.trn_code, v.agg_code, v.ref_code
        FROM variables v
        JOIN subchapters sc ON v.subchapter_id = sc.id
        WHERE ($1::uuid IS NULL OR sc.chapter_id = $1)
          AND ($2::uuid IS NULL OR v.subchapter_id = $2)
        ORDER BY v.code
        "#,
    )
    .bind(params.chapter_id)
    .bind(params.subchapter_id)
    .fetch_all(&state.pool)
    .await;

    match variables {
        Ok(v) => Json(serde_json::json!({ "variables": v })).into_response(),
        Err(e) => db_error(e),
    }
}

async fn countries_handler(State(state): State<Arc<AppState>>) -> Response {
    let countries: Result<Vec<CountryResponse>, _> =
        sqlx::query_as("SELECT id, code, name FROM countries ORDER BY name")
            .fetch_all(&state.pool)
            .await;

    match countries {
        Ok(c) => Json(serde_json::json!({ "countries": c })).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    let state = Arc::new(AppState { pool });

    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/indicators", get(indicators_handler))
        .route("/indicators/:variable_code/:country_code", get(indicator_handler))
        .route("/chapters", get(chapters_handler))
        .route("/subchapters", get(subchapters_handler))
        .route("/variables", get(variables_handler))
        .route("/countries", get(countries_handler))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind, "API listening");

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
