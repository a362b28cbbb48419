//! HTTP Server for the postcheck API.
//!
//! Stateless apart from configuration, the provider set and the event sink:
//! every request uploads its file again.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                                |
//! |--------|-------------------|--------------------------------------------|
//! | GET    | `/health`         | Health check                               |
//! | POST   | `/api/sniff`      | Detect format, propose a column mapping    |
//! | POST   | `/api/validate`   | Validate a file, return the report         |
//! | POST   | `/api/export`     | Validate and return the corrected CSV      |
//! | GET    | `/api/events`     | SSE stream of run events                   |
//!
//! Upload endpoints take a multipart form with `file` and optional `mode`
//! (`quick`/`full`), `overrides` (JSON object field → column) and
//! `apply_address_corrections` (`true`/`false`).

use axum::{
    extract::{Multipart, State},
    http::{header, Method},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::types::{SniffResponse, ValidateResponse};
use crate::config::EngineConfig;
use crate::error::{PipelineError, ServerError};
use crate::events::EventSink;
use crate::lookup::PostalLookup;
use crate::mapping::MappingOverrides;
use crate::models::ValidationMode;
use crate::validation::{check_bytes, suggest_mapping, FileInfo, Validator};
use crate::writer::write_file;

/// Shared across requests.
#[derive(Clone)]
pub struct AppState {
    config: Arc<EngineConfig>,
    lookup: Option<Arc<PostalLookup>>,
    events: EventSink,
}

impl AppState {
    pub fn new(config: EngineConfig, lookup: Option<Arc<PostalLookup>>, events: EventSink) -> Self {
        Self {
            config: Arc::new(config),
            lookup,
            events,
        }
    }

    /// A fresh validator per request, so each run has its own cancellation.
    fn validator(&self) -> Validator {
        let validator = Validator::new(EngineConfig::clone(&self.config), self.events.clone());
        match &self.lookup {
            Some(lookup) => validator.with_lookup(Arc::clone(lookup)),
            None => validator,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/sniff", post(sniff))
        .route("/api/validate", post(validate))
        .route("/api/export", post(export))
        .route("/api/events", get(sse_events))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(port: u16, config: EngineConfig) -> Result<(), ServerError> {
    let events = EventSink::new(config.events.channel_capacity);
    let lookup = PostalLookup::from_config(&config.lookup, events.clone()).map_err(PipelineError::from)?;
    tracing::info!(providers = ?lookup.provider_ids(), "postal lookup ready");

    let app = router(AppState::new(config, Some(Arc::new(lookup)), events));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("postcheck server listening on http://localhost:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "postcheck",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "sniff": "POST /api/sniff",
            "validate": "POST /api/validate",
            "export": "POST /api/export",
            "events": "GET /api/events (SSE)"
        }
    }))
}

/// SSE endpoint streaming run events
async fn sse_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    // lagged receivers skip the missed events
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let event = result.ok()?;
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Fields of an upload form.
struct Upload {
    bytes: Vec<u8>,
    file_name: Option<String>,
    mode: ValidationMode,
    overrides: Option<MappingOverrides>,
    apply_address_corrections: bool,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let bad = |e: &dyn std::fmt::Display| ServerError::BadRequest(e.to_string());

        let mut bytes = None;
        let mut upload = Upload {
            bytes: Vec::new(),
            file_name: None,
            mode: ValidationMode::default(),
            overrides: None,
            apply_address_corrections: false,
        };

        while let Some(field) = multipart.next_field().await.map_err(|e| bad(&e))? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    upload.file_name = field.file_name().map(str::to_string);
                    bytes = Some(field.bytes().await.map_err(|e| bad(&e))?.to_vec());
                }
                "mode" => {
                    let text = field.text().await.map_err(|e| bad(&e))?;
                    upload.mode = text.parse().map_err(|e: String| bad(&e))?;
                }
                "overrides" => {
                    let text = field.text().await.map_err(|e| bad(&e))?;
                    if !text.trim().is_empty() {
                        upload.overrides = Some(serde_json::from_str(&text).map_err(|e| bad(&e))?);
                    }
                }
                "apply_address_corrections" => {
                    let text = field.text().await.map_err(|e| bad(&e))?;
                    upload.apply_address_corrections = matches!(text.trim(), "true" | "1" | "on");
                }
                _ => {}
            }
        }

        upload.bytes = bytes.ok_or_else(|| ServerError::BadRequest("No file provided".into()))?;
        tracing::info!(
            file = upload.file_name.as_deref().unwrap_or("unknown"),
            bytes = upload.bytes.len(),
            mode = ?upload.mode,
            "upload received"
        );
        Ok(upload)
    }
}

async fn sniff(State(state): State<AppState>, multipart: Multipart) -> Result<Json<SniffResponse>, ServerError> {
    let upload = Upload::read(multipart).await?;
    let (file, suggestion) = suggest_mapping(&state.validator(), &upload.bytes, upload.overrides.as_ref())?;
    Ok(Json(SniffResponse {
        file: FileInfo::of(&file),
        suggestion,
    }))
}

async fn validate(State(state): State<AppState>, multipart: Multipart) -> Result<Json<ValidateResponse>, ServerError> {
    let upload = Upload::read(multipart).await?;
    let outcome = check_bytes(
        &state.validator(),
        &upload.bytes,
        upload.overrides.as_ref(),
        upload.mode,
    )
    .await?;
    tracing::info!(summary = %outcome.report.summary(), "validation done");
    Ok(Json(ValidateResponse::new(FileInfo::of(&outcome.file), outcome.report)))
}

async fn export(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ServerError> {
    let upload = Upload::read(multipart).await?;
    let outcome = check_bytes(
        &state.validator(),
        &upload.bytes,
        upload.overrides.as_ref(),
        upload.mode,
    )
    .await?;
    let bytes = write_file(&outcome.file, &outcome.report, upload.apply_address_corrections)
        .map_err(PipelineError::from)?;

    let stem = upload
        .file_name
        .as_deref()
        .and_then(|n| n.rsplit_once('.').map(|(stem, _)| stem).or(Some(n)))
        .unwrap_or("shipments")
        .replace('"', "");
    let headers = [
        (
            header::CONTENT_TYPE,
            format!("text/csv; charset={}", outcome.file.format.encoding.charset()),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}-checked.csv\"", stem),
        ),
    ];
    Ok((headers, bytes).into_response())
}
