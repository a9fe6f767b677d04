//! Event handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use switchyard_types::{EventEnvelope, ServiceKey};
use tokio::sync::broadcast;

/// Get events query params
#[derive(Debug, Deserialize)]
pub struct GetEventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `project/environment/service`
    pub service: Option<String>,
}

fn default_limit() -> usize {
    20
}

fn parse_service_key(raw: &str) -> ApiResult<ServiceKey> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        [project, environment, service]
            if !project.is_empty() && !environment.is_empty() && !service.is_empty() =>
        {
            Ok(ServiceKey::new(*project, *environment, *service))
        }
        _ => Err(ApiError::BadRequest(format!(
            "Invalid service '{}', expected project/environment/service",
            raw
        ))),
    }
}

/// Get recent events, newest first
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<GetEventsQuery>,
) -> ApiResult<Json<Vec<EventEnvelope>>> {
    let key = query.service.as_deref().map(parse_service_key).transpose()?;
    let events = state.event_log.recent(query.limit, key.as_ref()).await;
    Ok(Json(events))
}

/// Stream events via SSE
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.plane.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
