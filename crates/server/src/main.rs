use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use shared::{
    domain::{ImageId, RoomId, Slug},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateRoomRequest, DeleteRoomRequest, ImageUploadResponse, MessagePayload,
        RenameRoomRequest, RoomEvent, RoomSnapshot, SendMessageRequest,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod api;
mod config;

use api::ApiContext;
use config::{load_settings, normalize_database_url};

/// Fan-out unit for room subscribers. `Closed` never reaches the wire; it
/// tears down a deleted room's sockets so clients see the stream end.
#[derive(Debug, Clone)]
enum RoomBroadcast {
    Event { room_id: RoomId, event: RoomEvent },
    Closed { room_id: RoomId },
}

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<RoomBroadcast>,
}

#[derive(Debug, Deserialize)]
struct ImageUploadQuery {
    filename: Option<String>,
    content_type: Option<String>,
}

const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;
const MAX_FILENAME_BYTES: usize = 180;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let public_base_url = match &settings.public_base_url {
        Some(url) => url.clone(),
        None => format!("http://{}", settings.server_bind),
    };
    let api = ApiContext {
        storage,
        public_base_url,
    };
    let (events, _) = broadcast::channel(256);

    let state = Arc::new(AppState { api, events });
    if settings.sweep_interval_seconds > 0 {
        tokio::spawn(run_expiry_sweep(
            state.clone(),
            Duration::from_secs(settings.sweep_interval_seconds),
        ));
    }
    let app = build_router(state);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rooms", post(http_create_room))
        .route("/rooms/:room", get(http_resolve_room))
        .route("/rooms/:room/name", post(http_rename_room))
        .route("/rooms/:room/delete", post(http_delete_room))
        .route(
            "/rooms/:room/messages",
            get(http_list_messages).post(http_send_message),
        )
        .route(
            "/rooms/:room/images",
            post(upload_image)
                .layer::<_, Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_IMAGE_BYTES + 1024)),
        )
        .route("/images/:image_id", get(download_image))
        .route("/rooms/:room/events", get(ws_handler))
        .with_state(state)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<ApiError>)> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|err| reject(ApiError::new(ErrorCode::Internal, err.to_string())))?;
    Ok("ok")
}

async fn http_create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<RoomSnapshot>, (StatusCode, Json<ApiError>)> {
    let room = api::create_room(&state.api, req).await.map_err(reject)?;
    Ok(Json(room))
}

async fn http_resolve_room(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<RoomSnapshot>, (StatusCode, Json<ApiError>)> {
    // A malformed slug cannot name a room, so it reads as absent.
    let slug = Slug::parse(&slug)
        .map_err(|_| reject(ApiError::new(ErrorCode::NotFound, "room not found")))?;
    let room = api::resolve_room(&state.api, &slug)
        .await
        .map_err(reject)?;
    Ok(Json(room))
}

async fn http_rename_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    Json(req): Json<RenameRoomRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let room_id = RoomId(room_id);
    let event = api::rename_room(&state.api, room_id, req)
        .await
        .map_err(reject)?;
    let _ = state.events.send(RoomBroadcast::Event { room_id, event });
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    Json(req): Json<DeleteRoomRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let room_id = RoomId(room_id);
    api::delete_room(&state.api, room_id, &req.credential)
        .await
        .map_err(reject)?;
    let _ = state.events.send(RoomBroadcast::Closed { room_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> Result<Json<Vec<MessagePayload>>, (StatusCode, Json<ApiError>)> {
    let messages = api::list_messages(&state.api, RoomId(room_id))
        .await
        .map_err(reject)?;
    Ok(Json(messages))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<RoomEvent>, (StatusCode, Json<ApiError>)> {
    let room_id = RoomId(room_id);
    let event = api::append_message(&state.api, room_id, req)
        .await
        .map_err(reject)?;
    let _ = state.events.send(RoomBroadcast::Event {
        room_id,
        event: event.clone(),
    });
    Ok(Json(event))
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
    Query(q): Query<ImageUploadQuery>,
    body: Bytes,
) -> Result<Json<ImageUploadResponse>, (StatusCode, Json<ApiError>)> {
    if body.is_empty() {
        return Err(reject(ApiError::new(
            ErrorCode::Validation,
            "image body cannot be empty",
        )));
    }
    if body.len() > MAX_IMAGE_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiError::new(
                ErrorCode::Validation,
                format!("image exceeds {MAX_IMAGE_BYTES} bytes"),
            )),
        ));
    }

    let filename = q
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if let Some(name) = filename {
        if name.len() > MAX_FILENAME_BYTES {
            return Err(reject(ApiError::new(
                ErrorCode::Validation,
                "filename is too long",
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(reject(ApiError::new(
                ErrorCode::Validation,
                "filename must not contain path separators",
            )));
        }
    }
    let content_type = q
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|mime| !mime.is_empty());

    let uploaded = api::store_image(&state.api, RoomId(room_id), filename, content_type, &body)
        .await
        .map_err(reject)?;
    Ok(Json(uploaded))
}

async fn download_image(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let image = state
        .api
        .storage
        .load_image(ImageId(image_id))
        .await
        .map_err(|e| reject(ApiError::new(ErrorCode::Internal, e.to_string())))?
        .ok_or_else(|| reject(ApiError::new(ErrorCode::NotFound, "image not found")))?;

    let mut headers = HeaderMap::new();
    let content_type = image
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(filename) = image.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{filename}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok((StatusCode::OK, headers, image.bytes))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let room_id = RoomId(room_id);
    // A room that no longer exists refuses the upgrade; subscribers read the
    // 404 as "stop retrying".
    api::require_room(&state.api, room_id).await.map_err(reject)?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, room_id)))
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    room_id: RoomId,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(RoomBroadcast::Event {
                    room_id: event_room,
                    event,
                }) if event_room == room_id => {
                    let text = match serde_json::to_string(&event) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(RoomBroadcast::Closed { room_id: closed }) if closed == room_id => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // This subscriber lost events; close so the client re-syncs.
                    warn!(room_id = room_id.0, skipped, "event subscriber lagged");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

async fn run_expiry_sweep(state: Arc<AppState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match state.api.storage.delete_expired_rooms(Utc::now()).await {
            Ok(removed) if removed.is_empty() => {}
            Ok(removed) => {
                info!(count = removed.len(), "swept expired rooms");
                for room_id in removed {
                    let _ = state.events.send(RoomBroadcast::Closed { room_id });
                }
            }
            Err(error) => warn!(%error, "expiry sweep failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
