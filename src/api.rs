//! HTTP surface under `/api/v1`
//!
//! Thin handlers over the orchestrators. Nothing here waits for queued work:
//! task submission and status updates return as soon as the message is
//! published.

use crate::domain::ProductStatus;
use crate::error::{ErrorKind, PipelineError};
use crate::observability::metrics;
use crate::orchestrator::{MenuOrchestrator, ProductOrchestrator};
use crate::transport::QueueTransport;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection};

const MAX_BODY_BYTES: u64 = 16 * 1024;
const DEFAULT_USER_ID: &str = "system";

type ApiReply = WithStatus<Json>;

/// Everything the handlers need
pub struct ApiState {
    pub menus: Arc<MenuOrchestrator>,
    pub products: Arc<ProductOrchestrator>,
    pub transport: Arc<dyn QueueTransport>,
}

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub spreadsheet_id: String,
    pub restaurant_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParseResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ProductStatus,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusUpdateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_connected: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// All routes with rejections turned into JSON errors
pub fn routes(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (ApiReply,), Error = Infallible> + Clone {
    let create_task = warp::path!("api" / "v1" / "parse")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(create_parse_task);

    let get_task = warp::path!("api" / "v1" / "parse" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_parse_task);

    let get_menu = warp::path!("api" / "v1" / "menu" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_menu);

    let update_status =
        warp::path!("api" / "v1" / "restaurants" / String / "products" / String / "status")
            .and(warp::patch())
            .and(warp::header::optional::<String>("x-user-id"))
            .and(warp::body::content_length_limit(MAX_BODY_BYTES))
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(update_product_status);

    let health = warp::path!("api" / "v1" / "health")
        .and(warp::get())
        .and(with_state(state))
        .and_then(health);

    let metrics_route = warp::path!("api" / "v1" / "metrics")
        .and(warp::get())
        .and_then(|| async {
            Ok::<_, Infallible>(reply(&metrics().snapshot(), StatusCode::OK))
        });

    create_task
        .or(get_task)
        .unify()
        .or(get_menu)
        .unify()
        .or(update_status)
        .unify()
        .or(health)
        .unify()
        .or(metrics_route)
        .unify()
        .recover(handle_rejection)
        .unify()
}

/// Serve until `cancel` fires
pub async fn serve(
    state: Arc<ApiState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), warp::Error> {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "PATCH"])
        .allow_headers(vec!["content-type", "x-user-id"]);

    let (bound, server) = warp::serve(routes(state).with(cors))
        .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })?;

    info!("Starting API server on {}", bound);
    server.await;
    info!("API server stopped");
    Ok(())
}

fn with_state(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (Arc<ApiState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn reply<T: Serialize>(body: &T, status: StatusCode) -> ApiReply {
    warp::reply::with_status(warp::reply::json(body), status)
}

/// Path parameters arrive percent-encoded; restaurant ids often contain spaces
fn decode_segment(raw: &str) -> Result<String, PipelineError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| PipelineError::validation(format!("invalid path segment '{raw}': {e}")))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::TransientIo | ErrorKind::ParseFailure | ErrorKind::RetryExhausted => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_reply(error: &PipelineError) -> ApiReply {
    let status = status_for(error.kind());
    if status.is_server_error() {
        warn!("Request failed: {}", error);
    }
    reply(
        &ErrorResponse {
            error: error.public_message(),
        },
        status,
    )
}

async fn create_parse_task(
    request: ParseRequest,
    state: Arc<ApiState>,
) -> Result<ApiReply, Infallible> {
    let result = state
        .menus
        .create_parsing_task(&request.spreadsheet_id, &request.restaurant_name)
        .await;

    Ok(match result {
        Ok(task) => reply(
            &ParseResponse {
                task_id: task.task_id,
                status: task.status.to_string(),
            },
            StatusCode::OK,
        ),
        Err(e) => error_reply(&e),
    })
}

async fn get_parse_task(task_id: String, state: Arc<ApiState>) -> Result<ApiReply, Infallible> {
    Ok(match state.menus.get_task(&task_id).await {
        Ok(task) => reply(&task, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

async fn get_menu(menu_id: String, state: Arc<ApiState>) -> Result<ApiReply, Infallible> {
    Ok(match state.menus.get_menu(&menu_id).await {
        Ok(menu) => reply(&menu, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

async fn update_product_status(
    restaurant_id: String,
    product_id: String,
    user_id: Option<String>,
    request: StatusUpdateRequest,
    state: Arc<ApiState>,
) -> Result<ApiReply, Infallible> {
    let user_id = user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
    let (restaurant_id, product_id) =
        match (decode_segment(&restaurant_id), decode_segment(&product_id)) {
            (Ok(restaurant_id), Ok(product_id)) => (restaurant_id, product_id),
            (Err(e), _) | (_, Err(e)) => return Ok(error_reply(&e)),
        };

    let result = state
        .products
        .request_status_update(
            &restaurant_id,
            &product_id,
            request.status,
            &request.reason,
            &user_id,
        )
        .await;

    Ok(match result {
        Ok(_) => reply(
            &StatusUpdateResponse {
                success: true,
                message: "Status update queued".to_string(),
            },
            StatusCode::ACCEPTED,
        ),
        Err(e) => error_reply(&e),
    })
}

async fn health(state: Arc<ApiState>) -> Result<ApiReply, Infallible> {
    let queue_connected = state.transport.is_connected();
    let (status, code) = if queue_connected {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };
    Ok(reply(
        &HealthResponse {
            status: status.to_string(),
            queue_connected,
            timestamp: chrono::Utc::now(),
        },
        code,
    ))
}

async fn handle_rejection(rejection: Rejection) -> Result<ApiReply, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "route not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(reply(&ErrorResponse { error: message }, status))
}
