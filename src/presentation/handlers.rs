// HTTP request handlers
use crate::application::backend_api::{BackendError, ResolvedExpression};
use crate::application::dashboard_controller::DashboardError;
use crate::application::refresh::WidgetData;
use crate::application::registry::RegistryError;
use crate::domain::dashboard::{ChartSeries, DashboardView, WidgetView};
use crate::domain::layout::LayoutError;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Error body served to the front-end: `{"message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let status = match &err {
            DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Registry(RegistryError::NotFound(_)) => StatusCode::BAD_REQUEST,
            DashboardError::Registry(_) | DashboardError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DashboardError::Layout(LayoutError::NotFound(_)) => StatusCode::NOT_FOUND,
            DashboardError::Layout(
                LayoutError::EmptySize(_)
                | LayoutError::OutOfBounds { .. }
                | LayoutError::RowLimit { .. },
            ) => StatusCode::BAD_REQUEST,
            DashboardError::Layout(_) => StatusCode::CONFLICT,
            DashboardError::Backend(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Unsupported { .. } => StatusCode::BAD_REQUEST,
            DashboardError::Inert(_) | DashboardError::NoEntity(_) => StatusCode::CONFLICT,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        } else {
            tracing::debug!("Request rejected: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        DashboardError::Backend(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
pub struct AddWidgetRequest {
    #[serde(rename = "type")]
    pub widget_type: String,
}

#[derive(Deserialize)]
pub struct UpdateWidgetRequest {
    pub title: Option<String>,
    pub config: Option<Value>,
}

#[derive(Deserialize)]
pub struct PositionRequest {
    pub x: u32,
    pub y: u32,
}

#[derive(Deserialize)]
pub struct SizeRequest {
    pub w: u32,
    pub h: u32,
}

#[derive(Deserialize)]
pub struct AttributeRequest {
    pub attribute: String,
    pub value: Value,
}

#[derive(Deserialize)]
pub struct EntitiesQuery {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub expression: String,
    #[serde(default)]
    pub anchors: Vec<String>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn get_dashboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dashboard_service.view().await)
}

pub async fn list_widget_types(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dashboard_service.types().await)
}

pub async fn add_widget(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddWidgetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.dashboard_service.add_widget(&request.widget_type).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateWidgetRequest>,
) -> ApiResult<WidgetView> {
    let view = state
        .dashboard_service
        .update_widget(&id, request.title, request.config)
        .await?;
    Ok(Json(view))
}

pub async fn remove_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.dashboard_service.remove_widget(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<PositionRequest>,
) -> ApiResult<WidgetView> {
    let view = state
        .dashboard_service
        .move_widget(&id, request.x, request.y)
        .await?;
    Ok(Json(view))
}

pub async fn resize_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SizeRequest>,
) -> ApiResult<WidgetView> {
    let view = state
        .dashboard_service
        .resize_widget(&id, request.w, request.h)
        .await?;
    Ok(Json(view))
}

pub async fn reset_layout(State(state): State<Arc<AppState>>) -> ApiResult<DashboardView> {
    Ok(Json(state.dashboard_service.reset_layout().await?))
}

pub async fn widget_data(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Option<WidgetData>> {
    Ok(Json(state.dashboard_service.widget_data(&id).await?))
}

pub async fn widget_series(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<ChartSeries> {
    Ok(Json(state.dashboard_service.widget_series(&id).await?))
}

pub async fn entity_action(
    Path((id, action)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Value> {
    Ok(Json(state.dashboard_service.entity_action(&id, &action).await?))
}

pub async fn link_entity(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<WidgetView> {
    Ok(Json(state.dashboard_service.link_new_entity(&id).await?))
}

pub async fn update_entity_attribute(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AttributeRequest>,
) -> ApiResult<Value> {
    let updated = state
        .dashboard_service
        .update_entity_attribute(&id, &request.attribute, request.value)
        .await?;
    Ok(Json(updated))
}

pub async fn list_entities(
    Query(query): Query<EntitiesQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<Value>> {
    let entities = state
        .dashboard_service
        .list_entities(&query.entity_type, query.category.as_deref())
        .await?;
    Ok(Json(entities))
}

pub async fn resolve_expression(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<ResolvedExpression> {
    let resolved = state
        .dashboard_service
        .resolve(&request.expression, &request.anchors)
        .await?;
    Ok(Json(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::key_value_store::StoreError;
    use crate::domain::layout::RectState;

    fn status_of(err: DashboardError) -> StatusCode {
        ApiError::from(err).status
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(status_of(DashboardError::NotFound("w".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(RegistryError::NotFound("weather".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                LayoutError::Overlap {
                    id: "a".into(),
                    other: "b".into()
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(
                LayoutError::Busy {
                    id: "a".into(),
                    state: RectState::Moving
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BackendError::Transport("refused".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(StoreError::InvalidKey("..".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(DashboardError::Inert("w".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(
                LayoutError::RowLimit {
                    id: "a".into(),
                    max_rows: 1_000
                }
                .into()
            ),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_backend_message_reaches_body() {
        let err = ApiError::from(BackendError::Status {
            status: 409,
            message: "Timer already running".into(),
        });
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("Timer already running"));
    }
}
