//! HTTP handlers.

use std::convert::Infallible;

use axum::{
    Json,
    body::Bytes,
    extract::{
        FromRequest, FromRequestParts, Path as UrlPath, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt as _};
use uuid::Uuid;

use super::AppState;
use crate::{
    controller::{AnswerSource, SessionEvent, SessionStream, Submission},
    error::{ErrorKind, ErrorReport, GradeError},
    grading::{Grade, Topic, builtin_topics},
    prelude::*,
    record::GradingRecord,
};

/// The header carrying the caller's user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Our single page.
const INDEX_HTML: &str = include_str!("index.html");

/// The caller's user ID, if they sent one.
pub struct UserId(Option<String>);

impl UserId {
    fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        Ok(UserId(user_id))
    }
}

/// A [`GradeError`] on its way to becoming an HTTP response.
pub struct ApiError(GradeError);

impl From<GradeError> for ApiError {
    fn from(err: GradeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.kind()) {
            (GradeError::ImageTooLarge { .. }, _) => StatusCode::PAYLOAD_TOO_LARGE,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::NoTextDetected) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Unauthenticated) => StatusCode::UNAUTHORIZED,
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Upstream | ErrorKind::Parse) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log_error(&self.0);
        (status, Json(ErrorReport::from(&self.0))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(GradeError::BadRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(GradeError::BadRequest(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(GradeError::BadRequest(rejection.body_text()))
    }
}

/// [`Json`], but malformed bodies are reported as an [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(T);

/// [`Query`], but bad parameters are reported as an [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(T);

/// [`UrlPath`], but bad path segments are reported as an [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(UrlPath), rejection(ApiError))]
pub struct ApiPath<T>(T);

/// Service failures are worth a warning. User mistakes are not.
fn log_error(err: &GradeError) {
    match err.kind() {
        ErrorKind::Upstream | ErrorKind::Parse | ErrorKind::Internal => {
            warn!("Request failed: {err}")
        }
        _ => debug!("Request rejected: {err}"),
    }
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn topics() -> Json<&'static [Topic]> {
    Json(builtin_topics())
}

/// OCR an image, returning `{ "text": ... }`.
#[instrument(level = "debug", skip_all)]
pub async fn ocr(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let text = state.controller.extract_text(body.to_vec()).await?;
    Ok(Json(json!({ "text": text })))
}

/// Body of `POST /api/grade`.
#[derive(Debug, Deserialize)]
pub struct GradeRequest {
    question: String,
    answer: String,
    #[serde(default)]
    save: bool,
}

/// Grade a typed answer.
#[instrument(level = "debug", skip_all)]
pub async fn grade(
    State(state): State<AppState>,
    user_id: UserId,
    ApiJson(req): ApiJson<GradeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.controller.submit(Submission {
        user_id: user_id.0,
        question: req.question,
        answer: AnswerSource::Text(req.answer),
        save: req.save,
    })?;
    Ok(sse_response(events))
}

/// Query parameters of `POST /api/grade/image`.
#[derive(Debug, Deserialize)]
pub struct GradeImageQuery {
    question: String,
    #[serde(default)]
    save: bool,
}

/// Grade a photographed answer, sent as the request body.
#[instrument(level = "debug", skip_all)]
pub async fn grade_image(
    State(state): State<AppState>,
    user_id: UserId,
    ApiQuery(query): ApiQuery<GradeImageQuery>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.controller.submit(Submission {
        user_id: user_id.0,
        question: query.question,
        answer: AnswerSource::Image(body.to_vec()),
        save: query.save,
    })?;
    Ok(sse_response(events))
}

/// Turn session events into SSE events. Errors become an `error` event,
/// which ends the stream.
fn sse_response(events: SessionStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = events.map(|event| {
        let event = match event {
            Ok(event) => Event::default()
                .event(event_name(&event))
                .json_data(&event),
            Err(err) => {
                log_error(&err);
                Event::default()
                    .event("error")
                    .json_data(ErrorReport::from(&err))
            }
        };
        Ok::<_, Infallible>(event.unwrap_or_else(|err| {
            error!("Could not serialize event: {err}");
            Event::default().event("error").data(
                r#"{"kind":"internal","message":"Internal error: could not send event"}"#,
            )
        }))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Extracted { .. } => "extracted",
        SessionEvent::Chunk { .. } => "chunk",
        SessionEvent::Graded { .. } => "graded",
        SessionEvent::Saved { .. } => "saved",
    }
}

/// Query parameters of `GET /api/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

/// List the caller's history.
pub async fn list_history(
    State(state): State<AppState>,
    user_id: UserId,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<Vec<GradingRecord>>, ApiError> {
    let records = state
        .controller
        .history(user_id.as_str(), query.limit)
        .await?;
    Ok(Json(records))
}

/// Body of `POST /api/history`.
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    question: String,
    answer: String,
    grade: Grade,
}

/// Save a grade the caller already has.
pub async fn save_history(
    State(state): State<AppState>,
    user_id: UserId,
    ApiJson(req): ApiJson<SaveRequest>,
) -> Result<(StatusCode, Json<GradingRecord>), ApiError> {
    let record = state
        .controller
        .save(user_id.as_str(), &req.question, &req.answer, &req.grade)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Delete one of the caller's records.
pub async fn delete_history(
    State(state): State<AppState>,
    user_id: UserId,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.controller.delete(user_id.as_str(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
