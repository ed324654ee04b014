use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppResult;
use crate::models::{Batch, Document, StatusEvent};
use crate::notify::{Notifier, StatusNotice};
use crate::state::AppState;
use crate::tracking::{self, BatchDetails, BatchDraft, Page, PageRequest};

#[derive(Deserialize)]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub document_titles: Vec<String>,
}

#[derive(Deserialize)]
pub struct BatchListQuery {
    pub query: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub signed_by: String,
    pub signed_at: Option<DateTime<Utc>>,
    pub notify_email: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub created_at: String,
}

impl From<Batch> for BatchResponse {
    fn from(batch: Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            sender_name: batch.sender_name,
            receiver_name: batch.receiver_name,
            created_at: to_iso(batch.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub doc_id: String,
    pub title: String,
    pub created_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            doc_id: document.doc_id,
            title: document.title,
            created_at: to_iso(document.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub location: String,
    pub signed_by: Option<String>,
    pub signed_at: Option<String>,
}

impl From<StatusEvent> for StatusResponse {
    fn from(status: StatusEvent) -> Self {
        Self {
            location: status.location,
            signed_by: status.signed_by,
            signed_at: status.signed_at.map(to_iso),
        }
    }
}

#[derive(Serialize)]
pub struct BatchDetailResponse {
    pub batch: BatchResponse,
    pub documents: Vec<DocumentResponse>,
    pub statuses: Vec<StatusResponse>,
    pub tracking_url: String,
}

#[derive(Serialize)]
pub struct BatchPageResponse {
    pub query: Option<String>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
    pub results: Vec<BatchDetailResponse>,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    pub batch_id: String,
    pub status: StatusResponse,
}

pub async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<CreateBatchRequest>,
) -> AppResult<(StatusCode, Json<BatchDetailResponse>)> {
    let draft = BatchDraft::new(
        payload.sender_name,
        payload.receiver_name,
        payload.document_titles,
    );

    let mut conn = state.db()?;
    let details = tracking::create_batch(&mut conn, draft, state.config.batch_id_max_attempts)?;

    info!(
        batch_id = %details.batch.batch_id,
        documents = details.documents.len(),
        "created document batch"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_detail_response(&state, details)),
    ))
}

/// Lists every batch newest first, or filters when `query` is given.
pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<BatchListQuery>,
) -> AppResult<Json<BatchPageResponse>> {
    let request = page_request(&state, &params)?;
    let mut conn = state.db()?;
    let page = tracking::list_or_search(&mut conn, params.query.as_deref(), request)?;
    let page = page.try_map_items(|batches| tracking::load_details(&mut conn, batches))?;
    Ok(Json(to_page_response(&state, params.query, page)))
}

/// Filters batches by `query`; a missing query returns no results.
pub async fn search_batches(
    State(state): State<AppState>,
    Query(params): Query<BatchListQuery>,
) -> AppResult<Json<BatchPageResponse>> {
    let request = page_request(&state, &params)?;
    let mut conn = state.db()?;
    let page = tracking::search_by_query(
        &mut conn,
        params.query.as_deref().unwrap_or_default(),
        request,
    )?;
    let page = page.try_map_items(|batches| tracking::load_details(&mut conn, batches))?;
    Ok(Json(to_page_response(&state, params.query, page)))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> AppResult<Json<BatchDetailResponse>> {
    let mut conn = state.db()?;
    let details = tracking::get_batch_details(&mut conn, &batch_id)?;
    Ok(Json(to_detail_response(&state, details)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<StatusUpdateResponse>> {
    let signed_at = payload
        .signed_at
        .map(|value| value.naive_utc())
        .unwrap_or_else(|| Utc::now().naive_utc());

    let (status, documents) = {
        let mut conn = state.db()?;
        let status = tracking::upsert_status(
            &mut conn,
            &batch_id,
            &payload.location,
            &payload.signed_by,
            signed_at,
        )?;
        let documents = match tracking::get_documents(&mut conn, &batch_id) {
            Ok(documents) => documents,
            Err(err) => {
                warn!(
                    batch_id = %batch_id,
                    error = %err,
                    "failed to load documents for notice"
                );
                Vec::new()
            }
        };
        (status, documents)
    };

    info!(
        batch_id = %batch_id,
        location = %status.location,
        "recorded status sign-off"
    );

    let recipient = payload
        .notify_email
        .as_deref()
        .map(str::trim)
        .filter(|recipient| !recipient.is_empty());
    if let Some(recipient) = recipient {
        notify_documents(state.notifier.as_ref(), &documents, &status, recipient).await;
    }

    Ok(Json(StatusUpdateResponse {
        batch_id,
        status: status.into(),
    }))
}

/// Sends one notice per document. Delivery failures are logged and dropped so
/// the recorded status always stands.
async fn notify_documents(
    notifier: &dyn Notifier,
    documents: &[Document],
    status: &StatusEvent,
    recipient: &str,
) {
    let status_text = describe_status(status);
    for document in documents {
        let notice = StatusNotice {
            doc_id: document.doc_id.clone(),
            title: document.title.clone(),
            status: status_text.clone(),
            recipient: recipient.to_string(),
        };
        if let Err(err) = notifier.send_status_update(&notice).await {
            warn!(
                doc_id = %document.doc_id,
                recipient,
                error = %err,
                "failed to send status notice"
            );
        }
    }
}

fn describe_status(status: &StatusEvent) -> String {
    match status.signed_by.as_deref() {
        Some(signed_by) => format!("{} (signed by {signed_by})", status.location),
        None => status.location.clone(),
    }
}

fn page_request(state: &AppState, params: &BatchListQuery) -> AppResult<PageRequest> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(state.config.page_size);
    Ok(PageRequest::new(page, page_size)?)
}

fn to_detail_response(state: &AppState, details: BatchDetails) -> BatchDetailResponse {
    let tracking_url =
        tracking::tracking_url(&state.config.public_base_url, &details.batch.batch_id);
    BatchDetailResponse {
        batch: details.batch.into(),
        documents: details.documents.into_iter().map(Into::into).collect(),
        statuses: details.statuses.into_iter().map(Into::into).collect(),
        tracking_url,
    }
}

fn to_page_response(
    state: &AppState,
    query: Option<String>,
    page: Page<BatchDetails>,
) -> BatchPageResponse {
    let total_pages = page.total_pages();
    BatchPageResponse {
        query,
        page: page.page,
        page_size: page.page_size,
        total: page.total,
        total_pages,
        results: page
            .items
            .into_iter()
            .map(|details| to_detail_response(state, details))
            .collect(),
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
