//! Batch tracking store.
//!
//! Every operation takes a live connection and runs to completion on it.
//! Batch creation is a single transaction per id attempt; status sign-offs
//! are one `INSERT ... ON CONFLICT DO UPDATE` keyed by `(batch_id, location)`.

use chrono::{NaiveDateTime, SubsecRound, Utc};
use diesel::expression::BoxableExpression;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::Bool;
use diesel::upsert::excluded;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ids::{document_id, generate_batch_id, is_valid_batch_id};
use crate::models::{Batch, Document, NewBatch, NewDocument, NewStatusEvent, StatusEvent};
use crate::schema::{batch_statuses, batches, documents};

pub const ORIGIN_LOCATION: &str = "origin sender";
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;
pub const MAX_BATCH_ID_ATTEMPTS: u32 = 5;
/// Column widths of the person and location fields in `schema.rs`.
pub const NAME_MAX_LEN: usize = 100;
/// Column width of `documents.title`.
pub const TITLE_MAX_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("batch not found")]
    NotFound,
    #[error("could not allocate a unique batch id after {attempts} attempts")]
    DuplicateId { attempts: u32 },
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[source] DieselError),
}

pub type TrackingResult<T> = Result<T, TrackingError>;

impl From<DieselError> for TrackingError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::NotFound => TrackingError::NotFound,
            other => TrackingError::Database(other),
        }
    }
}

impl TrackingError {
    fn validation(message: impl Into<String>) -> Self {
        TrackingError::Validation(message.into())
    }
}

/// Input for a new batch, as submitted by the sender.
#[derive(Debug, Clone)]
pub struct BatchDraft {
    pub sender_name: String,
    pub receiver_name: String,
    pub titles: Vec<String>,
}

impl BatchDraft {
    pub fn new<I, T>(
        sender_name: impl Into<String>,
        receiver_name: impl Into<String>,
        titles: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            sender_name: sender_name.into(),
            receiver_name: receiver_name.into(),
            titles: titles.into_iter().map(Into::into).collect(),
        }
    }

    /// Trims every field and rejects anything blank or wider than its column.
    fn normalized(self) -> TrackingResult<Self> {
        let sender_name = required(&self.sender_name, "sender_name", NAME_MAX_LEN)?;
        let receiver_name = required(&self.receiver_name, "receiver_name", NAME_MAX_LEN)?;
        if self.titles.is_empty() {
            return Err(TrackingError::validation(
                "at least one document title is required",
            ));
        }
        let titles = self
            .titles
            .iter()
            .map(|title| required(title, "document title", TITLE_MAX_LEN))
            .collect::<TrackingResult<Vec<_>>>()?;

        Ok(Self {
            sender_name,
            receiver_name,
            titles,
        })
    }
}

fn required(value: &str, field: &str, max_len: usize) -> TrackingResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackingError::validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_len {
        return Err(TrackingError::validation(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// A batch together with its documents (insertion order) and status trail
/// (ascending `signed_at`).
#[derive(Debug, Clone)]
pub struct BatchDetails {
    pub batch: Batch,
    pub documents: Vec<Document>,
    pub statuses: Vec<StatusEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> TrackingResult<Self> {
        if page < 1 {
            return Err(TrackingError::validation("page must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(TrackingError::validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn first(page_size: i64) -> TrackingResult<Self> {
        Self::new(1, page_size)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

impl<T> Page<T> {
    fn empty(request: PageRequest, total: i64) -> Self {
        Self {
            items: Vec::new(),
            page: request.page,
            page_size: request.page_size,
            total,
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.total <= 0 {
            0
        } else {
            (self.total + self.page_size - 1) / self.page_size
        }
    }

    pub fn try_map_items<U, E, F>(self, f: F) -> Result<Page<U>, E>
    where
        F: FnOnce(Vec<T>) -> Result<Vec<U>, E>,
    {
        Ok(Page {
            items: f(self.items)?,
            page: self.page,
            page_size: self.page_size,
            total: self.total,
        })
    }
}

fn now() -> NaiveDateTime {
    // Postgres keeps microseconds; truncating up front keeps returned rows
    // equal to what was written.
    Utc::now().naive_utc().trunc_subsecs(6)
}

pub fn create_batch(
    conn: &mut PgConnection,
    draft: BatchDraft,
    max_attempts: u32,
) -> TrackingResult<BatchDetails> {
    create_batch_with(conn, draft, max_attempts, generate_batch_id)
}

/// Creates a batch drawing ids from `next_id` until one is free or
/// `max_attempts` collisions have occurred.
pub fn create_batch_with<F>(
    conn: &mut PgConnection,
    draft: BatchDraft,
    max_attempts: u32,
    mut next_id: F,
) -> TrackingResult<BatchDetails>
where
    F: FnMut() -> String,
{
    let draft = draft.normalized()?;
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let batch_id = next_id();
        match insert_batch(conn, &batch_id, &draft) {
            Ok(details) => {
                debug!(
                    batch_id = %details.batch.batch_id,
                    documents = details.documents.len(),
                    attempt,
                    "created batch"
                );
                return Ok(details);
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                warn!(batch_id = %batch_id, attempt, "batch id collision");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(TrackingError::DuplicateId { attempts })
}

fn insert_batch(
    conn: &mut PgConnection,
    batch_id: &str,
    draft: &BatchDraft,
) -> QueryResult<BatchDetails> {
    let created_at = now();

    conn.transaction::<_, DieselError, _>(|conn| {
        diesel::insert_into(batches::table)
            .values(&NewBatch {
                batch_id,
                sender_name: &draft.sender_name,
                receiver_name: &draft.receiver_name,
                created_at,
            })
            .execute(conn)?;

        diesel::insert_into(batch_statuses::table)
            .values(&NewStatusEvent {
                batch_id,
                location: ORIGIN_LOCATION,
                signed_by: Some(draft.sender_name.as_str()),
                signed_at: Some(created_at),
            })
            .execute(conn)?;

        let new_documents: Vec<NewDocument<'_>> = draft
            .titles
            .iter()
            .enumerate()
            .map(|(index, title)| NewDocument {
                doc_id: document_id(batch_id, index + 1),
                title: title.as_str(),
                created_at,
                batch_id,
            })
            .collect();
        diesel::insert_into(documents::table)
            .values(&new_documents)
            .execute(conn)?;

        let batch: Batch = batches::table.find(batch_id).first(conn)?;
        let documents = load_documents(conn, batch_id)?;
        let statuses = load_statuses(conn, batch_id)?;

        Ok(BatchDetails {
            batch,
            documents,
            statuses,
        })
    })
}

pub fn get_batch(conn: &mut PgConnection, batch_id: &str) -> TrackingResult<Batch> {
    if !is_valid_batch_id(batch_id) {
        return Err(TrackingError::NotFound);
    }
    let batch: Batch = batches::table.find(batch_id).first(conn)?;
    Ok(batch)
}

pub fn get_documents(conn: &mut PgConnection, batch_id: &str) -> TrackingResult<Vec<Document>> {
    Ok(load_documents(conn, batch_id)?)
}

pub fn get_status_events(
    conn: &mut PgConnection,
    batch_id: &str,
) -> TrackingResult<Vec<StatusEvent>> {
    Ok(load_statuses(conn, batch_id)?)
}

fn load_documents(conn: &mut PgConnection, batch_id: &str) -> QueryResult<Vec<Document>> {
    documents::table
        .filter(documents::batch_id.eq(batch_id))
        .order(documents::id.asc())
        .load(conn)
}

fn load_statuses(conn: &mut PgConnection, batch_id: &str) -> QueryResult<Vec<StatusEvent>> {
    batch_statuses::table
        .filter(batch_statuses::batch_id.eq(batch_id))
        .order((batch_statuses::signed_at.asc(), batch_statuses::id.asc()))
        .load(conn)
}

pub fn get_batch_details(conn: &mut PgConnection, batch_id: &str) -> TrackingResult<BatchDetails> {
    let batch = get_batch(conn, batch_id)?;
    let mut details = load_details(conn, vec![batch])?;
    details.pop().ok_or(TrackingError::NotFound)
}

/// Attaches documents and statuses to each batch, one query per child table.
pub fn load_details(
    conn: &mut PgConnection,
    batches: Vec<Batch>,
) -> TrackingResult<Vec<BatchDetails>> {
    if batches.is_empty() {
        return Ok(Vec::new());
    }

    let document_rows = Document::belonging_to(&batches)
        .order(documents::id.asc())
        .load::<Document>(conn)?
        .grouped_by(&batches);
    let status_rows = StatusEvent::belonging_to(&batches)
        .order((batch_statuses::signed_at.asc(), batch_statuses::id.asc()))
        .load::<StatusEvent>(conn)?
        .grouped_by(&batches);

    Ok(batches
        .into_iter()
        .zip(document_rows)
        .zip(status_rows)
        .map(|((batch, documents), statuses)| BatchDetails {
            batch,
            documents,
            statuses,
        })
        .collect())
}

/// Substring search over id, sender and receiver. A blank query matches
/// nothing.
pub fn search_by_query(
    conn: &mut PgConnection,
    query: &str,
    request: PageRequest,
) -> TrackingResult<Page<Batch>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Page::empty(request, 0));
    }
    let pattern = like_pattern(query);
    fetch_page(conn, Some(&pattern), request)
}

/// Like [`search_by_query`], except a missing or blank query lists every
/// batch, newest first.
pub fn list_or_search(
    conn: &mut PgConnection,
    query: Option<&str>,
    request: PageRequest,
) -> TrackingResult<Page<Batch>> {
    match query.map(str::trim).filter(|query| !query.is_empty()) {
        Some(query) => search_by_query(conn, query, request),
        None => fetch_page(conn, None, request),
    }
}

type BatchFilter<'a> = Box<dyn BoxableExpression<batches::table, Pg, SqlType = Bool> + 'a>;

fn matches_pattern(pattern: &str) -> BatchFilter<'_> {
    Box::new(
        batches::batch_id
            .ilike(pattern)
            .or(batches::sender_name.ilike(pattern))
            .or(batches::receiver_name.ilike(pattern)),
    )
}

fn fetch_page(
    conn: &mut PgConnection,
    pattern: Option<&str>,
    request: PageRequest,
) -> TrackingResult<Page<Batch>> {
    let total: i64 = match pattern {
        Some(pattern) => batches::table
            .filter(matches_pattern(pattern))
            .count()
            .get_result(conn)?,
        None => batches::table.count().get_result(conn)?,
    };

    if request.offset() >= total {
        return Ok(Page::empty(request, total));
    }

    let mut query = batches::table
        .order((batches::created_at.desc(), batches::batch_id.asc()))
        .limit(request.page_size)
        .offset(request.offset())
        .into_boxed();
    if let Some(pattern) = pattern {
        query = query.filter(matches_pattern(pattern));
    }
    let items: Vec<Batch> = query.load(conn)?;

    Ok(Page {
        items,
        page: request.page,
        page_size: request.page_size,
        total,
    })
}

/// Wraps `query` in `%` wildcards, escaping LIKE metacharacters so they
/// match literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Records a sign-off at `location`, overwriting any earlier sign-off for the
/// same location of this batch.
pub fn upsert_status(
    conn: &mut PgConnection,
    batch_id: &str,
    location: &str,
    signed_by: &str,
    signed_at: NaiveDateTime,
) -> TrackingResult<StatusEvent> {
    let location = required(location, "location", NAME_MAX_LEN)?;
    let signed_by = required(signed_by, "signed_by", NAME_MAX_LEN)?;
    if !is_valid_batch_id(batch_id) {
        return Err(TrackingError::NotFound);
    }

    let new_status = NewStatusEvent {
        batch_id,
        location: &location,
        signed_by: Some(signed_by.as_str()),
        signed_at: Some(signed_at.trunc_subsecs(6)),
    };

    let result = diesel::insert_into(batch_statuses::table)
        .values(&new_status)
        .on_conflict((batch_statuses::batch_id, batch_statuses::location))
        .do_update()
        .set((
            batch_statuses::signed_by.eq(excluded(batch_statuses::signed_by)),
            batch_statuses::signed_at.eq(excluded(batch_statuses::signed_at)),
        ))
        .get_result::<StatusEvent>(conn);

    match result {
        Ok(status) => {
            debug!(batch_id, location = %status.location, "recorded status");
            Ok(status)
        }
        Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
            Err(TrackingError::NotFound)
        }
        Err(err) => Err(err.into()),
    }
}

/// URL encoded into a batch's scannable code.
pub fn tracking_url(base_url: &str, batch_id: &str) -> String {
    format!(
        "{}/search_batches?query={batch_id}",
        base_url.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("Bob"), "%Bob%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn page_request_rejects_out_of_range_values() {
        assert!(matches!(
            PageRequest::new(0, 50),
            Err(TrackingError::Validation(_))
        ));
        assert!(matches!(
            PageRequest::new(1, 0),
            Err(TrackingError::Validation(_))
        ));
        assert!(matches!(
            PageRequest::new(1, MAX_PAGE_SIZE + 1),
            Err(TrackingError::Validation(_))
        ));
        assert_eq!(PageRequest::new(3, 50).unwrap().offset(), 100);
        assert_eq!(PageRequest::first(DEFAULT_PAGE_SIZE).unwrap().offset(), 0);
    }

    #[test]
    fn total_pages_rounds_up() {
        let request = PageRequest::new(4, 50).unwrap();
        let page: Page<()> = Page::empty(request, 120);
        assert_eq!(page.total_pages(), 3);
        assert!(page.items.is_empty());
        assert_eq!(Page::<()>::empty(request, 0).total_pages(), 0);
        assert_eq!(Page::<()>::empty(request, 50).total_pages(), 1);
    }

    #[test]
    fn draft_normalization_trims_fields() {
        let draft = BatchDraft::new("  Alice ", "Bob", ["Invoice ", " Contract"])
            .normalized()
            .unwrap();
        assert_eq!(draft.sender_name, "Alice");
        assert_eq!(draft.receiver_name, "Bob");
        assert_eq!(draft.titles, vec!["Invoice", "Contract"]);
    }

    #[test]
    fn draft_normalization_rejects_missing_fields() {
        let cases = [
            BatchDraft::new("", "Bob", ["Invoice"]),
            BatchDraft::new("Alice", "   ", ["Invoice"]),
            BatchDraft::new("Alice", "Bob", Vec::<String>::new()),
            BatchDraft::new("Alice", "Bob", ["Invoice", " "]),
        ];
        for draft in cases {
            assert!(matches!(
                draft.normalized(),
                Err(TrackingError::Validation(_))
            ));
        }
    }

    #[test]
    fn draft_normalization_rejects_oversized_fields() {
        let long_name = "x".repeat(NAME_MAX_LEN + 1);
        let long_title = "t".repeat(TITLE_MAX_LEN + 1);
        let cases = [
            BatchDraft::new(long_name.as_str(), "Bob", ["Invoice"]),
            BatchDraft::new("Alice", long_name.as_str(), ["Invoice"]),
            BatchDraft::new("Alice", "Bob", [long_title.as_str()]),
        ];
        for draft in cases {
            assert!(matches!(
                draft.normalized(),
                Err(TrackingError::Validation(_))
            ));
        }

        // Width is measured in characters after trimming, like the column.
        let padded = format!("  {}  ", "é".repeat(NAME_MAX_LEN));
        let draft = BatchDraft::new(padded, "Bob", ["t".repeat(TITLE_MAX_LEN)])
            .normalized()
            .unwrap();
        assert_eq!(draft.sender_name.chars().count(), NAME_MAX_LEN);
    }

    #[test]
    fn tracking_url_points_at_search_page() {
        assert_eq!(
            tracking_url("http://127.0.0.1:3000/", "AB123456"),
            "http://127.0.0.1:3000/search_batches?query=AB123456"
        );
        assert_eq!(
            tracking_url("https://docs.example.com/track", "ZZ000001"),
            "https://docs.example.com/track/search_batches?query=ZZ000001"
        );
    }

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        assert!(matches!(
            TrackingError::from(DieselError::NotFound),
            TrackingError::NotFound
        ));
        assert!(matches!(
            TrackingError::from(DieselError::RollbackTransaction),
            TrackingError::Database(_)
        ));
    }
}
