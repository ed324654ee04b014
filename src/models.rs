use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = batches)]
#[diesel(primary_key(batch_id))]
pub struct Batch {
    pub batch_id: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = batches)]
pub struct NewBatch<'a> {
    pub batch_id: &'a str,
    pub sender_name: &'a str,
    pub receiver_name: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Batch, foreign_key = batch_id))]
pub struct Document {
    pub id: i32,
    pub doc_id: String,
    pub title: String,
    pub created_at: NaiveDateTime,
    pub batch_id: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument<'a> {
    pub doc_id: String,
    pub title: &'a str,
    pub created_at: NaiveDateTime,
    pub batch_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = batch_statuses)]
#[diesel(belongs_to(Batch, foreign_key = batch_id))]
pub struct StatusEvent {
    pub id: i32,
    pub batch_id: String,
    pub location: String,
    pub signed_by: Option<String>,
    pub signed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = batch_statuses)]
pub struct NewStatusEvent<'a> {
    pub batch_id: &'a str,
    pub location: &'a str,
    pub signed_by: Option<&'a str>,
    pub signed_at: Option<NaiveDateTime>,
}
