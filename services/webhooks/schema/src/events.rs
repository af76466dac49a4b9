use sea_orm::entity::prelude::*;

/// Every event received by the dispatcher, with its delivery state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,
    #[sea_orm(indexed)]
    pub destination: String,
    #[sea_orm(column_name = "type")]
    pub event_type: String,
    pub livemode: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Raw JSON text, stored verbatim so delivery signs the emitted bytes.
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub sent: bool,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub attempts: i32,
    pub retry: bool,
    pub last_retry: Option<chrono::DateTime<chrono::Utc>>,
    pub backoff_until: Option<chrono::DateTime<chrono::Utc>>,
    /// `unhandled`, `webhook_not_found` or `max_attempts` once retry is disabled.
    pub terminal_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
