use sea_orm::entity::prelude::*;

/// Webhook subscription registered by an owner.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhooks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(indexed)]
    pub owner: String,
    pub url: String,
    pub enabled: bool,
    pub livemode: bool,
    /// JSON array of event types; `"*"` matches every type.
    pub events: Json,
    #[sea_orm(unique)]
    pub secret: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
