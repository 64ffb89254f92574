use sea_orm::entity::prelude::*;

/// One persisted interaction: a single completed request/response pair,
/// normalized into a ShareGPT-style conversation plus the raw wire bodies.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "interactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: String,
    pub model: Option<String>,
    pub source_provider: String,
    pub auth_scheme: String,
    pub conversations: String,
    pub tools: Option<String>,
    pub tool_calls: Option<String>,
    pub raw_request: String,
    pub raw_response: String,
    pub truncated: bool,
}

impl ActiveModelBehavior for ActiveModel {}
