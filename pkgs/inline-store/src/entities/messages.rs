//! Message entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64, // negative while the row is an optimistic placeholder
    pub global_id: Option<i64>,
    pub random_id: Option<i64>,
    pub peer_user_id: Option<i64>,   // set for direct chats
    pub peer_thread_id: Option<i64>, // set for threads
    pub from_id: i64,
    pub date: i64, // unix millis
    pub text: Option<String>,
    pub out: bool,
    pub status: String, // "Sending", "Sent" or "Failed"
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reactions::Entity")]
    Reactions,
}

impl Related<super::reactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
