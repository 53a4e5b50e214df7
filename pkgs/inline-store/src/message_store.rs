//! Message store - persistent storage for messages using Sea-ORM over SQLite

use crate::entities::{messages, reactions};
use crate::error::{Result, StoreError};
use crate::repository::MessageRepository;
use crate::types::{
    DateBound, Message, MessageKey, MessageMutation, MessageQuery, MessageStatus, Peer, Reaction,
    SortOrder,
};
use crate::PersistenceConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Message store - manages persistent message storage
pub struct MessageStore {
    pub(crate) db: DatabaseConnection,
    pub(crate) config: PersistenceConfig,
    write_lock: Mutex<()>,
}

impl MessageStore {
    /// Create a new message store with default config
    pub async fn new(db_path: PathBuf) -> anyhow::Result<Self> {
        Self::with_config(PersistenceConfig { db_path }).await
    }

    /// Create a message store with custom config
    pub async fn with_config(config: PersistenceConfig) -> anyhow::Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .context("Invalid database path")?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db: DatabaseConnection = Database::connect(db_url.as_str())
            .await
            .context("Failed to connect to message database")?;

        crate::migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        info!("Message store initialized at {}", config.db_path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a message store with an existing database connection
    pub async fn with_connection(db: DatabaseConnection) -> anyhow::Result<Self> {
        crate::migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        info!("Message store initialized with existing connection");

        Ok(Self {
            db,
            config: PersistenceConfig::default(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Get a single message by any of its keys
    pub async fn get_message(&self, key: MessageKey) -> Result<Option<Message>> {
        match find_by_key(&self.db, key).await? {
            Some(model) => Ok(attach_reactions(&self.db, vec![model]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn insert(&self, message: Message) -> Result<Vec<Message>> {
        let txn = self.db.begin().await?;

        messages::Entity::insert(to_active_model(&message, message.id))
            .exec_without_returning(&txn)
            .await?;
        replace_reactions(&txn, message.id, &message.reactions).await?;

        let rows = load_rows(&txn, vec![message.id]).await?;
        txn.commit().await?;

        debug!("Inserted message {} into {}", message.id, message.peer);
        Ok(rows)
    }

    async fn upsert(&self, message: Message) -> Result<Vec<Message>> {
        let txn = self.db.begin().await?;

        let mut existing = None;
        if let Some(global_id) = message.global_id {
            existing = find_by_key(&txn, MessageKey::Global(global_id)).await?;
        }
        if existing.is_none() {
            if let Some(random_id) = message.random_id {
                existing = find_by_key(&txn, MessageKey::Correlation(random_id)).await?;
            }
        }

        let id = match existing {
            Some(model) => {
                let id = model.id;
                let mut active = to_active_model(&message, id);
                active.global_id = Set(message.global_id.or(model.global_id));
                active.random_id = Set(message.random_id.or(model.random_id));
                active.update(&txn).await?;
                debug!("Merged message {:?} into row {}", message.key(), id);
                id
            }
            None => {
                let id = next_local_id(&txn).await?;
                messages::Entity::insert(to_active_model(&message, id))
                    .exec_without_returning(&txn)
                    .await?;
                debug!("Stored message {:?} as row {}", message.key(), id);
                id
            }
        };
        replace_reactions(&txn, id, &message.reactions).await?;

        let rows = load_rows(&txn, vec![id]).await?;
        txn.commit().await?;
        Ok(rows)
    }

    async fn set_status(
        &self,
        random_id: i64,
        status: MessageStatus,
        global_id: Option<i64>,
    ) -> Result<Vec<Message>> {
        let key = MessageKey::Correlation(random_id);
        let model = find_by_key(&self.db, key)
            .await?
            .ok_or(StoreError::NotFound(key))?;

        let id = model.id;
        let mut active = model.into_active_model();
        active.status = Set(status.as_str().to_string());
        if global_id.is_some() {
            active.global_id = Set(global_id);
        }
        active.update(&self.db).await?;

        debug!("Message {} marked {}", id, status.as_str());
        load_rows(&self.db, vec![id]).await
    }

    async fn delete(&self, keys: Vec<MessageKey>) -> Result<Vec<Message>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let condition = keys
            .iter()
            .fold(Condition::any(), |cond, key| cond.add(key_condition(*key)));

        let txn = self.db.begin().await?;
        let models = messages::Entity::find()
            .filter(condition)
            .all(&txn)
            .await?;
        let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
        let removed = attach_reactions(&txn, models).await?;

        if !ids.is_empty() {
            reactions::Entity::delete_many()
                .filter(reactions::Column::MessageId.is_in(ids.clone()))
                .exec(&txn)
                .await?;
            messages::Entity::delete_many()
                .filter(messages::Column::Id.is_in(ids))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        debug!("Deleted {} messages", removed.len());
        Ok(removed)
    }

    async fn react(&self, key: MessageKey, reaction: Reaction) -> Result<Vec<Message>> {
        let txn = self.db.begin().await?;
        let model = find_by_key(&txn, key)
            .await?
            .ok_or(StoreError::NotFound(key))?;

        remove_reaction(&txn, model.id, reaction.user_id, &reaction.emoji).await?;
        insert_reaction(&txn, model.id, &reaction).await?;

        let rows = load_rows(&txn, vec![model.id]).await?;
        txn.commit().await?;
        Ok(rows)
    }

    async fn unreact(&self, key: MessageKey, user_id: i64, emoji: String) -> Result<Vec<Message>> {
        let txn = self.db.begin().await?;
        let model = find_by_key(&txn, key)
            .await?
            .ok_or(StoreError::NotFound(key))?;

        remove_reaction(&txn, model.id, user_id, &emoji).await?;

        let rows = load_rows(&txn, vec![model.id]).await?;
        txn.commit().await?;
        Ok(rows)
    }
}

#[async_trait]
impl MessageRepository for MessageStore {
    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut select = messages::Entity::find().filter(peer_condition(query.peer));

        select = match query.bound {
            DateBound::Latest => select,
            DateBound::AtOrBefore(cursor) => {
                select.filter(messages::Column::Date.lte(cursor.timestamp_millis()))
            }
            DateBound::AtOrAfter(cursor) => {
                select.filter(messages::Column::Date.gte(cursor.timestamp_millis()))
            }
            DateBound::Between(min, max) => select
                .filter(messages::Column::Date.gte(min.timestamp_millis()))
                .filter(messages::Column::Date.lte(max.timestamp_millis())),
        };

        select = match query.order {
            SortOrder::Ascending => select
                .order_by_asc(messages::Column::Date)
                .order_by_asc(messages::Column::Id),
            SortOrder::Descending => select
                .order_by_desc(messages::Column::Date)
                .order_by_desc(messages::Column::Id),
        };

        let models = select.limit(query.limit as u64).all(&self.db).await?;
        let messages = attach_reactions(&self.db, models).await?;

        debug!(
            "Retrieved {} messages for {} ({:?})",
            messages.len(),
            query.peer,
            query.bound
        );
        Ok(messages)
    }

    async fn write(&self, mutation: MessageMutation) -> Result<Vec<Message>> {
        let _guard = self.write_lock.lock().await;

        match mutation {
            MessageMutation::Insert(message) => self.insert(message).await,
            MessageMutation::Upsert(message) => self.upsert(message).await,
            MessageMutation::SetStatus {
                random_id,
                status,
                global_id,
            } => self.set_status(random_id, status, global_id).await,
            MessageMutation::Delete(keys) => self.delete(keys).await,
            MessageMutation::React { key, reaction } => self.react(key, reaction).await,
            MessageMutation::Unreact {
                key,
                user_id,
                emoji,
            } => self.unreact(key, user_id, emoji).await,
        }
    }
}

fn peer_condition(peer: Peer) -> SimpleExpr {
    match peer {
        Peer::User(id) => messages::Column::PeerUserId.eq(id),
        Peer::Thread(id) => messages::Column::PeerThreadId.eq(id),
    }
}

fn key_condition(key: MessageKey) -> SimpleExpr {
    match key {
        MessageKey::Local(id) => messages::Column::Id.eq(id),
        MessageKey::Global(id) => messages::Column::GlobalId.eq(id),
        MessageKey::Correlation(id) => messages::Column::RandomId.eq(id),
    }
}

fn to_active_model(message: &Message, id: i64) -> messages::ActiveModel {
    let (peer_user_id, peer_thread_id) = match message.peer {
        Peer::User(user_id) => (Some(user_id), None),
        Peer::Thread(thread_id) => (None, Some(thread_id)),
    };

    messages::ActiveModel {
        id: Set(id),
        global_id: Set(message.global_id),
        random_id: Set(message.random_id),
        peer_user_id: Set(peer_user_id),
        peer_thread_id: Set(peer_thread_id),
        from_id: Set(message.from_id),
        date: Set(message.date.timestamp_millis()),
        text: Set(message.text.clone()),
        out: Set(message.out),
        status: Set(message.status.as_str().to_string()),
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp(millis))
}

/// Convert Sea-ORM model to Message
fn model_to_message(model: messages::Model, reactions: Vec<Reaction>) -> Result<Message> {
    let peer = match (model.peer_user_id, model.peer_thread_id) {
        (Some(user_id), _) => Peer::User(user_id),
        (None, Some(thread_id)) => Peer::Thread(thread_id),
        (None, None) => {
            return Err(StoreError::CorruptRow(format!(
                "message {} has no peer",
                model.id
            )))
        }
    };

    Ok(Message {
        id: model.id,
        global_id: model.global_id,
        random_id: model.random_id,
        peer,
        from_id: model.from_id,
        date: from_millis(model.date)?,
        text: model.text,
        out: model.out,
        status: MessageStatus::parse(&model.status),
        reactions,
    })
}

async fn find_by_key<C: ConnectionTrait>(
    conn: &C,
    key: MessageKey,
) -> Result<Option<messages::Model>> {
    Ok(messages::Entity::find()
        .filter(key_condition(key))
        .one(conn)
        .await?)
}

async fn next_local_id<C: ConnectionTrait>(conn: &C) -> Result<i64> {
    let highest = messages::Entity::find()
        .order_by_desc(messages::Column::Id)
        .one(conn)
        .await?
        .map(|m| m.id)
        .unwrap_or(0);

    Ok(highest.max(0) + 1)
}

async fn load_rows<C: ConnectionTrait>(conn: &C, ids: Vec<i64>) -> Result<Vec<Message>> {
    let models = messages::Entity::find()
        .filter(messages::Column::Id.is_in(ids))
        .order_by_asc(messages::Column::Date)
        .all(conn)
        .await?;

    attach_reactions(conn, models).await
}

/// Fetch the reactions of every row and build `Message`s, keeping row order
async fn attach_reactions<C: ConnectionTrait>(
    conn: &C,
    models: Vec<messages::Model>,
) -> Result<Vec<Message>> {
    if models.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
    let rows = reactions::Entity::find()
        .filter(reactions::Column::MessageId.is_in(ids))
        .order_by_asc(reactions::Column::Date)
        .order_by_asc(reactions::Column::Id)
        .all(conn)
        .await?;

    let mut grouped: HashMap<i64, Vec<Reaction>> = HashMap::new();
    for row in rows {
        grouped.entry(row.message_id).or_default().push(Reaction {
            user_id: row.user_id,
            emoji: row.emoji,
            date: from_millis(row.date)?,
        });
    }

    models
        .into_iter()
        .map(|model| {
            let reactions = grouped.remove(&model.id).unwrap_or_default();
            model_to_message(model, reactions)
        })
        .collect()
}

async fn insert_reaction<C: ConnectionTrait>(
    conn: &C,
    message_id: i64,
    reaction: &Reaction,
) -> Result<()> {
    let active = reactions::ActiveModel {
        message_id: Set(message_id),
        user_id: Set(reaction.user_id),
        emoji: Set(reaction.emoji.clone()),
        date: Set(reaction.date.timestamp_millis()),
        ..Default::default()
    };
    reactions::Entity::insert(active)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn remove_reaction<C: ConnectionTrait>(
    conn: &C,
    message_id: i64,
    user_id: i64,
    emoji: &str,
) -> Result<()> {
    reactions::Entity::delete_many()
        .filter(reactions::Column::MessageId.eq(message_id))
        .filter(reactions::Column::UserId.eq(user_id))
        .filter(reactions::Column::Emoji.eq(emoji))
        .exec(conn)
        .await?;
    Ok(())
}

async fn replace_reactions<C: ConnectionTrait>(
    conn: &C,
    message_id: i64,
    reactions: &[Reaction],
) -> Result<()> {
    reactions::Entity::delete_many()
        .filter(reactions::Column::MessageId.eq(message_id))
        .exec(conn)
        .await?;

    for reaction in reactions {
        insert_reaction(conn, message_id, reaction).await?;
    }
    Ok(())
}
