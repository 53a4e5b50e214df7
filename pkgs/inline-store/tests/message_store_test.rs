// Copyright 2024 Inline Team.
//
// Integration tests for MessageStore over SQLite

use chrono::{DateTime, Utc};
use inline_store::{
    DateBound, Message, MessageKey, MessageMutation, MessageQuery, MessageRepository,
    MessageStatus, MessageStore, Peer, Reaction, SortOrder,
};
use tempfile::NamedTempFile;

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

fn create_test_message(global_id: Option<i64>, random_id: Option<i64>, millis: i64) -> Message {
    Message {
        id: 0,
        global_id,
        random_id,
        peer: Peer::Thread(7),
        from_id: 3,
        date: at(millis),
        text: Some("Hello, World!".to_string()),
        out: false,
        status: MessageStatus::Sent,
        reactions: Vec::new(),
    }
}

async fn open_store(temp_file: &NamedTempFile) -> MessageStore {
    MessageStore::new(temp_file.path().to_path_buf())
        .await
        .expect("Failed to create message store")
}

#[tokio::test]
async fn test_message_store_initialization() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    let rows = store
        .query_messages(&MessageQuery::latest(Peer::Thread(7), 10))
        .await
        .expect("Failed to query empty store");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_reopen_keeps_messages() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let store = open_store(&temp_file).await;
        store
            .write(MessageMutation::Upsert(create_test_message(Some(1), None, 1_000)))
            .await
            .unwrap();
    }

    let store = open_store(&temp_file).await;
    let message = store.get_message(MessageKey::Global(1)).await.unwrap();
    assert!(message.is_some());
}

#[tokio::test]
async fn test_ranged_queries_respect_order_and_limit() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    for i in 1..=10 {
        store
            .write(MessageMutation::Upsert(create_test_message(
                Some(i),
                None,
                i * 1_000,
            )))
            .await
            .unwrap();
    }

    let latest = store
        .query_messages(&MessageQuery::latest(Peer::Thread(7), 3))
        .await
        .unwrap();
    let globals: Vec<Option<i64>> = latest.iter().map(|m| m.global_id).collect();
    assert_eq!(globals, vec![Some(10), Some(9), Some(8)]);

    let newer = store
        .query_messages(&MessageQuery {
            peer: Peer::Thread(7),
            order: SortOrder::Ascending,
            bound: DateBound::AtOrAfter(at(8_000)),
            limit: 100,
        })
        .await
        .unwrap();
    let globals: Vec<Option<i64>> = newer.iter().map(|m| m.global_id).collect();
    assert_eq!(globals, vec![Some(8), Some(9), Some(10)]);

    let between = store
        .query_messages(&MessageQuery {
            peer: Peer::Thread(7),
            order: SortOrder::Descending,
            bound: DateBound::Between(at(3_000), at(5_000)),
            limit: 100,
        })
        .await
        .unwrap();
    assert_eq!(between.len(), 3);
}

#[tokio::test]
async fn test_optimistic_insert_then_echo_merges_into_same_row() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    let mut optimistic = create_test_message(None, Some(77), 5_000);
    optimistic.id = -77;
    optimistic.out = true;
    optimistic.status = MessageStatus::Sending;
    store
        .write(MessageMutation::Insert(optimistic))
        .await
        .expect("Failed to insert optimistic message");

    let echo = create_test_message(Some(900), Some(77), 5_000);
    let merged = store.write(MessageMutation::Upsert(echo)).await.unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].id, -77);
    assert_eq!(merged[0].global_id, Some(900));

    let all = store
        .query_messages(&MessageQuery::latest(Peer::Thread(7), 10))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_set_status_marks_sent_and_failed() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    let mut optimistic = create_test_message(None, Some(5), 1_000);
    optimistic.id = -5;
    optimistic.status = MessageStatus::Sending;
    store
        .write(MessageMutation::Insert(optimistic))
        .await
        .unwrap();

    let sent = store
        .write(MessageMutation::SetStatus {
            random_id: 5,
            status: MessageStatus::Sent,
            global_id: Some(55),
        })
        .await
        .unwrap();
    assert_eq!(sent[0].status, MessageStatus::Sent);
    assert_eq!(sent[0].key(), MessageKey::Global(55));

    let missing = store
        .write(MessageMutation::SetStatus {
            random_id: 6,
            status: MessageStatus::Failed,
            global_id: None,
        })
        .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_delete_returns_removed_rows() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    for i in 1..=3 {
        store
            .write(MessageMutation::Upsert(create_test_message(
                Some(i),
                None,
                i * 1_000,
            )))
            .await
            .unwrap();
    }

    let removed = store
        .write(MessageMutation::Delete(vec![
            MessageKey::Global(2),
            MessageKey::Global(404),
        ]))
        .await
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].global_id, Some(2));

    let remaining = store
        .query_messages(&MessageQuery::latest(Peer::Thread(7), 10))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn test_reactions_are_attached_to_messages() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = open_store(&temp_file).await;

    store
        .write(MessageMutation::Upsert(create_test_message(Some(1), None, 1_000)))
        .await
        .unwrap();

    let reaction = Reaction {
        user_id: 9,
        emoji: "👍".to_string(),
        date: at(2_000),
    };
    store
        .write(MessageMutation::React {
            key: MessageKey::Global(1),
            reaction: reaction.clone(),
        })
        .await
        .unwrap();
    // Reacting twice with the same emoji keeps one reaction
    let updated = store
        .write(MessageMutation::React {
            key: MessageKey::Global(1),
            reaction: reaction.clone(),
        })
        .await
        .unwrap();
    assert_eq!(updated[0].reactions, vec![reaction]);

    let cleared = store
        .write(MessageMutation::Unreact {
            key: MessageKey::Global(1),
            user_id: 9,
            emoji: "👍".to_string(),
        })
        .await
        .unwrap();
    assert!(cleared[0].reactions.is_empty());
}
