// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use parley_app::{Role, SettingKey};
use parley_db::Store;

#[test]
fn messages_keep_insertion_order_per_chat_under_interleaving() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let first = store.create_chat("First")?;
    let second = store.create_chat("Second")?;

    store.add_message(first, Role::User, "f1")?;
    store.add_message(second, Role::User, "s1")?;
    store.add_message(first, Role::Assistant, "f2")?;
    store.add_message(second, Role::Assistant, "s2")?;
    store.add_message(first, Role::User, "f3")?;

    let first_messages = store.messages_by_chat(first)?;
    let contents: Vec<&str> = first_messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["f1", "f2", "f3"]);
    assert!(first_messages.windows(2).all(|pair| pair[0].id < pair[1].id));

    let second_messages = store.messages_by_chat(second)?;
    let contents: Vec<&str> = second_messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["s1", "s2"]);
    Ok(())
}

#[test]
fn settings_upsert_replaces_value() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    store.put_setting(SettingKey::ApiKey, "v1")?;
    store.put_setting(SettingKey::ApiKey, "v2")?;

    assert_eq!(store.get_setting(SettingKey::ApiKey)?, Some("v2".to_owned()));

    let rows: i64 = store.raw_connection().query_row(
        "SELECT COUNT(*) FROM settings WHERE key = ?",
        [SettingKey::ApiKey.as_str()],
        |row| row.get(0),
    )?;
    assert_eq!(rows, 1, "upsert must not duplicate the key");
    Ok(())
}

#[test]
fn absent_setting_reads_as_none() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    assert_eq!(store.get_setting(SettingKey::ThemeMode)?, None);
    Ok(())
}

#[test]
fn list_chats_is_most_recent_first_with_id_tiebreaker() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let older = store.create_chat("Older")?;
    let newer = store.create_chat("Newer")?;

    // Pin both rows to the same timestamp so only the id tiebreaker decides.
    store.raw_connection().execute(
        "UPDATE chats SET created_at = ? WHERE id IN (?, ?)",
        rusqlite::params!["2026-03-01T09:00:00Z", older.get(), newer.get()],
    )?;

    let chats = store.list_chats()?;
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, newer);
    assert_eq!(chats[1].id, older);
    Ok(())
}

#[test]
fn unknown_chat_yields_empty_message_list() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let messages = store.messages_by_chat(parley_app::ChatId::new(42))?;
    assert!(messages.is_empty());
    Ok(())
}

#[test]
fn data_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("parley.db");

    {
        let store = Store::open(&path)?;
        store.bootstrap()?;
        let chat_id = store.create_chat("Durable")?;
        store.add_message(chat_id, Role::User, "still here?")?;
        store.put_setting(SettingKey::ApiKey, "sk-or-reopen")?;
    }

    let store = Store::open(&path)?;
    store.bootstrap()?;

    let chats = store.list_chats()?;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].title, "Durable");
    assert_eq!(store.get_chat(chats[0].id)?, chats[0]);

    let messages = store.messages_by_chat(chats[0].id)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "still here?");
    assert_eq!(messages[0].role, Role::User);

    assert_eq!(
        store.get_setting(SettingKey::ApiKey)?,
        Some("sk-or-reopen".to_owned())
    );
    Ok(())
}
