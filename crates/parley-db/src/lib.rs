// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use parley_app::{Chat, ChatId, Message, MessageId, Role, SettingKey, ThemeMode};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

pub const APP_NAME: &str = "parley";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    ("chats", &["id", "title", "created_at"]),
    ("messages", &["id", "chat_id", "role", "content", "created_at"]),
    ("settings", &["key", "value", "updated_at"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[RequiredIndex {
    name: "idx_messages_chat_id",
    create_sql: "CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages (chat_id);",
}];

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the schema on a fresh database, or validate it on an existing
    /// one. Safe to call more than once.
    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }

        ensure_required_indexes(&self.conn)?;
        Ok(())
    }

    pub fn create_chat(&self, title: &str) -> Result<ChatId> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "INSERT INTO chats (title, created_at) VALUES (?, ?)",
                params![title, now],
            )
            .with_context(|| format!("insert chat {title:?}"))?;
        Ok(ChatId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.conn
            .query_row(
                "SELECT id, title, created_at FROM chats WHERE id = ?",
                params![chat_id.get()],
                |row| {
                    let created_at_raw: String = row.get(2)?;
                    Ok(Chat {
                        id: ChatId::new(row.get(0)?),
                        title: row.get(1)?,
                        created_at: parse_datetime(&created_at_raw).map_err(to_sql_error)?,
                    })
                },
            )
            .with_context(|| format!("load chat {}", chat_id.get()))
    }

    /// All chats, most recently created first. Id breaks ties so that rows
    /// created in the same second keep a stable order.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, title, created_at
                FROM chats
                ORDER BY created_at DESC, id DESC
                ",
            )
            .context("prepare chat list query")?;
        let rows = stmt
            .query_map([], |row| {
                let created_at_raw: String = row.get(2)?;
                Ok(Chat {
                    id: ChatId::new(row.get(0)?),
                    title: row.get(1)?,
                    created_at: parse_datetime(&created_at_raw).map_err(to_sql_error)?,
                })
            })
            .context("query chats")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect chats")
    }

    pub fn add_message(&self, chat_id: ChatId, role: Role, content: &str) -> Result<MessageId> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "INSERT INTO messages (chat_id, role, content, created_at) VALUES (?, ?, ?, ?)",
                params![chat_id.get(), role.as_str(), content, now],
            )
            .with_context(|| format!("insert {} message into chat {}", role.as_str(), chat_id.get()))?;
        Ok(MessageId::new(self.conn.last_insert_rowid()))
    }

    /// Messages for one chat in insertion order. An unknown chat id yields an
    /// empty list, not an error.
    pub fn messages_by_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, chat_id, role, content, created_at
                FROM messages
                WHERE chat_id = ?
                ORDER BY id ASC
                ",
            )
            .context("prepare message list query")?;
        let rows = stmt
            .query_map(params![chat_id.get()], |row| {
                let role_raw: String = row.get(2)?;
                let role = Role::parse(&role_raw)
                    .ok_or_else(|| anyhow!("message has unknown role {role_raw:?}"))
                    .map_err(to_sql_error)?;
                let created_at_raw: String = row.get(4)?;
                Ok(Message {
                    id: MessageId::new(row.get(0)?),
                    chat_id: ChatId::new(row.get(1)?),
                    role,
                    content: row.get(3)?,
                    created_at: parse_datetime(&created_at_raw).map_err(to_sql_error)?,
                })
            })
            .with_context(|| format!("query messages for chat {}", chat_id.get()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect messages")
    }

    fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("read setting {key}"))
    }

    fn put_setting_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO settings (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![key, value, now],
            )
            .with_context(|| format!("upsert setting {key}"))?;
        Ok(())
    }

    pub fn get_setting(&self, key: SettingKey) -> Result<Option<String>> {
        self.get_setting_raw(key.as_str())
    }

    pub fn put_setting(&self, key: SettingKey, value: &str) -> Result<()> {
        self.put_setting_raw(key.as_str(), value)
    }

    pub fn get_api_key(&self) -> Result<Option<String>> {
        let raw = self.get_setting(SettingKey::ApiKey)?;
        Ok(raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }))
    }

    pub fn put_api_key(&self, key: &str) -> Result<()> {
        self.put_setting(SettingKey::ApiKey, key)
    }

    /// Stored theme preference. Absent or unrecognized values fall back to
    /// the system default instead of failing.
    pub fn get_theme_mode(&self) -> Result<ThemeMode> {
        let raw = self.get_setting(SettingKey::ThemeMode)?;
        Ok(raw
            .as_deref()
            .and_then(ThemeMode::parse)
            .unwrap_or(ThemeMode::System))
    }

    pub fn put_theme_mode(&self, mode: ThemeMode) -> Result<()> {
        self.put_setting(SettingKey::ThemeMode, mode.as_str())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("PARLEY_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set PARLEY_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("parley.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        if !table_exists(conn, table)? {
            bail!(
                "database is missing required table `{table}`; use a parley-compatible database or migrate first"
            );
        }

        let columns = table_columns(conn, table)?;
        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; run migration before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }

    let existing_indexes = index_names(conn)?;
    let missing = REQUIRED_INDEXES
        .iter()
        .filter(|index| !existing_indexes.contains(index.name))
        .map(|index| index.name)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "database is missing required indexes: {}; run migration before launching",
            missing.join(", ")
        );
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    let names = rows
        .collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))?;
    Ok(names)
}

fn index_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'index'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            ",
        )
        .context("prepare index names query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query index names")?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("collect index names")
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(value);
    }

    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(value.assume_utc());
    }

    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Ok(value.assume_utc());
    }

    bail!("unsupported datetime format {raw:?}")
}

fn to_sql_error(error: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            error.to_string(),
        )),
    )
}
