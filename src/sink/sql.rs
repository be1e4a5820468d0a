//! SQLite sink: upsert keyed on `detail_url`.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{RecordSink, SinkError, SinkOutcome};
use crate::models::{FieldKey, ProfileRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    detail_url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    thumbnail_url TEXT,
    one_line_comment TEXT,
    age TEXT NOT NULL,
    height TEXT NOT NULL,
    cup TEXT NOT NULL,
    face_public TEXT NOT NULL,
    toy TEXT NOT NULL,
    time_slot TEXT NOT NULL,
    style TEXT NOT NULL,
    job TEXT NOT NULL,
    hobby TEXT NOT NULL,
    favorite_type TEXT NOT NULL,
    erogenous_zone TEXT NOT NULL,
    genre TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);
"#;

const UPSERT: &str = r#"
INSERT INTO profiles (
    detail_url, name, thumbnail_url, one_line_comment,
    age, height, cup, face_public, toy, time_slot, style,
    job, hobby, favorite_type, erogenous_zone, genre
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
ON CONFLICT(detail_url) DO UPDATE SET
    name = excluded.name,
    thumbnail_url = excluded.thumbnail_url,
    one_line_comment = excluded.one_line_comment,
    age = excluded.age,
    height = excluded.height,
    cup = excluded.cup,
    face_public = excluded.face_public,
    toy = excluded.toy,
    time_slot = excluded.time_slot,
    style = excluded.style,
    job = excluded.job,
    hobby = excluded.hobby,
    favorite_type = excluded.favorite_type,
    erogenous_zone = excluded.erogenous_zone,
    genre = excluded.genre,
    updated_at = datetime('now')
"#;

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn upsert(&self, record: &ProfileRecord) -> Result<(), SinkError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SinkError::Poisoned("sqlite connection"))?;
        let f = |key: FieldKey| record.field(key).to_string();
        conn.execute(
            UPSERT,
            params![
                record.detail_url,
                record.name,
                record.thumbnail_url,
                record.one_line_comment,
                f(FieldKey::Age),
                f(FieldKey::Height),
                f(FieldKey::Cup),
                f(FieldKey::FacePublic),
                f(FieldKey::Toy),
                f(FieldKey::TimeSlot),
                f(FieldKey::Style),
                f(FieldKey::Job),
                f(FieldKey::Hobby),
                f(FieldKey::FavoriteType),
                f(FieldKey::ErogenousZone),
                f(FieldKey::Genre),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn submit(&self, record: &ProfileRecord) -> Result<SinkOutcome, SinkError> {
        self.upsert(record)?;
        Ok(SinkOutcome::Stored)
    }
}
