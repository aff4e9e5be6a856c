use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::config::AppliedConfiguration;
use super::data::{FormAction, ImageRecord, TransformationRecord};
use super::edit::EditType;
use crate::error::PersistError;
use crate::session::collab::{BoxFuture, Persistence};

/// SQLite store for saved transformations.
///
/// Every operation opens its own connection: `rusqlite::Connection` is not
/// `Sync`, and saves run on Tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

const SELECT_COLUMNS: &str = "id, title, transformation_type, public_id, secure_url, width, height,
     aspect_ratio, color, prompt, config_json, author_id, created_at, updated_at";

impl SqliteStore {
    /// Open (or create) the store at `db_path` and initialize the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PersistError::Task(format!("cannot create {}: {e}", parent.display())))?;
            }
        }

        let store = SqliteStore { db_path };
        let conn = store.connect()?;
        init_schema(&conn)?;

        info!(path = %store.db_path.display(), "transformation store ready");
        Ok(store)
    }

    /// Open the store in the user's data directory:
    /// - Linux: ~/.local/share/transform-session/transformations.db
    /// - macOS: ~/Library/Application Support/transform-session/transformations.db
    /// - Windows: %APPDATA%\transform-session\transformations.db
    pub fn open_default() -> Result<Self, PersistError> {
        let path = Self::default_db_path()
            .ok_or_else(|| PersistError::Task("could not determine user data directory".into()))?;
        Self::open(path)
    }

    pub fn default_db_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("transform-session");
        path.push("transformations.db");
        Some(path)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> SqlResult<Connection> {
        Connection::open(&self.db_path)
    }

    /// Insert or update a record, returning its id
    pub fn save_blocking(&self, record: &TransformationRecord, action: FormAction) -> Result<i64, PersistError> {
        let conn = self.connect()?;
        let config_json = record.config.to_json()?;
        let now = Utc::now().timestamp();

        match action {
            FormAction::Add => {
                conn.execute(
                    "INSERT INTO transformations (
                        title, transformation_type, public_id, secure_url, width, height,
                        aspect_ratio, color, prompt, config_json, author_id, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                    params![
                        record.title,
                        record.edit_type.as_str(),
                        record.public_id,
                        record.secure_url,
                        record.width,
                        record.height,
                        record.aspect_ratio,
                        record.color,
                        record.prompt,
                        config_json,
                        record.author_id,
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                debug!(id, "transformation inserted");
                Ok(id)
            }
            FormAction::Update => {
                let id = record.id.ok_or(PersistError::MissingRecordId)?;
                let changed = conn.execute(
                    "UPDATE transformations SET
                        title = ?1, transformation_type = ?2, public_id = ?3, secure_url = ?4,
                        width = ?5, height = ?6, aspect_ratio = ?7, color = ?8, prompt = ?9,
                        config_json = ?10, updated_at = ?11
                     WHERE id = ?12 AND author_id = ?13",
                    params![
                        record.title,
                        record.edit_type.as_str(),
                        record.public_id,
                        record.secure_url,
                        record.width,
                        record.height,
                        record.aspect_ratio,
                        record.color,
                        record.prompt,
                        config_json,
                        now,
                        id,
                        record.author_id,
                    ],
                )?;
                if changed == 0 {
                    return Err(PersistError::NotFound(id));
                }
                debug!(id, "transformation updated");
                Ok(id)
            }
        }
    }

    /// Load one record by id
    pub fn get(&self, id: i64) -> Result<ImageRecord, PersistError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM transformations WHERE id = ?1"),
            [id],
            row_to_record,
        )
        .optional()?
        .ok_or(PersistError::NotFound(id))
    }

    /// All records of one author, newest first
    pub fn records_by_author(&self, author_id: &str) -> Result<Vec<ImageRecord>, PersistError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM transformations WHERE author_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;

        let records = stmt
            .query_map([author_id], row_to_record)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    /// Get a count of stored transformations
    pub fn count(&self) -> Result<i64, PersistError> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM transformations", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl Persistence for SqliteStore {
    fn save(&self, record: TransformationRecord, action: FormAction) -> BoxFuture<Result<i64, PersistError>> {
        let store = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || store.save_blocking(&record, action))
                .await
                .map_err(|e| PersistError::Task(e.to_string()))?
        })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Creates tables and indexes if they don't exist.
fn init_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transformations (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            title               TEXT NOT NULL,
            transformation_type TEXT NOT NULL,
            public_id           TEXT NOT NULL,
            secure_url          TEXT,
            width               INTEGER,
            height              INTEGER,
            aspect_ratio        TEXT,
            color               TEXT,
            prompt              TEXT,
            config_json         TEXT NOT NULL,
            author_id           TEXT NOT NULL,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transformations_author
         ON transformations(author_id, created_at DESC)",
        [],
    )?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> SqlResult<ImageRecord> {
    let type_key: String = row.get(2)?;
    let edit_type = EditType::from_key(&type_key).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown transformation type `{type_key}`").into(),
        )
    })?;

    let config_json: String = row.get(10)?;
    let config = AppliedConfiguration::from_json(&config_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(ImageRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        edit_type,
        public_id: row.get(3)?,
        secure_url: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        aspect_ratio: row.get(7)?,
        color: row.get(8)?,
        prompt: row.get(9)?,
        config: Some(config),
        author_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}
