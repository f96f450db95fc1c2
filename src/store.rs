use crate::submission::{ContactForm, StoredSubmission, Submission};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unsupported database url scheme: {0}")]
    UnsupportedUrl(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Where submissions are recorded.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Creates the submissions table and its indexes if absent.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Inserts one submission and returns it with its assigned id.
    async fn save(&self, submission: Submission) -> Result<StoredSubmission, StoreError>;
}

const PG_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS contact_forms (
        id SERIAL PRIMARY KEY,
        name VARCHAR NOT NULL,
        email VARCHAR NOT NULL,
        phone VARCHAR NOT NULL,
        title VARCHAR NOT NULL,
        message VARCHAR NOT NULL,
        created_at VARCHAR NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_contact_forms_name ON contact_forms (name)",
    "CREATE INDEX IF NOT EXISTS ix_contact_forms_email ON contact_forms (email)",
];

const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS contact_forms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_contact_forms_name ON contact_forms (name)",
    "CREATE INDEX IF NOT EXISTS ix_contact_forms_email ON contact_forms (email)",
];

#[derive(Debug, sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    name: String,
    email: String,
    phone: String,
    title: String,
    message: String,
    created_at: String,
}

impl From<SubmissionRow> for StoredSubmission {
    fn from(row: SubmissionRow) -> StoredSubmission {
        StoredSubmission {
            id: row.id,
            submission: Submission {
                form: ContactForm {
                    name: row.name,
                    email: row.email,
                    phone: row.phone,
                    title: row.title,
                    message: row.message,
                },
                created_at: row.created_at,
            },
        }
    }
}

/// A pooled SQL store. Postgres in production, SQLite for local runs.
#[derive(Debug, Clone)]
pub enum SqlStore {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl SqlStore {
    /// Opens a pool for a `postgres://` or `sqlite:` url.
    pub async fn connect(url: &str) -> Result<SqlStore, StoreError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new().connect(url).await?;
            Ok(SqlStore::Postgres(pool))
        } else if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
            // An in-memory database lives only as long as its single connection.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;
            Ok(SqlStore::Sqlite(pool))
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(StoreError::UnsupportedUrl(scheme.to_string()))
        }
    }

    /// Every recorded submission in id order.
    pub async fn all(&self) -> Result<Vec<StoredSubmission>, StoreError> {
        let rows: Vec<SubmissionRow> = match self {
            SqlStore::Postgres(pool) => {
                sqlx::query_as(
                    "SELECT id::BIGINT AS id, name, email, phone, title, message, created_at \
                     FROM contact_forms ORDER BY id",
                )
                .fetch_all(pool)
                .await?
            }
            SqlStore::Sqlite(pool) => {
                sqlx::query_as(
                    "SELECT id, name, email, phone, title, message, created_at \
                     FROM contact_forms ORDER BY id",
                )
                .fetch_all(pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(StoredSubmission::from).collect())
    }

    pub async fn close(&self) {
        match self {
            SqlStore::Postgres(pool) => pool.close().await,
            SqlStore::Sqlite(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl SubmissionStore for SqlStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        match self {
            SqlStore::Postgres(pool) => {
                for statement in PG_SCHEMA {
                    sqlx::query(*statement).execute(pool).await?;
                }
            }
            SqlStore::Sqlite(pool) => {
                for statement in SQLITE_SCHEMA {
                    sqlx::query(*statement).execute(pool).await?;
                }
            }
        }
        info!("contact_forms table ready");
        Ok(())
    }

    async fn save(&self, submission: Submission) -> Result<StoredSubmission, StoreError> {
        let form = &submission.form;
        let id = match self {
            SqlStore::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let id: i32 = sqlx::query_scalar(
                    "INSERT INTO contact_forms (name, email, phone, title, message, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                )
                .bind(&form.name)
                .bind(&form.email)
                .bind(&form.phone)
                .bind(&form.title)
                .bind(&form.message)
                .bind(&submission.created_at)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                i64::from(id)
            }
            SqlStore::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO contact_forms (name, email, phone, title, message, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
                )
                .bind(&form.name)
                .bind(&form.email)
                .bind(&form.phone)
                .bind(&form.title)
                .bind(&form.message)
                .bind(&submission.created_at)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                id
            }
        };
        debug!("Stored submission {id}");
        Ok(StoredSubmission { id, submission })
    }
}
