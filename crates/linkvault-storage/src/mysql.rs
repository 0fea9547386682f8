use async_trait::async_trait;
use jiff::Timestamp;
use linkvault_core::error::{Result, StorageError};
use linkvault_core::repository::{
    Attachment, CreateOutcome, LinkStore, OwnerId, Resolution, StoreStats, UrlRecord,
};
use linkvault_core::{DeletionTask, Fingerprint, ShortCode};
use sqlx::{MySqlPool, Row};
use tracing::{debug, trace};

const SHORT_URLS_DDL: &str = include_str!("../ddl/mysql/short_urls.sql");
const URL_OWNERS_DDL: &str = include_str!("../ddl/mysql/url_owners.sql");

/// MySQL implementation of the link store contract.
///
/// Target uniqueness is enforced by a unique key on the SHA-256 digest of the
/// target, ownership uniqueness by the `(owner_id, url_id)` primary key.
/// Unique violations during creation are the signal to re-read and attach
/// to the winning row. Soft delete is implemented with `deleted_at`.
#[derive(Debug, Clone)]
pub struct MySqlLinkStore {
    pool: MySqlPool,
}

struct StoredUrl {
    id: u64,
    code: ShortCode,
}

impl MySqlLinkStore {
    /// Creates a store from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a store by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for ddl in [SHORT_URLS_DDL, URL_OWNERS_DDL] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        debug!("link store schema is up to date");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn find_by_digest(&self, fingerprint: &Fingerprint) -> Result<Option<StoredUrl>> {
        let row = sqlx::query(
            r#"
            SELECT id, short_code
            FROM short_urls
            WHERE target_digest = ?
            LIMIT 1
            "#,
        )
        .bind(&fingerprint.as_bytes()[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: u64 = row.try_get("id").map_err(map_sqlx_error)?;
        let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
        Ok(Some(StoredUrl {
            id,
            code: ShortCode::new_unchecked(code),
        }))
    }

    async fn target_of(&self, code: &ShortCode) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT target_url
            FROM short_urls
            WHERE short_code = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| row.try_get("target_url").map_err(map_sqlx_error))
            .transpose()
    }

    /// Inserts the record for `target` and the creator's reference in one
    /// transaction.
    ///
    /// A concurrent insert of the same target blocks on the unique key until
    /// this transaction commits, so nobody can attach ahead of the creator.
    /// Returns `None` when the insert hit a unique key.
    async fn create_record(
        &self,
        owner: &OwnerId,
        code: &ShortCode,
        target: &str,
    ) -> Result<Option<StoredUrl>> {
        let fingerprint = Fingerprint::of(target);
        let now = now_unix_seconds();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO short_urls (short_code, target_url, target_digest, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(code.as_str())
        .bind(target)
        .bind(&fingerprint.as_bytes()[..])
        .bind(now)
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(done) => done.last_insert_id(),
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Ok(None);
            }
            Err(err) => return Err(map_sqlx_error(err)),
        };

        sqlx::query(
            r#"
            INSERT INTO url_owners (owner_id, url_id, created_at, deleted_at)
            VALUES (?, ?, ?, NULL)
            "#,
        )
        .bind(owner.as_str())
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(StoredUrl {
            id,
            code: code.clone(),
        }))
    }

    /// Looks up the stored record for `target` after a unique violation.
    async fn existing_record(&self, code: &ShortCode, target: &str) -> Result<StoredUrl> {
        if let Some(existing) = self.find_by_digest(&Fingerprint::of(target)).await? {
            trace!(code = %existing.code, "target already stored");
            return Ok(existing);
        }

        // The digest is free, so the short code key is what collided.
        let stored = self.target_of(code).await?.unwrap_or_default();
        Err(StorageError::HashCollision {
            code: code.to_string(),
            stored,
            requested: target.to_owned(),
        })
    }

    /// Gives `owner` a live reference to an existing record.
    async fn attach(&self, owner: &OwnerId, record: &StoredUrl) -> Result<CreateOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO url_owners (owner_id, url_id, created_at, deleted_at)
            VALUES (?, ?, ?, NULL)
            "#,
        )
        .bind(owner.as_str())
        .bind(record.id)
        .bind(now_unix_seconds())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(CreateOutcome::Attached),
            Err(err) if is_unique_violation(&err) => {
                let revived = sqlx::query(
                    r#"
                    UPDATE url_owners
                    SET deleted_at = NULL
                    WHERE owner_id = ?
                      AND url_id = ?
                      AND deleted_at IS NOT NULL
                    "#,
                )
                .bind(owner.as_str())
                .bind(record.id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

                if revived.rows_affected() > 0 {
                    Ok(CreateOutcome::Resurrected)
                } else {
                    Ok(CreateOutcome::AlreadyOwned)
                }
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }
}

fn now_unix_seconds() -> i64 {
    Timestamp::now().as_second()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl LinkStore for MySqlLinkStore {
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution> {
        let row = sqlx::query(
            r#"
            SELECT s.target_url,
                   COUNT(o.owner_id) AS total_refs,
                   CAST(COALESCE(SUM(o.deleted_at IS NULL), 0) AS SIGNED) AS live_refs
            FROM short_urls s
            LEFT JOIN url_owners o ON o.url_id = s.id
            WHERE s.short_code = ?
            GROUP BY s.id
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(Resolution::NotFound);
        };

        let target_url: String = row.try_get("target_url").map_err(map_sqlx_error)?;
        let total_refs: i64 = row.try_get("total_refs").map_err(map_sqlx_error)?;
        let live_refs: i64 = row.try_get("live_refs").map_err(map_sqlx_error)?;

        if total_refs > 0 && live_refs == 0 {
            return Ok(Resolution::Gone);
        }
        Ok(Resolution::Found(target_url))
    }

    async fn create_or_attach(
        &self,
        owner: &OwnerId,
        code: &ShortCode,
        target: &str,
    ) -> Result<Attachment> {
        let (record, outcome) = match self.create_record(owner, code, target).await? {
            Some(record) => (record, CreateOutcome::Created),
            None => {
                let record = self.existing_record(code, target).await?;
                let outcome = self.attach(owner, &record).await?;
                (record, outcome)
            }
        };

        trace!(owner = %owner, code = %record.code, ?outcome, "attached owner to record");
        Ok(Attachment {
            code: record.code,
            outcome,
        })
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT s.short_code, s.target_url
            FROM url_owners o
            JOIN short_urls s ON s.id = o.url_id
            WHERE o.owner_id = ?
              AND o.deleted_at IS NULL
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
                let target_url: String = row.try_get("target_url").map_err(map_sqlx_error)?;
                Ok(UrlRecord {
                    code: ShortCode::new_unchecked(code),
                    target_url,
                })
            })
            .collect()
    }

    async fn bulk_soft_delete(&self, tasks: &[DeletionTask]) -> Result<u64> {
        let now = now_unix_seconds();
        let mut flipped = 0;

        // Each task commits on its own; a failure keeps earlier flips.
        for task in tasks {
            let result = sqlx::query(
                r#"
                UPDATE url_owners o
                JOIN short_urls s ON s.id = o.url_id
                SET o.deleted_at = ?
                WHERE o.owner_id = ?
                  AND s.short_code = ?
                  AND o.deleted_at IS NULL
                "#,
            )
            .bind(now)
            .bind(task.owner.as_str())
            .bind(task.code.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            flipped += result.rows_affected();
        }

        trace!(tasks = tasks.len(), flipped, "applied soft deletes");
        Ok(flipped)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM short_urls) AS urls,
                   (SELECT COUNT(DISTINCT owner_id) FROM url_owners) AS owners
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let owners: i64 = row.try_get("owners").map_err(map_sqlx_error)?;

        Ok(StoreStats {
            urls: u64::try_from(urls).unwrap_or_default(),
            owners: u64::try_from(owners).unwrap_or_default(),
        })
    }
}
