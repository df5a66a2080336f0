use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use zeroize::Zeroizing;

use crate::{
    crypto::aes::{NONCE_SIZE, SealedSecret, SecretCipher},
    error::{AppError, Result},
    models::{
        attendance::{AcademicRecord, BiometricSummary, FetchResult},
        credentials::Credentials,
    },
};

/// The last good result for one identifier and the credentials that produced it.
#[derive(Debug, Clone)]
pub struct StoredAttendance {
    pub credentials: Credentials,
    pub result: FetchResult,
}

impl StoredAttendance {
    /// Fresh means younger than `ttl` and produced by the same credentials the caller presents.
    pub fn is_fresh(&self, presented: &Credentials, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.result.fetched_at);
        let young = age
            .to_std()
            .map(|age| age < ttl)
            // fetched_at in the future: clock skew, still counts as young
            .unwrap_or(true);
        young && self.credentials.matches(presented)
    }
}

/// Credentials known for an identifier, for server-side batch refreshes.
#[derive(Clone)]
pub struct StoredCredentials {
    pub identifier: String,
    /// `None` when no usable secret is on record.
    pub secret: Option<Zeroizing<String>>,
}

impl StoredCredentials {
    pub fn credentials(&self) -> Option<Credentials> {
        self.secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Credentials::new(self.identifier.clone(), secret.as_str()))
    }
}

/// Persistence for last-known-good fetch results.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// The stored result for an identifier, if there is a complete one.
    async fn get(&self, identifier: &str) -> Result<Option<StoredAttendance>>;

    /// Atomically replaces the stored result and credentials for the identifier.
    async fn put(&self, credentials: &Credentials, result: &FetchResult) -> Result<()>;

    /// Credentials for the given identifiers, or for every stored identifier when `None`.
    async fn list_credentials(&self, identifiers: Option<&[String]>) -> Result<Vec<StoredCredentials>>;
}

/// Creates the backing table if it does not exist yet.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS student_credentials (
                username TEXT PRIMARY KEY,
                password_ciphertext BYTEA,
                password_nonce BYTEA,
                academic_data TEXT,
                biometric_data TEXT,
                fetched_at TIMESTAMPTZ
            )
            "#,
        )
        .await?;
    Ok(())
}

/// PostgreSQL-backed store. Secrets are sealed with the master key before they are written.
pub struct PgAttendanceStore {
    pool: Pool,
    cipher: SecretCipher,
}

impl PgAttendanceStore {
    pub fn new(pool: Pool, cipher: SecretCipher) -> Self {
        Self { pool, cipher }
    }

    fn open_secret(&self, row: &Row) -> Option<Zeroizing<String>> {
        let username: String = row.try_get("username").ok()?;
        let ciphertext: Option<Vec<u8>> = row.try_get("password_ciphertext").ok()?;
        let nonce: Option<Vec<u8>> = row.try_get("password_nonce").ok()?;

        let sealed = SealedSecret {
            ciphertext: ciphertext?,
            nonce: <[u8; NONCE_SIZE]>::try_from(nonce?.as_slice()).ok()?,
        };
        match self.cipher.open(&sealed) {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::warn!(identifier = %username, "Stored secret unusable: {}", e);
                None
            }
        }
    }
}

/// Maps a row to a fetch result; `None` if no result has been stored yet.
fn row_to_result(row: &Row) -> Result<Option<FetchResult>> {
    let identifier: String = row
        .try_get("username")
        .map_err(|_| AppError::MissingData("username".to_string()))?;
    let academic_data: Option<String> = row
        .try_get("academic_data")
        .map_err(|_| AppError::MissingData("academic_data".to_string()))?;
    let biometric_data: Option<String> = row
        .try_get("biometric_data")
        .map_err(|_| AppError::MissingData("biometric_data".to_string()))?;
    let fetched_at: Option<DateTime<Utc>> = row
        .try_get("fetched_at")
        .map_err(|_| AppError::MissingData("fetched_at".to_string()))?;

    let (Some(academic_data), Some(biometric_data), Some(fetched_at)) =
        (academic_data, biometric_data, fetched_at)
    else {
        return Ok(None);
    };

    let academic: Vec<AcademicRecord> = sonic_rs::from_str(&academic_data)
        .map_err(|e| AppError::Serialization(format!("academic_data: {}", e)))?;
    let biometric: BiometricSummary = sonic_rs::from_str(&biometric_data)
        .map_err(|e| AppError::Serialization(format!("biometric_data: {}", e)))?;

    Ok(Some(FetchResult {
        identifier,
        academic,
        biometric,
        fetched_at,
    }))
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
    async fn get(&self, identifier: &str) -> Result<Option<StoredAttendance>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT username, password_ciphertext, password_nonce,
                       academic_data, biometric_data, fetched_at
                FROM student_credentials
                WHERE username = $1
                "#,
                &[&identifier],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(result) = row_to_result(&row)? else {
            return Ok(None);
        };
        let Some(secret) = self.open_secret(&row) else {
            return Ok(None);
        };

        Ok(Some(StoredAttendance {
            credentials: Credentials::new(identifier, secret.as_str()),
            result,
        }))
    }

    async fn put(&self, credentials: &Credentials, result: &FetchResult) -> Result<()> {
        let sealed = self.cipher.seal(credentials.secret())?;
        let academic_data = sonic_rs::to_string(&result.academic)
            .map_err(|e| AppError::Serialization(format!("academic_data: {}", e)))?;
        let biometric_data = sonic_rs::to_string(&result.biometric)
            .map_err(|e| AppError::Serialization(format!("biometric_data: {}", e)))?;
        let nonce = sealed.nonce.to_vec();

        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO student_credentials
                    (username, password_ciphertext, password_nonce,
                     academic_data, biometric_data, fetched_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (username) DO UPDATE SET
                    password_ciphertext = EXCLUDED.password_ciphertext,
                    password_nonce = EXCLUDED.password_nonce,
                    academic_data = EXCLUDED.academic_data,
                    biometric_data = EXCLUDED.biometric_data,
                    fetched_at = EXCLUDED.fetched_at
                "#,
                &[
                    &credentials.identifier(),
                    &sealed.ciphertext,
                    &nonce,
                    &academic_data,
                    &biometric_data,
                    &result.fetched_at,
                ],
            )
            .await?;

        tracing::debug!(identifier = credentials.identifier(), "Stored fetch result");
        Ok(())
    }

    async fn list_credentials(&self, identifiers: Option<&[String]>) -> Result<Vec<StoredCredentials>> {
        let client = self.pool.get().await?;
        let rows = match identifiers {
            Some(identifiers) => {
                client
                    .query(
                        r#"
                        SELECT username, password_ciphertext, password_nonce
                        FROM student_credentials
                        WHERE username = ANY($1)
                        ORDER BY username
                        "#,
                        &[&identifiers],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        r#"
                        SELECT username, password_ciphertext, password_nonce
                        FROM student_credentials
                        ORDER BY username
                        "#,
                        &[],
                    )
                    .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(StoredCredentials {
                    identifier: row
                        .try_get("username")
                        .map_err(|_| AppError::MissingData("username".to_string()))?,
                    secret: self.open_secret(row),
                })
            })
            .collect()
    }
}

/// In-memory store, used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryAttendanceStore {
    records: tokio::sync::RwLock<std::collections::HashMap<String, MemoryRecord>>,
}

#[cfg(test)]
struct MemoryRecord {
    secret: Option<Zeroizing<String>>,
    result: Option<FetchResult>,
}

#[cfg(test)]
impl MemoryAttendanceStore {
    /// Registers an identifier with a secret but no result, like a user added out of band.
    pub async fn insert_credentials(&self, identifier: &str, secret: Option<&str>) {
        self.records.write().await.insert(
            identifier.to_string(),
            MemoryRecord {
                secret: secret.map(|s| Zeroizing::new(s.to_string())),
                result: None,
            },
        );
    }
}

#[cfg(test)]
#[async_trait]
impl AttendanceStore for MemoryAttendanceStore {
    async fn get(&self, identifier: &str) -> Result<Option<StoredAttendance>> {
        let records = self.records.read().await;
        Ok(records.get(identifier).and_then(|record| {
            Some(StoredAttendance {
                credentials: Credentials::new(identifier, record.secret.as_ref()?.as_str()),
                result: record.result.clone()?,
            })
        }))
    }

    async fn put(&self, credentials: &Credentials, result: &FetchResult) -> Result<()> {
        self.records.write().await.insert(
            credentials.identifier().to_string(),
            MemoryRecord {
                secret: Some(Zeroizing::new(credentials.secret().to_string())),
                result: Some(result.clone()),
            },
        );
        Ok(())
    }

    async fn list_credentials(&self, identifiers: Option<&[String]>) -> Result<Vec<StoredCredentials>> {
        let records = self.records.read().await;
        let mut found: Vec<StoredCredentials> = records
            .iter()
            .filter(|(id, _)| identifiers.is_none_or(|wanted| wanted.contains(id)))
            .map(|(id, record)| StoredCredentials {
                identifier: id.clone(),
                secret: record.secret.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(found)
    }
}
