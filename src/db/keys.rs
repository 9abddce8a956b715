//! Local storage for the API credential

use secrecy::SecretString;

use super::DbPool;
use crate::{Error, Result};

/// Name under which the API key is stored
pub const API_KEY_NAME: &str = "anthropic_api_key";

/// Single-secret credential store backed by the `credentials` table
#[derive(Clone)]
pub struct KeyStore {
    db: DbPool,
}

impl KeyStore {
    /// Create a key store backed by the given pool
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Retrieve the stored API key, or `None` if not configured
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get(&self) -> Result<Option<SecretString>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let result = conn.query_row(
            "SELECT secret FROM credentials WHERE name = ?1",
            rusqlite::params![API_KEY_NAME],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Insert or replace the API key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is blank or the database write fails.
    pub fn set(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(Error::Config("API key must not be empty".to_string()));
        }

        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO credentials (name, secret, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
                secret = excluded.secret,
                updated_at = excluded.updated_at",
            rusqlite::params![API_KEY_NAME, api_key],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!("stored API key");
        Ok(())
    }

    /// Remove the stored API key
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn remove(&self) -> Result<()> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM credentials WHERE name = ?1",
            rusqlite::params![API_KEY_NAME],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
