//! Collaborator-facing server queries.
//!
//! Thin typed HTTP layer for the data the pairing flow and the UI need from
//! the platform: the process-wide server encryption keys (cached, bounded
//! retry with capped exponential backoff) and user identity lookups. Built
//! from an explicit config and an injected `reqwest::Client` - constructed
//! once, reused, never re-initialized mid-session.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::types::{ServerEncryptionKeys, UserIdentity};
use crate::SERVER_KEYS_TTL;

/// Attempts per fetch before giving up.
const FETCH_ATTEMPTS: u32 = 3;
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: reqwest::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub base_url: String,
}

struct CachedKeys {
    keys: ServerEncryptionKeys,
    fetched: Instant,
}

impl CachedKeys {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched.elapsed() < ttl
    }
}

pub struct ServerClient {
    config: ServerConfig,
    http: reqwest::Client,
    keys_cache: Mutex<Option<CachedKeys>>,
}

impl ServerClient {
    pub fn new(config: ServerConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            keys_cache: Mutex::new(None),
        }
    }

    /// Server key material, cached for [`SERVER_KEYS_TTL`]. One fetch per
    /// window regardless of how many callers ask.
    pub async fn server_encryption_keys(&self) -> Result<ServerEncryptionKeys, ServerError> {
        {
            let cache = self.keys_cache.lock().unwrap();
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(SERVER_KEYS_TTL) {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let url = format!("{}/keys/server", self.config.base_url);
        let keys: ServerEncryptionKeys = self.fetch_with_retry(&url, &[]).await?;

        let mut cache = self.keys_cache.lock().unwrap();
        *cache = Some(CachedKeys {
            keys: keys.clone(),
            fetched: Instant::now(),
        });
        Ok(keys)
    }

    /// Identities for the given user ids.
    pub async fn fetch_users(&self, ids: &[String]) -> Result<Vec<UserIdentity>, ServerError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/users", self.config.base_url);
        self.fetch_with_retry(&url, &[("ids", ids.join(","))]).await
    }

    async fn fetch_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServerError> {
        let mut delay = BACKOFF_START;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                self.http
                    .get(url)
                    .query(query)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<T>()
                    .await
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= FETCH_ATTEMPTS => {
                    return Err(ServerError::RetriesExhausted {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    warn!("fetch {url} attempt {attempt} failed: {err}");
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                }
            }
        }
    }

    #[cfg(test)]
    fn prime_cache(&self, keys: ServerEncryptionKeys) {
        let mut cache = self.keys_cache.lock().unwrap();
        *cache = Some(CachedKeys {
            keys,
            fetched: Instant::now(),
        });
    }
}

/// Double the delay, capped at [`BACKOFF_CAP`].
fn next_backoff(delay: Duration) -> Duration {
    (delay * 2).min(BACKOFF_CAP)
}
