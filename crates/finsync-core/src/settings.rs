//! Per-user credentials
//!
//! A sync run needs the user's aggregator credentials and sheet workspace
//! token. They are fetched once per run through [`SettingsProvider`] and kept
//! in memory only for the duration of that run. Secrets are stored encrypted
//! at rest; [`Cipher`] is the only contract the pipeline relies on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Credentials for the transaction source (open-banking aggregator)
#[derive(Clone, PartialEq, Eq)]
pub struct SourceCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Connected accounts to pull transactions from
    pub account_ids: Vec<String>,
}

/// Credentials for the sheet workspace
#[derive(Clone, PartialEq, Eq)]
pub struct SheetCredentials {
    pub token: String,
    /// Parent page holding the monthly tables
    pub page_id: String,
}

/// Decrypted settings of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub user_id: String,
    pub email: Option<String>,
    pub source: SourceCredentials,
    pub sheet: SheetCredentials,
}

// Secrets never reach logs through Debug
impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("account_ids", &self.account_ids)
            .finish()
    }
}

impl std::fmt::Debug for SheetCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetCredentials")
            .field("token", &"***")
            .field("page_id", &self.page_id)
            .finish()
    }
}

/// Source of decrypted per-user settings
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Settings of one user; `NotFound` for an unknown user
    async fn get_settings(&self, user_id: &str) -> Result<UserSettings>;

    /// Settings of every user
    async fn list_settings(&self) -> Result<Vec<UserSettings>>;
}

/// Symmetric encryption of stored secrets
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Identity cipher for secrets stored in plain text (local files, tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl Cipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

/// Users file layout
#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    email: Option<String>,
    source: RawSource,
    sheet: RawSheet,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    account_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSheet {
    token: String,
    page_id: String,
}

/// Settings provider backed by a TOML users file.
///
/// ```toml
/// [[users]]
/// id = "alice"
/// email = "alice@example.com"
///
/// [users.source]
/// client_id = "..."
/// client_secret = "..."
/// account_ids = ["..."]
///
/// [users.sheet]
/// token = "..."
/// page_id = "..."
/// ```
///
/// The file is read on every call so edits apply to the next run. Secrets go
/// through the cipher on the way out.
pub struct FileSettingsProvider<C: Cipher = PlaintextCipher> {
    path: PathBuf,
    cipher: C,
}

impl FileSettingsProvider<PlaintextCipher> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_cipher(path, PlaintextCipher)
    }
}

impl<C: Cipher> FileSettingsProvider<C> {
    pub fn with_cipher(path: impl Into<PathBuf>, cipher: C) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<UserSettings>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read users file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let file: UsersFile = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Invalid users file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), users = file.users.len(), "Loaded users file");

        file.users
            .into_iter()
            .map(|raw| self.decrypt_user(raw))
            .collect()
    }

    fn decrypt_user(&self, raw: RawUser) -> Result<UserSettings> {
        let context = format!("user {}", raw.id);
        Ok(UserSettings {
            source: SourceCredentials {
                client_id: raw.source.client_id,
                client_secret: self
                    .cipher
                    .decrypt(&raw.source.client_secret)
                    .map_err(|e| e.context(&context))?,
                account_ids: raw.source.account_ids,
            },
            sheet: SheetCredentials {
                token: self
                    .cipher
                    .decrypt(&raw.sheet.token)
                    .map_err(|e| e.context(&context))?,
                page_id: raw.sheet.page_id,
            },
            user_id: raw.id,
            email: raw.email,
        })
    }
}

#[async_trait]
impl<C: Cipher> SettingsProvider for FileSettingsProvider<C> {
    async fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        self.load()
            .await?
            .into_iter()
            .find(|u| u.user_id == user_id)
            .ok_or_else(|| Error::not_found(format!("user {}", user_id)))
    }

    async fn list_settings(&self) -> Result<Vec<UserSettings>> {
        self.load().await
    }
}
