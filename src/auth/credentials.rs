use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

/// Sentinel written into `INTUIT_REFRESH_TOKEN` once the provider reports the
/// grant as permanently invalid. Short-circuits further refresh attempts until
/// a human re-runs the authorization flow.
pub const EXPIRED_SENTINEL: &str = "EXPIRED";

/// Forced-stale timestamp written when a 401 tells us the cached access token
/// is no longer accepted despite looking fresh.
pub const FORCED_STALE_TIMESTAMP: &str = "2020-01-01T00:00:00";

const CLIENT_ID_KEY: &str = "INTUIT_CLIENT_ID";
const CLIENT_SECRET_KEY: &str = "INTUIT_CLIENT_SECRET";
const ACCESS_TOKEN_KEY: &str = "INTUIT_ACCESS_TOKEN";
const REFRESH_TOKEN_KEY: &str = "INTUIT_REFRESH_TOKEN";
const REALM_ID_KEY: &str = "INTUIT_REALM_ID";
const TOKEN_TIMESTAMP_KEY: &str = "TOKEN_TIMESTAMP";

/// One OAuth credential set, parsed from the flat `credentials.config` file.
///
/// Every field is explicitly optional; callers that need a valid session go
/// through [`CredentialSet::validate_session`] instead of discovering missing
/// keys at request time. Keys the subsystem does not own (Notion tokens,
/// database ids) are preserved verbatim so a save never drops them.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub realm_id: Option<String>,
    pub token_timestamp: Option<String>,
    extra: Vec<(String, String)>,
}

impl CredentialSet {
    /// Parse newline-delimited `KEY=VALUE` pairs. Comment lines (`#`) and
    /// lines without `=` are ignored; keys and values are trimmed.
    pub fn parse(contents: &str) -> Self {
        let mut set = CredentialSet::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            set.insert(key.trim(), value.trim());
        }
        set
    }

    fn insert(&mut self, key: &str, value: &str) {
        let value = value.to_string();
        match key {
            CLIENT_ID_KEY => self.client_id = Some(value),
            CLIENT_SECRET_KEY => self.client_secret = Some(value),
            ACCESS_TOKEN_KEY => self.access_token = Some(value),
            REFRESH_TOKEN_KEY => self.refresh_token = Some(value),
            REALM_ID_KEY => self.realm_id = Some(value),
            TOKEN_TIMESTAMP_KEY => self.token_timestamp = Some(value),
            _ => {
                if let Some(entry) = self.extra.iter_mut().find(|(k, _)| k == key) {
                    entry.1 = value;
                } else {
                    self.extra.push((key.to_string(), value));
                }
            }
        }
    }

    /// Render back to the flat-file wire format. Known keys first, then the
    /// preserved unknown keys in their original order.
    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        let known = [
            (CLIENT_ID_KEY, &self.client_id),
            (CLIENT_SECRET_KEY, &self.client_secret),
            (ACCESS_TOKEN_KEY, &self.access_token),
            (REFRESH_TOKEN_KEY, &self.refresh_token),
            (REALM_ID_KEY, &self.realm_id),
            (TOKEN_TIMESTAMP_KEY, &self.token_timestamp),
        ];
        for (key, value) in known {
            if let Some(value) = value {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        for (key, value) in &self.extra {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Lookup by raw key name with a fallback. Never fails.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        let value = match key {
            CLIENT_ID_KEY => self.client_id.as_deref(),
            CLIENT_SECRET_KEY => self.client_secret.as_deref(),
            ACCESS_TOKEN_KEY => self.access_token.as_deref(),
            REFRESH_TOKEN_KEY => self.refresh_token.as_deref(),
            REALM_ID_KEY => self.realm_id.as_deref(),
            TOKEN_TIMESTAMP_KEY => self.token_timestamp.as_deref(),
            _ => self.extra.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()),
        };
        value.unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.insert(key, value);
    }

    /// Keys a valid QuickBooks session requires, with the ones that are
    /// missing or empty.
    pub fn missing_session_keys(&self) -> Vec<&'static str> {
        let required = [
            (CLIENT_ID_KEY, &self.client_id),
            (CLIENT_SECRET_KEY, &self.client_secret),
            (ACCESS_TOKEN_KEY, &self.access_token),
            (REFRESH_TOKEN_KEY, &self.refresh_token),
            (REALM_ID_KEY, &self.realm_id),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.as_deref().map(str::trim).unwrap_or("").is_empty())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn validate_session(&self) -> Result<()> {
        let missing = self.missing_session_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Credentials file is missing required keys: {}", missing.join(", "))
        }
    }

    /// True once the refresh token has been replaced by the sentinel, or was
    /// never present at all.
    pub fn refresh_token_invalidated(&self) -> bool {
        match self.refresh_token.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(token) => token == EXPIRED_SENTINEL,
        }
    }

    pub fn invalidate_refresh_token(&mut self) {
        self.refresh_token = Some(EXPIRED_SENTINEL.to_string());
    }

    /// Rewrite the stored timestamp so the next freshness check sees the
    /// token as stale. In-memory only; nothing is persisted.
    pub fn force_stale(&mut self) {
        self.token_timestamp = Some(FORCED_STALE_TIMESTAMP.to_string());
    }
}

/// Durable home of the active credential set.
///
/// A save is a full overwrite of the previous revision. The write goes to a
/// sibling temp file which is flushed, synced and renamed over the target, so
/// a concurrent reader observes either the old or the new contents, never a
/// torn write. No history is kept.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<CredentialSet> {
        if !self.path.exists() {
            anyhow::bail!("Credentials file not found: {}", self.path.display());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials file: {}", self.path.display()))?;
        let set = CredentialSet::parse(&contents);
        debug!("Loaded credentials from {}", self.path.display());
        Ok(set)
    }

    pub fn save(&self, credentials: &CredentialSet) -> Result<()> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let temp_path = self.path.with_extension("config.tmp");
        {
            let mut file = fs::File::create(&temp_path).with_context(|| {
                format!("Failed to create temp credentials file: {}", temp_path.display())
            })?;
            file.write_all(credentials.to_file_contents().as_bytes())?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("Failed to replace credentials file: {}", self.path.display())
        })?;
        if let Some(dir) = dir {
            // Directory sync so the rename itself is durable.
            if let Ok(dir_handle) = fs::File::open(dir) {
                let _ = dir_handle.sync_all();
            }
        }
        info!("Saved credentials to {}", self.path.display());
        Ok(())
    }
}
