//! Content-addressed cache for model calls.
//!
//! Every paid request is memoized on disk, keyed by a digest of the exact
//! message sequence, so re-runs in the same working directory are free and
//! deterministic. Entries are never invalidated — staleness is an accepted
//! trade, a broken cache store is not: I/O failures propagate.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::debug;

use bidforge_shared::{BidforgeError, Message, Result};

use crate::client::{ChatOptions, ModelClient, Transport};

// ---------------------------------------------------------------------------
// Call kinds
// ---------------------------------------------------------------------------

/// Key namespace tag. JSON-call and rewrite-call entries must never alias:
/// a raw-text entry handed to a caller expecting pre-validated JSON would
/// fail far from the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Response was validated as JSON before caching.
    Json,
    /// Raw text cached verbatim.
    Rewrite,
}

impl CallKind {
    fn as_tag(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Rewrite => "rewrite",
        }
    }
}

// ---------------------------------------------------------------------------
// PromptCache
// ---------------------------------------------------------------------------

/// Disk-based cache, one `<digest>.json` file per entry.
pub struct PromptCache {
    dir: PathBuf,
}

impl PromptCache {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| BidforgeError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Deterministic digest over the call kind and the ordered message
    /// sequence. Each message is serialized as canonical JSON with sorted
    /// keys, so field order never perturbs the key.
    pub fn key(kind: CallKind, messages: &[Message]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_tag().as_bytes());
        for msg in messages {
            // serde_json's default map is ordered by key, which makes
            // Value-then-to_string canonical.
            let canonical = serde_json::to_value(msg)
                .expect("message serialization is infallible")
                .to_string();
            hasher.update(canonical.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, kind: CallKind, messages: &[Message]) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(kind, messages)))
    }

    /// Look up a cached response. `Ok(None)` means absent; read failures on
    /// an existing entry propagate.
    pub fn get(&self, kind: CallKind, messages: &[Message]) -> Result<Option<String>> {
        let path = self.entry_path(kind, messages);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| BidforgeError::io(&path, e))?;
        debug!(path = %path.display(), "cache hit");
        Ok(Some(text))
    }

    /// Store a response.
    pub fn set(&self, kind: CallKind, messages: &[Message], value: &str) -> Result<()> {
        let path = self.entry_path(kind, messages);
        std::fs::write(&path, value).map_err(|e| BidforgeError::io(&path, e))
    }
}

// ---------------------------------------------------------------------------
// Cached call helpers
// ---------------------------------------------------------------------------

/// Call the model expecting a JSON response, through the cache.
///
/// Cache hit: the stored text was validated before caching, parse and return
/// it directly. Miss: call the model; if the output does not parse, issue
/// exactly one repair request carrying the bad text, then a final fallible
/// parse. Only successfully parsed results are written to the cache.
pub async fn llm_json<T: Transport>(
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    system: &str,
    user: &str,
) -> Result<serde_json::Value> {
    let messages = [Message::system(system), Message::user(user)];

    if let Some(cached) = cache.get(CallKind::Json, &messages)? {
        return serde_json::from_str(&cached).map_err(|e| BidforgeError::InvalidJson {
            message: format!("corrupt cache entry: {e}"),
            raw: cached,
        });
    }

    let text = client.chat(&messages, ChatOptions::default()).await?;
    let value = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => value,
        Err(_) => {
            debug!("model output was not JSON, issuing one repair call");
            let repair = [
                Message::system(system),
                Message::user(format!(
                    "The previous response was not valid JSON: {text}. \
                     Please return valid JSON only."
                )),
            ];
            let repaired = client.chat(&repair, ChatOptions::default()).await?;
            serde_json::from_str::<serde_json::Value>(&repaired).map_err(|e| {
                BidforgeError::InvalidJson {
                    message: e.to_string(),
                    raw: repaired,
                }
            })?
        }
    };

    cache.set(CallKind::Json, &messages, &value.to_string())?;
    Ok(value)
}

/// Call the model for free-form generation or rewriting, through the cache.
/// The raw text is cached verbatim — no JSON assumption.
pub async fn llm_rewrite<T: Transport>(
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    system: &str,
    user: &str,
) -> Result<String> {
    let messages = [Message::system(system), Message::user(user)];

    if let Some(cached) = cache.get(CallKind::Rewrite, &messages)? {
        return Ok(cached);
    }

    let text = client.chat(&messages, ChatOptions::default()).await?;
    cache.set(CallKind::Rewrite, &messages, &text)?;
    Ok(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
