//! Core domain types for the bid-response pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// Role label on a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in the ordered message sequence sent to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RequirementItem
// ---------------------------------------------------------------------------

/// A single canonical requirement, produced once per parse of a requirement
/// source and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementItem {
    /// Unique within a parsed collection; stable across re-parses.
    pub id: String,
    /// Short human-readable label.
    pub title: String,
    /// Ordered keywords, used for fallback non-semantic scoring.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Provenance (originating line/section of the source list).
    #[serde(default)]
    pub source: String,
    /// Free-text annotation.
    #[serde(default)]
    pub notes: String,
    /// Importance factor.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// EvidenceCandidate
// ---------------------------------------------------------------------------

/// A knowledge-base file scored against one requirement.
///
/// `score` is in `[0, 1]` when produced by the model path, or a non-negative
/// keyword-hit count when produced by the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub path: PathBuf,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// MergedSection
// ---------------------------------------------------------------------------

/// One merged Markdown section per requirement. Emitted even when no evidence
/// was found (the body is then a fixed placeholder sentence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSection {
    /// Back-reference to [`RequirementItem::id`].
    pub requirement_id: String,
    /// Markdown body (without the section heading).
    pub body: String,
    /// Paths of the evidence files actually used; empty means "no evidence
    /// found".
    pub selected_sources: Vec<String>,
}

// ---------------------------------------------------------------------------
// Build metadata (meta.json)
// ---------------------------------------------------------------------------

/// Per-requirement ranking record persisted in `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionMeta {
    pub id: String,
    pub title: String,
    /// Every candidate considered, in ranked order.
    pub candidates: Vec<CandidateMeta>,
    /// Paths actually merged into the section, or `None` when no evidence
    /// was readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,
}

/// A candidate entry within [`SectionMeta`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMeta {
    pub path: String,
    pub score: f64,
}

/// Root structure of `meta.json`, recording what each section was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMeta {
    /// Time-sortable identifier for this build run.
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// One entry per requirement, in requirement order.
    pub requirements: Vec<SectionMeta>,
}

impl BuildMeta {
    pub fn new(requirements: Vec<SectionMeta>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            generated_at: Utc::now(),
            requirements,
        }
    }
}
