//! Core data models used throughout Labelizer.
//!
//! These types represent the items, triplets, and upload progress rows that
//! flow through the upload pipeline, the lease allocator, and the HTTP API.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An image being compared, with its metadata and optional embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub length: f64,
    pub dataset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// The annotator's choice for a triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Left,
    Right,
    DontKnow,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Left => "left",
            Label::Right => "right",
            Label::DontKnow => "dont_know",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Label::Left),
            "right" => Ok(Label::Right),
            "dont_know" => Ok(Label::DontKnow),
            other => bail!("invalid label '{}': expected left, right or dont_know", other),
        }
    }
}

/// Which of the two parallel triplet tables an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Primary,
    Validation,
}

impl Collection {
    pub fn from_validation_flag(validation: bool) -> Self {
        if validation {
            Collection::Validation
        } else {
            Collection::Primary
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Primary => "triplets",
            Collection::Validation => "validation_triplets",
        }
    }

    /// Human-readable noun used in log lines and error messages.
    pub fn noun(&self) -> &'static str {
        match self {
            Collection::Primary => "triplet",
            Collection::Validation => "validation triplet",
        }
    }
}

/// Encoder provenance. Primary triplets compare one encoder's candidates;
/// validation triplets pit two encoders against each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Encoders {
    Single {
        encoder_id: String,
    },
    Pair {
        left_encoder_id: String,
        right_encoder_id: String,
    },
}

impl Encoders {
    pub fn collection(&self) -> Collection {
        match self {
            Encoders::Single { .. } => Collection::Primary,
            Encoders::Pair { .. } => Collection::Validation,
        }
    }
}

/// A labeling unit as stored.
///
/// `label` and `user_id` are either both `None` or both `Some`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Triplet {
    pub id: i64,
    pub reference_id: String,
    pub left_id: String,
    pub right_id: String,
    #[serde(flatten)]
    pub encoders: Encoders,
    pub label: Option<Label>,
    pub user_id: Option<String>,
    pub retrieved_at: Option<DateTime<Utc>>,
}

impl Triplet {
    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }

    pub fn item_ids(&self) -> [&str; 3] {
        [&self.reference_id, &self.left_id, &self.right_id]
    }
}

/// A triplet row parsed from an upload, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTriplet {
    pub reference_id: String,
    pub left_id: String,
    pub right_id: String,
    pub encoders: Encoders,
    pub label: Option<Label>,
    pub user_id: Option<String>,
}

impl NewTriplet {
    pub fn item_ids(&self) -> [&str; 3] {
        [&self.reference_id, &self.left_id, &self.right_id]
    }
}

/// Length and dataset of one referenced item, denormalized into a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub length: f64,
    pub dataset: String,
}

/// A leased triplet with the attributes of its three items.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTriplet {
    pub triplet: Triplet,
    pub reference: ItemSummary,
    pub left: ItemSummary,
    pub right: ItemSummary,
}

/// Labeled and unlabeled counts for both collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TripletStats {
    pub labeled: i64,
    pub unlabeled: i64,
    pub validation_labeled: i64,
    pub validation_unlabeled: i64,
}

/// Progress through the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Received,
    Extracted,
    StructureValidated,
    ImagesIndexed,
    TripletsLoaded,
    CrossValidated,
    Committing,
    Done,
    Failed,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Received => "received",
            UploadStage::Extracted => "extracted",
            UploadStage::StructureValidated => "structure_validated",
            UploadStage::ImagesIndexed => "images_indexed",
            UploadStage::TripletsLoaded => "triplets_loaded",
            UploadStage::CrossValidated => "cross_validated",
            UploadStage::Committing => "committing",
            UploadStage::Done => "done",
            UploadStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStage::Done | UploadStage::Failed)
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "received" => UploadStage::Received,
            "extracted" => UploadStage::Extracted,
            "structure_validated" => UploadStage::StructureValidated,
            "images_indexed" => UploadStage::ImagesIndexed,
            "triplets_loaded" => UploadStage::TripletsLoaded,
            "cross_validated" => UploadStage::CrossValidated,
            "committing" => UploadStage::Committing,
            "done" => UploadStage::Done,
            "failed" => UploadStage::Failed,
            other => bail!("unknown upload stage: {}", other),
        })
    }
}

/// One upload operation's progress row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadStatus {
    pub id: i64,
    pub to_upload_count: i64,
    pub uploaded_count: i64,
    pub stage: UploadStage,
    pub error: Option<String>,
}

impl UploadStatus {
    /// Returned when no upload has ever been recorded.
    pub fn empty() -> Self {
        Self {
            id: 0,
            to_upload_count: 0,
            uploaded_count: 0,
            stage: UploadStage::Done,
            error: None,
        }
    }
}

/// Outcome of a create-if-absent item batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemInsertReport {
    pub inserted: u64,
    pub skipped: Vec<String>,
}
