//! Error types surfaced by the triplet, upload, and similarity services.
//!
//! Store backends return `anyhow::Error`; anything they raise ends up in
//! [`LabelError::Storage`] and is fatal for the current operation. Every
//! other variant is a client error (the request or the archive is wrong),
//! and the server maps them to 4xx responses.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LabelError>;

#[derive(Error, Debug)]
pub enum LabelError {
    /// Item, triplet, upload status, or image does not exist, or no
    /// unlabeled triplet is currently available.
    #[error("{0}")]
    NotFound(String),

    #[error("invalid archive: {0}")]
    BadArchive(String),

    #[error("missing required path in archive: {}", .0.display())]
    MissingStructure(PathBuf),

    #[error("discrepancy between images and canonical images: {}", .0.join(", "))]
    CanonicalMismatch(Vec<String>),

    #[error("missing images for these ids: {}", .0.join(", "))]
    MissingImages(Vec<String>),

    /// Triplets reference ids with images but no item row, in the upload
    /// or in the store.
    #[error("missing items for these ids: {}", .0.join(", "))]
    MissingItems(Vec<String>),

    #[error("{file} line {line}: {message}")]
    InvalidCsv {
        file: String,
        line: u64,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not authenticated: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LabelError {
    /// True for failures of the uploaded archive itself.
    pub fn is_upload_validation(&self) -> bool {
        matches!(
            self,
            LabelError::BadArchive(_)
                | LabelError::MissingStructure(_)
                | LabelError::CanonicalMismatch(_)
                | LabelError::MissingImages(_)
                | LabelError::MissingItems(_)
                | LabelError::InvalidCsv { .. }
        )
    }
}

impl From<std::io::Error> for LabelError {
    fn from(err: std::io::Error) -> Self {
        LabelError::Storage(err.into())
    }
}
