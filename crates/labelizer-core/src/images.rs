//! Image file naming.
//!
//! Every item has two image files: `<id>.<ext>` and `<id>_canonical.<ext>`.
//! The id is everything before the first `.` of the file name, so an
//! extension like `stp.png` is allowed.

use std::collections::BTreeSet;

pub const CANONICAL_SUFFIX: &str = "_canonical";

/// A parsed image file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub id: String,
    pub canonical: bool,
}

impl ImageName {
    /// Returns `None` for names with an empty id (dotfiles and the like).
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.split('.').next().unwrap_or_default();
        let (id, canonical) = match stem.strip_suffix(CANONICAL_SUFFIX) {
            Some(id) => (id, true),
            None => (stem, false),
        };
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            canonical,
        })
    }
}

/// File name for an item's image variant.
pub fn image_file_name(id: &str, canonical: bool, extension: &str) -> String {
    let suffix = if canonical { CANONICAL_SUFFIX } else { "" };
    format!("{}{}.{}", id, suffix, extension)
}

/// Item ids found in a set of image files, split by variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageIndex {
    pub plain: BTreeSet<String>,
    pub canonical: BTreeSet<String>,
}

impl ImageIndex {
    pub fn from_file_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::default();
        for name in names {
            if let Some(parsed) = ImageName::parse(name.as_ref()) {
                if parsed.canonical {
                    index.canonical.insert(parsed.id);
                } else {
                    index.plain.insert(parsed.id);
                }
            }
        }
        index
    }

    /// Ids present in only one of the two variants, sorted.
    pub fn mismatched(&self) -> Vec<String> {
        self.plain
            .symmetric_difference(&self.canonical)
            .cloned()
            .collect()
    }
}
