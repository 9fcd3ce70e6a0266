use serde::{Deserialize, Serialize};

/// One listing tile as scraped from a category page. Every field is optional
/// because markup is best-effort; validation happens in [`ListingSummary::owner`]
/// and [`ListingSummary::into_candidate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingSummary {
    pub identifier: Option<String>,
    pub owner_id: Option<String>,
    pub item_ref: Option<String>,
    pub display_title: Option<String>,
}

impl ListingSummary {
    /// Owner id when both the identifier and the owner are present.
    pub fn owner(&self) -> Option<&str> {
        match (non_blank(&self.identifier), non_blank(&self.owner_id)) {
            (Some(_), Some(owner)) => Some(owner),
            _ => None,
        }
    }

    /// Builds the immutable record once the detail page yielded its signal.
    /// Returns `None` when the identifier or owner id is missing.
    pub fn into_candidate(self, verified_signal: Option<String>) -> Option<CandidateRecord> {
        let identifier = non_blank(&self.identifier)?.to_string();
        let owner_id = non_blank(&self.owner_id)?.to_string();
        Some(CandidateRecord {
            identifier,
            owner_id,
            item_ref: self.item_ref.unwrap_or_default(),
            display_title: self.display_title.unwrap_or_default(),
            verified_signal,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A harvested record accepted by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub identifier: String,
    pub owner_id: String,
    pub item_ref: String,
    pub display_title: String,
    pub verified_signal: Option<String>,
}
