use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder stored for any field the engine could not recover.
pub const SENTINEL: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Age,
    Height,
    Cup,
    FacePublic,
    Toy,
    TimeSlot,
    Style,
    Job,
    Hobby,
    FavoriteType,
    ErogenousZone,
    Genre,
}

impl FieldKey {
    /// Canonical column order.
    pub const ALL: [FieldKey; 12] = [
        FieldKey::Age,
        FieldKey::Height,
        FieldKey::Cup,
        FieldKey::FacePublic,
        FieldKey::Toy,
        FieldKey::TimeSlot,
        FieldKey::Style,
        FieldKey::Job,
        FieldKey::Hobby,
        FieldKey::FavoriteType,
        FieldKey::ErogenousZone,
        FieldKey::Genre,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Age => "age",
            FieldKey::Height => "height",
            FieldKey::Cup => "cup",
            FieldKey::FacePublic => "face_public",
            FieldKey::Toy => "toy",
            FieldKey::TimeSlot => "time_slot",
            FieldKey::Style => "style",
            FieldKey::Job => "job",
            FieldKey::Hobby => "hobby",
            FieldKey::FavoriteType => "favorite_type",
            FieldKey::ErogenousZone => "erogenous_zone",
            FieldKey::Genre => "genre",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-field values as produced by one extraction stage. Absent and
/// empty entries both mean "not found".
pub type FieldMap = BTreeMap<FieldKey, String>;

/// Lightweight summary pulled from one listing-page card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Card {
    pub name: String,
    pub thumbnail_url: String,
    pub detail_url: String,
    pub comment: String,
    /// Digits printed next to the name on the card, if any.
    pub age_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRecord {
    pub name: String,
    pub detail_url: String,
    pub thumbnail_url: Option<String>,
    pub one_line_comment: Option<String>,
    pub fields: BTreeMap<FieldKey, String>,
}

impl ProfileRecord {
    pub fn field(&self, key: FieldKey) -> &str {
        self.fields.get(&key).map(String::as_str).unwrap_or(SENTINEL)
    }

    /// One row in canonical column order: name, thumbnail, url, comment,
    /// then every field key.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.name.clone(),
            self.thumbnail_url.clone().unwrap_or_default(),
            self.detail_url.clone(),
            self.one_line_comment.clone().unwrap_or_default(),
        ];
        row.extend(FieldKey::ALL.iter().map(|k| self.field(*k).to_string()));
        row
    }
}

/// Column headers matching [`ProfileRecord::to_row`].
pub fn row_headers() -> Vec<String> {
    let mut headers: Vec<String> = ["name", "thumbnail", "url", "comment"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    headers.extend(FieldKey::ALL.iter().map(|k| k.as_str().to_string()));
    headers
}

// ── HTTP service payloads ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub source: String,
    pub source_url: String,
    pub fields: BTreeMap<FieldKey, String>,
}
