//! Record assembly: merge a card with the engine's raw fields, normalize,
//! fill the gaps, and validate.

use std::collections::BTreeMap;

use url::Url;

use crate::models::{Card, FieldKey, FieldMap, ProfileRecord, SENTINEL};
use crate::normalize::{extract_leading_digits, sanitize_display_name};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("record has no usable name")]
    MissingName,
    #[error("malformed detail URL `{0}`")]
    InvalidDetailUrl(String),
}

pub struct RecordAssembler {
    default_genre: String,
}

impl RecordAssembler {
    /// `default_genre` fills `genre` when nothing was extracted; usually the
    /// source's display name.
    pub fn new(default_genre: impl Into<String>) -> Self {
        Self {
            default_genre: default_genre.into(),
        }
    }

    /// Every field key present; values normalized or set to the sentinel.
    /// Running this on its own output changes nothing.
    pub fn normalize_fields(&self, raw: &FieldMap) -> BTreeMap<FieldKey, String> {
        FieldKey::ALL
            .iter()
            .map(|key| {
                let value = raw.get(key).map(|v| v.trim()).unwrap_or("");
                let value = match key {
                    FieldKey::Age => extract_leading_digits(value),
                    _ => value.to_string(),
                };
                let value = if !value.is_empty() {
                    value
                } else if *key == FieldKey::Genre && !self.default_genre.is_empty() {
                    self.default_genre.clone()
                } else {
                    SENTINEL.to_string()
                };
                (*key, value)
            })
            .collect()
    }

    pub fn assemble(&self, card: &Card, raw: &FieldMap) -> ProfileRecord {
        let mut raw = raw.clone();
        let age_missing = raw.get(&FieldKey::Age).map_or(true, |v| v.trim().is_empty());
        if age_missing && !card.age_hint.is_empty() {
            raw.insert(FieldKey::Age, card.age_hint.clone());
        }

        let name = sanitize_display_name(&card.name);

        ProfileRecord {
            name: if name.is_empty() { SENTINEL.to_string() } else { name },
            detail_url: card.detail_url.clone(),
            thumbnail_url: non_empty(&card.thumbnail_url),
            one_line_comment: non_empty(&card.comment),
            fields: self.normalize_fields(&raw),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// A record must carry a real name and an absolute http(s) detail URL.
pub fn validate(record: &ProfileRecord) -> Result<(), ValidationError> {
    if record.name.trim().is_empty() || record.name == SENTINEL {
        return Err(ValidationError::MissingName);
    }
    let well_formed = Url::parse(&record.detail_url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false);
    if !well_formed {
        return Err(ValidationError::InvalidDetailUrl(record.detail_url.clone()));
    }
    Ok(())
}
