//! Label dictionary: canonical field → keyword substrings that identify the
//! field's label on a profile page.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::FieldKey;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DictionaryError {
    #[error("field `{0}` has an empty keyword")]
    EmptyKeyword(FieldKey),
    #[error("keyword `{keyword}` of `{field}` overlaps `{other_keyword}` of `{other_field}`")]
    Overlap {
        field: FieldKey,
        keyword: String,
        other_field: FieldKey,
        other_keyword: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelDictionary {
    entries: BTreeMap<FieldKey, Vec<String>>,
}

impl LabelDictionary {
    /// Build and validate a dictionary.
    pub fn new<I, K>(entries: I) -> Result<Self, DictionaryError>
    where
        I: IntoIterator<Item = (FieldKey, Vec<K>)>,
        K: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(field, keywords)| (field, keywords.into_iter().map(Into::into).collect()))
            .collect();
        let dict = Self { entries };
        dict.validate()?;
        Ok(dict)
    }

    /// Keywords common to the live-chat profile pages.
    pub fn standard() -> Self {
        let entries: [(FieldKey, &[&str]); 11] = [
            (FieldKey::Age, &["年齢", "歳", "才"]),
            (FieldKey::Height, &["身長", "cm"]),
            (FieldKey::Cup, &["カップ", "バスト", "スリーサイズ"]),
            (FieldKey::FacePublic, &["顔出し", "顔", "公開"]),
            (FieldKey::Toy, &["おもちゃ", "玩具"]),
            (FieldKey::TimeSlot, &["出没時間", "時間"]),
            (FieldKey::Style, &["スタイル"]),
            (FieldKey::Job, &["職業"]),
            (FieldKey::Hobby, &["趣味"]),
            (FieldKey::FavoriteType, &["好みのタイプ", "好きなタイプ", "男性のタイプ"]),
            (FieldKey::ErogenousZone, &["性感帯"]),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(field, kws)| (field, kws.iter().map(|s| s.to_string()).collect()))
                .collect(),
        }
    }

    /// Reject empty keywords and any keyword that is a substring of another
    /// field's keyword, since a label containing the longer one would match
    /// both fields.
    pub fn validate(&self) -> Result<(), DictionaryError> {
        for (field, keywords) in &self.entries {
            if keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(DictionaryError::EmptyKeyword(*field));
            }
        }
        for (field, keywords) in &self.entries {
            for (other_field, other_keywords) in &self.entries {
                if field >= other_field {
                    continue;
                }
                for keyword in keywords {
                    for other_keyword in other_keywords {
                        if keyword.contains(other_keyword.as_str())
                            || other_keyword.contains(keyword.as_str())
                        {
                            return Err(DictionaryError::Overlap {
                                field: *field,
                                keyword: keyword.clone(),
                                other_field: *other_field,
                                other_keyword: other_keyword.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn keywords(&self, field: FieldKey) -> &[String] {
        self.entries.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn label_matches(&self, field: FieldKey, label: &str) -> bool {
        self.keywords(field).iter().any(|k| label.contains(k.as_str()))
    }

    /// First field whose keywords occur in `label`.
    pub fn match_label(&self, label: &str) -> Option<FieldKey> {
        self.fields().find(|field| self.label_matches(*field, label))
    }
}
