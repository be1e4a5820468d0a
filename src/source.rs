//! Per-site source profiles.
//!
//! A profile is pure data: where the listing lives, how to find cards on it,
//! where the profile region sits on a detail page, and which keywords and
//! selectors identify each field. Onboarding a site means writing a profile,
//! never new extraction code.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::dictionary::{DictionaryError, LabelDictionary};
use crate::models::FieldKey;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source `{source_name}`: invalid selector `{selector}`")]
    InvalidSelector { source_name: String, selector: String },
    #[error("source `{source_name}`: invalid value pattern `{pattern}`")]
    InvalidPattern { source_name: String, pattern: String },
    #[error("source `{source_name}`: invalid base URL `{url}`")]
    InvalidBaseUrl { source_name: String, url: String },
    #[error("source `{source_name}`: {error}")]
    Dictionary {
        source_name: String,
        error: DictionaryError,
    },
    #[error("unknown source `{0}`")]
    Unknown(String),
    #[error("failed to read sources file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse sources file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shape of a label/value container inside the profile region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerShape {
    /// `<dt>` label followed by a sibling `<dd>` value.
    DefinitionList,
    /// `<tr>` rows with a `<th>` label and a `<td>` value.
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSelector {
    pub shape: ContainerShape,
    pub selector: String,
}

impl ContainerSelector {
    pub fn definition_list(selector: &str) -> Self {
        Self {
            shape: ContainerShape::DefinitionList,
            selector: selector.to_string(),
        }
    }

    pub fn table(selector: &str) -> Self {
        Self {
            shape: ContainerShape::Table,
            selector: selector.to_string(),
        }
    }
}

/// Listing-page layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardLayout {
    /// Tried in order; the first selector with any match supplies every card.
    pub card_selectors: Vec<String>,
    /// Href fragments for the last-resort anchor scan.
    #[serde(default)]
    pub link_fragments: Vec<String>,
    pub name_selector: String,
    #[serde(default)]
    pub comment_selector: Option<String>,
    #[serde(default)]
    pub link_selector: Option<String>,
    #[serde(default)]
    pub thumbnail_selector: Option<String>,
    /// Block whose text carries the age next to the name.
    #[serde(default)]
    pub age_selector: Option<String>,
    /// Drop cards missing a thumbnail or a comment.
    #[serde(default)]
    pub require_thumbnail_and_comment: bool,
}

/// Per-field tidy-up of a value read from a profile container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueCleanup {
    /// Characters stripped from the start of the value.
    #[serde(default)]
    pub trim_start: String,
    /// Keep only the first match; a value without a match is kept whole.
    #[serde(default)]
    pub pattern: Option<String>,
}

impl ValueCleanup {
    pub fn trim_start(chars: &str) -> Self {
        Self {
            trim_start: chars.to_string(),
            pattern: None,
        }
    }

    pub fn pattern(pattern: &str) -> Self {
        Self {
            trim_start: String::new(),
            pattern: Some(pattern.to_string()),
        }
    }
}

/// Detail-page layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLayout {
    pub region_selector: String,
    pub containers: Vec<ContainerSelector>,
    #[serde(default)]
    pub tag_selector: Option<String>,
    /// Ordered most specific first; the first non-empty hit wins.
    #[serde(default)]
    pub fallback_selectors: BTreeMap<FieldKey, Vec<String>>,
    #[serde(default)]
    pub cleanup: BTreeMap<FieldKey, ValueCleanup>,
    pub dictionary: LabelDictionary,
}

/// Extra request settings some sites insist on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    /// Fetched once before the listing so the site sets its cookies.
    #[serde(default)]
    pub warmup_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    /// Human-readable site name; doubles as the default genre.
    pub display_name: String,
    pub base_url: String,
    pub cards: CardLayout,
    pub profile: ProfileLayout,
    #[serde(default)]
    pub session: SessionOptions,
}

impl SourceProfile {
    pub fn base(&self) -> Result<Url, SourceError> {
        Url::parse(&self.base_url).map_err(|_| SourceError::InvalidBaseUrl {
            source_name: self.name.clone(),
            url: self.base_url.clone(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim().to_string();
        self
    }

    /// Check the base URL, every selector, and the dictionary.
    pub fn validate(&self) -> Result<(), SourceError> {
        self.base()?;

        self.profile
            .dictionary
            .validate()
            .map_err(|error| SourceError::Dictionary {
                source_name: self.name.clone(),
                error,
            })?;

        let cards = &self.cards;
        let profile = &self.profile;
        let selectors = cards
            .card_selectors
            .iter()
            .chain(std::iter::once(&cards.name_selector))
            .chain(cards.comment_selector.iter())
            .chain(cards.link_selector.iter())
            .chain(cards.thumbnail_selector.iter())
            .chain(cards.age_selector.iter())
            .chain(std::iter::once(&profile.region_selector))
            .chain(profile.containers.iter().map(|c| &c.selector))
            .chain(profile.tag_selector.iter())
            .chain(profile.fallback_selectors.values().flatten());

        for selector in selectors {
            if Selector::parse(selector).is_err() {
                return Err(SourceError::InvalidSelector {
                    source_name: self.name.clone(),
                    selector: selector.clone(),
                });
            }
        }

        for pattern in profile.cleanup.values().filter_map(|c| c.pattern.as_ref()) {
            if Regex::new(pattern).is_err() {
                return Err(SourceError::InvalidPattern {
                    source_name: self.name.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn class_fallbacks(pairs: &[(FieldKey, &str)]) -> BTreeMap<FieldKey, Vec<String>> {
    pairs
        .iter()
        .map(|(field, class)| {
            let list = vec![
                format!(".{}", class),
                format!("span.{}", class),
                format!("li.{}", class),
                format!("td.{}", class),
            ];
            (*field, list)
        })
        .collect()
}

fn standard_fallbacks() -> BTreeMap<FieldKey, Vec<String>> {
    class_fallbacks(&[
        (FieldKey::Age, "age"),
        (FieldKey::Height, "height"),
        (FieldKey::Cup, "cup"),
        (FieldKey::FacePublic, "face"),
    ])
}

fn standard_profile_layout() -> ProfileLayout {
    ProfileLayout {
        region_selector: ".profile, .cast-profile, .profile-box".to_string(),
        containers: vec![
            ContainerSelector::definition_list("dl"),
            ContainerSelector::table("table"),
        ],
        tag_selector: Some(".tag, .genre, .badge".to_string()),
        fallback_selectors: standard_fallbacks(),
        cleanup: BTreeMap::new(),
        dictionary: LabelDictionary::standard(),
    }
}

// ── Built-in profiles ────────────────────────────────────────────────────────

pub fn madam_live() -> SourceProfile {
    SourceProfile {
        name: "madam-live".to_string(),
        display_name: "Madam Live".to_string(),
        base_url: "https://www.madamlive.tv/".to_string(),
        cards: CardLayout {
            card_selectors: strings(&[
                "div.cast-box",
                "li.cast",
                "div.card",
                "dl.onlinegirl-dl-big",
                "dl.onlinegirl-dl",
                "dl[id^='stat_']",
                "section a[href]",
            ]),
            link_fragments: strings(&["/profile", "/cast", "/live", "/girls"]),
            name_selector: ".name, .nickname, .user_name, .user-name, .nick, .nick_name, h3, h4, \
                p.name, .live-name, span.onlinegirl-dt-name-span-big h3 a, \
                span.onlinegirl-dt-name-span-big a"
                .to_string(),
            comment_selector: Some(
                ".comment, .message, .tagline, .catch, .live-comment, p.comment, \
                 span.onlinegirl-dd-comment-span-big, .onlinegirl-dd-comment-span-big a"
                    .to_string(),
            ),
            link_selector: None,
            thumbnail_selector: None,
            age_selector: None,
            require_thumbnail_and_comment: false,
        },
        profile: standard_profile_layout(),
        session: SessionOptions::default(),
    }
}

pub fn angel_live() -> SourceProfile {
    SourceProfile {
        name: "angel-live".to_string(),
        display_name: "Angel Live".to_string(),
        base_url: "https://www.angel-live.com/home/".to_string(),
        cards: CardLayout {
            card_selectors: strings(&["li.girl-line__item", "li"]),
            link_fragments: Vec::new(),
            name_selector: "h3.girl-prof__name, .girl-prof__name, h3, h4".to_string(),
            comment_selector: Some(
                "div.girl-comment p.girl-comment__txt, .girl-comment__txt".to_string(),
            ),
            link_selector: Some("a.girl-link[href]".to_string()),
            thumbnail_selector: Some(".girl-pic__image[style]".to_string()),
            age_selector: None,
            require_thumbnail_and_comment: false,
        },
        profile: standard_profile_layout(),
        session: SessionOptions::default(),
    }
}

pub fn chatpia() -> SourceProfile {
    SourceProfile {
        name: "chatpia".to_string(),
        display_name: "Chatpia".to_string(),
        base_url: "https://www.chatpia.jp/main.php".to_string(),
        cards: CardLayout {
            card_selectors: strings(&[
                "div.chatbox_big, div.chatbox_small",
                "div.chatbox_big, div.chatbox-box, div.line",
            ]),
            link_fragments: Vec::new(),
            name_selector: ".name a".to_string(),
            comment_selector: Some(".hitokoto, .hitokoto_taiki, .hitokoto_new".to_string()),
            link_selector: Some(".name a".to_string()),
            thumbnail_selector: Some(".pict".to_string()),
            age_selector: Some(".name".to_string()),
            require_thumbnail_and_comment: true,
        },
        profile: ProfileLayout {
            region_selector: "section.life-status".to_string(),
            containers: vec![ContainerSelector::definition_list("dl")],
            tag_selector: None,
            fallback_selectors: BTreeMap::new(),
            // スリーサイズ reads "B88(Dカップ) W58 H86"; only the cup is kept.
            cleanup: BTreeMap::from([(FieldKey::Cup, ValueCleanup::pattern("[A-ZＡ-Ｚ]カップ"))]),
            dictionary: LabelDictionary::standard(),
        },
        session: SessionOptions {
            referer: Some("https://www.chatpia.jp/".to_string()),
            accept_language: Some("ja,en-US;q=0.9,en;q=0.8".to_string()),
            warmup_url: Some("https://www.chatpia.jp/".to_string()),
        },
    }
}

pub fn jewel_live() -> SourceProfile {
    let mut fallback_selectors = class_fallbacks(&[
        (FieldKey::Age, "p-age"),
        (FieldKey::Height, "p-height"),
        (FieldKey::Cup, "p-cup"),
        (FieldKey::FacePublic, "p-face"),
    ]);
    for list in fallback_selectors.values_mut() {
        // dd.p-* is the live markup; keep it ahead of the generic forms.
        let dd = list[0].replacen('.', "dd.", 1);
        list.insert(0, dd);
    }

    SourceProfile {
        name: "jewel-live".to_string(),
        display_name: "Jewel Live".to_string(),
        base_url: "https://www.j-live.tv/".to_string(),
        cards: CardLayout {
            card_selectors: strings(&["li.online-girl.party"]),
            link_fragments: Vec::new(),
            name_selector: "li.nick_name h3 b, h3 > b.bold".to_string(),
            comment_selector: Some("li.taiki_comment".to_string()),
            link_selector: None,
            thumbnail_selector: Some("li.image span[style]".to_string()),
            age_selector: None,
            require_thumbnail_and_comment: false,
        },
        profile: ProfileLayout {
            region_selector: ".profile, .cast-profile, .profile-box, #profile".to_string(),
            containers: vec![ContainerSelector::definition_list("dl")],
            tag_selector: Some("dd.genre-list div.genre-div, .tag, .genre, .badge".to_string()),
            fallback_selectors,
            cleanup: BTreeMap::new(),
            dictionary: LabelDictionary::standard(),
        },
        session: SessionOptions::default(),
    }
}

pub fn dmm_live_chat() -> SourceProfile {
    let standard = LabelDictionary::standard();
    let keywords: Vec<(FieldKey, Vec<String>)> = standard
        .fields()
        .map(|field| {
            let mut keywords = standard.keywords(field).to_vec();
            if field == FieldKey::FavoriteType {
                keywords.push("タイプ".to_string());
            }
            (field, keywords)
        })
        .collect();
    let dictionary = LabelDictionary::new(keywords).unwrap_or(standard);

    SourceProfile {
        name: "dmm-live-chat".to_string(),
        display_name: "FANZA Live Chat".to_string(),
        base_url: "https://www.dmm.co.jp/live/chat/".to_string(),
        cards: CardLayout {
            card_selectors: strings(&["li.CharacterItem"]),
            link_fragments: Vec::new(),
            name_selector: ".CharacterItem__name".to_string(),
            comment_selector: Some(".CharacterItem__comment".to_string()),
            link_selector: Some("a.CharacterItem__anchor".to_string()),
            thumbnail_selector: None,
            age_selector: None,
            require_thumbnail_and_comment: false,
        },
        profile: ProfileLayout {
            region_selector: "table.cg-data-set".to_string(),
            containers: vec![ContainerSelector::table("table.cg-data-set")],
            tag_selector: None,
            fallback_selectors: BTreeMap::new(),
            // Values are printed as "：165cm".
            cleanup: FieldKey::ALL
                .iter()
                .map(|field| (*field, ValueCleanup::trim_start("：")))
                .collect(),
            dictionary,
        },
        session: SessionOptions::default(),
    }
}

// ── Catalogue ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceCatalog {
    profiles: Vec<SourceProfile>,
}

impl SourceCatalog {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                madam_live(),
                angel_live(),
                chatpia(),
                jewel_live(),
                dmm_live_chat(),
            ],
        }
    }

    /// Built-in profiles, plus (or replaced by) the profiles in a JSON file.
    pub fn load(extra: Option<&Path>) -> Result<Self, SourceError> {
        let mut catalog = Self::builtin();
        if let Some(path) = extra {
            let text = std::fs::read_to_string(path)?;
            let profiles: Vec<SourceProfile> = serde_json::from_str(&text)?;
            for profile in profiles {
                catalog.insert(profile);
            }
        }
        for profile in &catalog.profiles {
            profile.validate()?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, profile: SourceProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn get(&self, name: &str) -> Result<&SourceProfile, SourceError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SourceError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_validate() {
        for profile in SourceCatalog::builtin().profiles {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_jewel_fallbacks_prefer_dd() {
        let profile = jewel_live();
        let age = &profile.profile.fallback_selectors[&FieldKey::Age];
        assert_eq!(age[0], "dd.p-age");
        assert_eq!(age[1], ".p-age");
        assert_eq!(age.last().map(String::as_str), Some("td.p-age"));
    }

    #[test]
    fn test_dmm_dictionary_accepts_bare_type_label() {
        let profile = dmm_live_chat();
        assert_eq!(
            profile.profile.dictionary.match_label("タイプ"),
            Some(FieldKey::FavoriteType)
        );
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut profile = madam_live();
        profile.profile.region_selector = "div[".to_string();
        assert!(matches!(
            profile.validate(),
            Err(SourceError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_invalid_cleanup_pattern_rejected() {
        let mut profile = chatpia();
        profile
            .profile
            .cleanup
            .insert(FieldKey::Cup, ValueCleanup::pattern("([A-Z"));
        assert!(matches!(
            profile.validate(),
            Err(SourceError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_overlapping_dictionary_rejected_at_load() {
        let mut profile = madam_live();
        profile.name = "custom".to_string();
        profile.profile.dictionary = serde_json::from_str(
            r#"{"favorite_type": ["好みのタイプ"], "style": ["タイプ"]}"#,
        )
        .unwrap();
        let json = serde_json::to_string(&vec![profile]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, json).unwrap();

        let err = SourceCatalog::load(Some(&path)).unwrap_err();
        assert!(matches!(err, SourceError::Dictionary { .. }));
    }

    #[test]
    fn test_sources_file_replaces_by_name() {
        let profile = chatpia().with_base_url("https://staging.chatpia.example/main.php");
        let json = serde_json::to_string(&vec![profile]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, json).unwrap();

        let catalog = SourceCatalog::load(Some(&path)).unwrap();
        assert_eq!(catalog.names().count(), 5);
        assert_eq!(
            catalog.get("chatpia").unwrap().base_url,
            "https://staging.chatpia.example/main.php"
        );
        assert!(matches!(catalog.get("nope"), Err(SourceError::Unknown(_))));
    }
}
