use scraper::{ElementRef, Html};

use super::{ExtractionContext, FieldStrategy};
use crate::dictionary::LabelDictionary;
use crate::models::{FieldKey, FieldMap};
use crate::normalize::{collapse_text, own_text};

/// Tags that never hold a visible label.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "title"];

/// Tags a value is expected to sit in.
const VALUE_TAGS: &[&str] = &["dd", "td", "span", "div", "p", "li"];

/// Last-resort document-order scan: the first element whose own text holds a
/// field keyword is taken as the label, and the value is read from its paired
/// `<dd>`/`<td>` or from the next value-shaped element after it.
pub struct LabelSiblingFallback {
    dictionary: LabelDictionary,
}

impl LabelSiblingFallback {
    pub fn new(dictionary: LabelDictionary) -> Self {
        Self { dictionary }
    }
}

impl FieldStrategy for LabelSiblingFallback {
    fn name(&self) -> &'static str {
        "label-sibling"
    }

    fn extract(&self, ctx: &ExtractionContext, pending: &[FieldKey]) -> FieldMap {
        pending
            .iter()
            .filter(|field| !self.dictionary.keywords(**field).is_empty())
            .map(|field| {
                let value = find_labeled_value(ctx.document(), self.dictionary.keywords(*field));
                (*field, value)
            })
            .filter(|(_, value)| !value.is_empty())
            .collect()
    }
}

pub fn find_labeled_value(document: &Html, keywords: &[String]) -> String {
    let mut nodes = document.root_element().descendants();

    let label = nodes.by_ref().filter_map(ElementRef::wrap).find(|el| {
        if SKIP_TAGS.contains(&el.value().name()) {
            return false;
        }
        let text = own_text(*el);
        keywords.iter().any(|k| text.contains(k.as_str()))
    });
    let Some(label) = label else {
        return String::new();
    };

    let paired = match label.value().name() {
        "dt" => Some("dd"),
        "th" => Some("td"),
        _ => None,
    };
    if let Some(pair_tag) = paired {
        let value = label
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == pair_tag);
        if value.is_some() {
            return collapse_text(value);
        }
    }

    let next = nodes
        .filter_map(ElementRef::wrap)
        .find(|el| VALUE_TAGS.contains(&el.value().name()));
    collapse_text(next)
}
