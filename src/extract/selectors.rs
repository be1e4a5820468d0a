use scraper::Selector;

use super::{ExtractionContext, FieldStrategy};
use crate::models::{FieldKey, FieldMap};
use crate::normalize::collapse_text;
use crate::source::ProfileLayout;

/// Ordered per-field selector lists tried against the whole document.
///
/// Only the first element each selector matches is read, and the first
/// selector yielding non-empty text wins. List order is significant.
pub struct SelectorFallback {
    lists: Vec<(FieldKey, Vec<Selector>)>,
}

impl SelectorFallback {
    pub fn from_layout(layout: &ProfileLayout) -> Self {
        let lists = layout
            .fallback_selectors
            .iter()
            .map(|(field, selectors)| {
                let compiled = selectors
                    .iter()
                    .filter_map(|s| Selector::parse(s).ok())
                    .collect();
                (*field, compiled)
            })
            .collect();
        Self { lists }
    }
}

impl FieldStrategy for SelectorFallback {
    fn name(&self) -> &'static str {
        "selectors"
    }

    fn extract(&self, ctx: &ExtractionContext, pending: &[FieldKey]) -> FieldMap {
        let document = ctx.document();
        self.lists
            .iter()
            .filter(|(field, _)| pending.contains(field))
            .filter_map(|(field, selectors)| {
                selectors
                    .iter()
                    .map(|sel| collapse_text(document.select(sel).next()))
                    .find(|text| !text.is_empty())
                    .map(|text| (*field, text))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{jewel_live, madam_live};

    fn run(layout: &ProfileLayout, html: &str, pending: &[FieldKey]) -> FieldMap {
        let ctx = ExtractionContext::parse(html);
        SelectorFallback::from_layout(layout).extract(&ctx, pending)
    }

    #[test]
    fn test_first_nonempty_selector_wins() {
        // `.age` matches the empty div first, so `span.age` supplies the value.
        let html = r#"<div class="age"></div><span class="age">38歳</span><td class="age">99</td>"#;
        let fields = run(&madam_live().profile, html, &FieldKey::ALL);
        assert_eq!(fields[&FieldKey::Age], "38歳");
    }

    #[test]
    fn test_list_order_beats_document_order() {
        let html = r#"<ul><li class="face">NG</li></ul><p class="face">OK</p>"#;
        let fields = run(&madam_live().profile, html, &FieldKey::ALL);
        // `.face` is listed first and matches the <li> before the <p>.
        assert_eq!(fields[&FieldKey::FacePublic], "NG");
    }

    #[test]
    fn test_only_pending_fields_are_tried() {
        let html = r#"<span class="height">160cm</span><span class="cup">D</span>"#;
        let fields = run(&madam_live().profile, html, &[FieldKey::Cup]);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[&FieldKey::Cup], "D");
    }

    #[test]
    fn test_specific_dd_selector_first() {
        let html = r#"<span class="p-height">170</span><dl><dd class="p-height">158cm</dd></dl>"#;
        let fields = run(&jewel_live().profile, html, &FieldKey::ALL);
        assert_eq!(fields[&FieldKey::Height], "158cm");
    }
}
