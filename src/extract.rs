//! Field extraction engine.
//!
//! A detail page is run through an ordered chain of [`FieldStrategy`] stages.
//! Each stage is only asked for the fields every earlier stage left empty, so
//! the chain order is the precedence order: structured containers, then
//! selector fallbacks, then the label-sibling scan.

mod selectors;
mod sibling;
mod structured;

use scraper::Html;
use tracing::debug;

use crate::models::{FieldKey, FieldMap};
use crate::source::ProfileLayout;

pub use selectors::SelectorFallback;
pub use sibling::LabelSiblingFallback;
pub use structured::StructuredContainers;

/// One parsed detail page. Built per page and dropped before the next one.
pub struct ExtractionContext {
    document: Html,
}

impl ExtractionContext {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }
}

/// One stage of the fallback chain.
pub trait FieldStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Values for any of `pending`. Fields the stage cannot find may be
    /// omitted or left empty; values for fields outside `pending` are ignored.
    fn extract(&self, ctx: &ExtractionContext, pending: &[FieldKey]) -> FieldMap;
}

pub struct ExtractionEngine {
    stages: Vec<Box<dyn FieldStrategy>>,
}

impl ExtractionEngine {
    pub fn new(stages: Vec<Box<dyn FieldStrategy>>) -> Self {
        Self { stages }
    }

    /// The standard three-stage chain for a source's detail-page layout.
    pub fn for_layout(layout: &ProfileLayout) -> Self {
        Self::new(vec![
            Box::new(StructuredContainers::from_layout(layout)),
            Box::new(SelectorFallback::from_layout(layout)),
            Box::new(LabelSiblingFallback::new(layout.dictionary.clone())),
        ])
    }

    /// Raw, un-normalized values; first non-empty stage wins per field.
    pub fn extract(&self, ctx: &ExtractionContext) -> FieldMap {
        let mut merged = FieldMap::new();

        for stage in &self.stages {
            let pending: Vec<FieldKey> = FieldKey::ALL
                .iter()
                .copied()
                .filter(|k| merged.get(k).map_or(true, |v| v.trim().is_empty()))
                .collect();
            if pending.is_empty() {
                break;
            }

            for (field, value) in stage.extract(ctx, &pending) {
                if value.trim().is_empty() || !pending.contains(&field) {
                    continue;
                }
                debug!(stage = stage.name(), field = %field, "field recovered");
                merged.insert(field, value);
            }
        }

        merged
    }

    pub fn extract_html(&self, html: &str) -> FieldMap {
        let ctx = ExtractionContext::parse(html);
        self.extract(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::madam_live;

    struct Fixed(&'static str, Vec<(FieldKey, &'static str)>);

    impl FieldStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn extract(&self, _ctx: &ExtractionContext, _pending: &[FieldKey]) -> FieldMap {
            self.1
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect()
        }
    }

    fn ctx(html: &str) -> ExtractionContext {
        ExtractionContext::parse(html)
    }

    #[test]
    fn test_earlier_stage_has_priority() {
        let engine = ExtractionEngine::new(vec![
            Box::new(Fixed("first", vec![(FieldKey::Age, "41"), (FieldKey::Cup, "")])),
            Box::new(Fixed("second", vec![(FieldKey::Age, "99"), (FieldKey::Cup, "E")])),
        ]);
        let fields = engine.extract(&ctx("<html></html>"));
        assert_eq!(fields[&FieldKey::Age], "41");
        assert_eq!(fields[&FieldKey::Cup], "E");
        assert!(!fields.contains_key(&FieldKey::Job));
    }

    #[test]
    fn test_structured_beats_fallbacks() {
        let html = r#"<html><body>
            <span class="age">99歳</span>
            <div class="profile">
              <dl><dt>年齢</dt><dd>41歳</dd></dl>
              <dl><dt>身長</dt><dd>158cm</dd></dl>
            </div>
            <p>職業</p><span>会社員</span>
        </body></html>"#;
        let engine = ExtractionEngine::for_layout(&madam_live().profile);
        let fields = engine.extract(&ctx(html));

        assert_eq!(fields[&FieldKey::Age], "41歳");
        assert_eq!(fields[&FieldKey::Height], "158cm");
        assert_eq!(fields[&FieldKey::Job], "会社員");
    }

    #[test]
    fn test_selector_fallback_fills_structured_gap() {
        let html = r#"<html><body>
            <div class="profile"><dl><dt>趣味</dt><dd>料理</dd></dl></div>
            <ul><li class="cup">Fカップ</li></ul>
        </body></html>"#;
        let engine = ExtractionEngine::for_layout(&madam_live().profile);
        let fields = engine.extract(&ctx(html));

        assert_eq!(fields[&FieldKey::Hobby], "料理");
        assert_eq!(fields[&FieldKey::Cup], "Fカップ");
    }
}
