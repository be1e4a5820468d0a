use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::debug;

use super::{ExtractionContext, FieldStrategy};
use crate::dictionary::LabelDictionary;
use crate::models::{FieldKey, FieldMap};
use crate::normalize::collapse_text;
use crate::source::{ContainerShape, ProfileLayout, ValueCleanup};

static DT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("dt").unwrap());
static TR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static TH_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").unwrap());
static TD_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());

/// Label/value pairs from definition lists and tables inside the profile
/// region, plus the genre joined from tag/badge elements.
pub struct StructuredContainers {
    region: Option<Selector>,
    containers: Vec<(ContainerShape, Selector)>,
    tags: Option<Selector>,
    cleanup: BTreeMap<FieldKey, Cleanup>,
    dictionary: LabelDictionary,
}

struct Cleanup {
    trim_start: Vec<char>,
    pattern: Option<Regex>,
}

impl Cleanup {
    fn compile(spec: &ValueCleanup) -> Self {
        Self {
            trim_start: spec.trim_start.chars().collect(),
            pattern: spec.pattern.as_deref().and_then(|p| Regex::new(p).ok()),
        }
    }

    fn apply(&self, value: String) -> String {
        let trimmed = value.trim_start_matches(self.trim_start.as_slice()).trim();
        match self.pattern.as_ref().and_then(|re| re.find(trimmed)) {
            Some(m) => m.as_str().to_string(),
            None => trimmed.to_string(),
        }
    }
}

impl StructuredContainers {
    pub fn from_layout(layout: &ProfileLayout) -> Self {
        Self {
            region: Selector::parse(&layout.region_selector).ok(),
            containers: layout
                .containers
                .iter()
                .filter_map(|c| Selector::parse(&c.selector).ok().map(|s| (c.shape, s)))
                .collect(),
            tags: layout
                .tag_selector
                .as_deref()
                .and_then(|s| Selector::parse(s).ok()),
            cleanup: layout
                .cleanup
                .iter()
                .map(|(field, spec)| (*field, Cleanup::compile(spec)))
                .collect(),
            dictionary: layout.dictionary.clone(),
        }
    }

    fn assign(&self, label: &str, value: String, pending: &[FieldKey], found: &mut FieldMap) {
        if label.is_empty() || value.is_empty() {
            return;
        }
        let hits: Vec<FieldKey> = self
            .dictionary
            .fields()
            .filter(|f| self.dictionary.label_matches(*f, label))
            .collect();
        let Some(field) = hits.first().copied() else {
            debug!(label, "label matches no field");
            return;
        };
        if hits.len() > 1 {
            debug!(label, ?hits, "label matches several fields; keeping the first");
        }
        let value = match self.cleanup.get(&field) {
            Some(cleanup) => cleanup.apply(value),
            None => value,
        };
        if !value.is_empty() && pending.contains(&field) && !found.contains_key(&field) {
            found.insert(field, value);
        }
    }
}

impl FieldStrategy for StructuredContainers {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, ctx: &ExtractionContext, pending: &[FieldKey]) -> FieldMap {
        let mut found = FieldMap::new();

        let region = self
            .region
            .as_ref()
            .and_then(|sel| ctx.document().select(sel).next());
        let Some(region) = region else {
            debug!("no profile region on page");
            return found;
        };

        for (shape, selector) in &self.containers {
            for container in matching(region, selector) {
                let pairs = match shape {
                    ContainerShape::DefinitionList => definition_pairs(container),
                    ContainerShape::Table => table_pairs(container),
                };
                for (label, value) in pairs {
                    self.assign(&label, value, pending, &mut found);
                }
            }
        }

        if let Some(tags) = &self.tags {
            let genre = region
                .select(tags)
                .map(|el| collapse_text(Some(el)))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            if !genre.is_empty() && pending.contains(&FieldKey::Genre) {
                found.insert(FieldKey::Genre, genre);
            }
        }

        found
    }
}

/// `region` itself when it matches, then every matching descendant.
fn matching<'a>(
    region: ElementRef<'a>,
    selector: &'a Selector,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    std::iter::once(region)
        .filter(move |r| selector.matches(r))
        .chain(region.select(selector))
}

/// Each `<dt>` paired with the `<dd>` that follows it, stopping at the next
/// `<dt>`.
fn definition_pairs(dl: ElementRef<'_>) -> Vec<(String, String)> {
    dl.select(&DT_SEL)
        .map(|dt| {
            let dd = dt
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take_while(|el| el.value().name() != "dt")
                .find(|el| el.value().name() == "dd");
            (collapse_text(Some(dt)), collapse_text(dd))
        })
        .collect()
}

fn table_pairs(table: ElementRef<'_>) -> Vec<(String, String)> {
    table
        .select(&TR_SEL)
        .map(|row| {
            let th = row.select(&TH_SEL).next();
            let td = row.select(&TD_SEL).next();
            (collapse_text(th), collapse_text(td))
        })
        .collect()
}
