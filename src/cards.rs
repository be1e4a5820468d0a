//! Listing-page card collection and run-level de-duplication.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::models::Card;
use crate::normalize::{background_image_url, collapse_text, extract_leading_digits, resolve_url};
use crate::source::CardLayout;

static ANCHOR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static STYLE_URL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[style*="url("]"#).unwrap());

const IMG_ATTRS: &[&str] = &["src", "data-src", "data-original"];

/// Unique cards plus what was dropped on the way.
#[derive(Debug, Default)]
pub struct CardBatch {
    pub cards: Vec<Card>,
    pub seen: usize,
    pub duplicates: usize,
    pub unresolvable: usize,
    pub incomplete: usize,
}

pub struct CardCollector {
    card_selectors: Vec<Selector>,
    link_fragments: Vec<String>,
    name: Option<Selector>,
    comment: Option<Selector>,
    link: Option<Selector>,
    thumbnail: Option<Selector>,
    age: Option<Selector>,
    require_thumbnail_and_comment: bool,
}

fn compile(selector: Option<&str>) -> Option<Selector> {
    selector.and_then(|s| Selector::parse(s).ok())
}

impl CardCollector {
    pub fn from_layout(layout: &CardLayout) -> Self {
        Self {
            card_selectors: layout
                .card_selectors
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
            link_fragments: layout.link_fragments.clone(),
            name: compile(Some(&layout.name_selector)),
            comment: compile(layout.comment_selector.as_deref()),
            link: compile(layout.link_selector.as_deref()),
            thumbnail: compile(layout.thumbnail_selector.as_deref()),
            age: compile(layout.age_selector.as_deref()),
            require_thumbnail_and_comment: layout.require_thumbnail_and_comment,
        }
    }

    /// Read every card on the listing page. Cards without an absolute
    /// http(s) detail URL, or repeating one already seen, are dropped here
    /// and never reach extraction.
    pub fn collect(&self, html: &str, base: &Url) -> CardBatch {
        let document = Html::parse_document(html);
        let mut batch = CardBatch::default();
        let mut seen_urls = HashSet::new();

        for element in self.card_elements(&document) {
            batch.seen += 1;
            let card = self.read_card(element, base);

            if self.require_thumbnail_and_comment
                && (card.thumbnail_url.is_empty() || card.comment.is_empty())
            {
                batch.incomplete += 1;
                continue;
            }
            if !card.detail_url.starts_with("http") {
                debug!(name = %card.name, "card without a usable detail URL");
                batch.unresolvable += 1;
                continue;
            }
            if !seen_urls.insert(card.detail_url.clone()) {
                debug!(url = %card.detail_url, "duplicate card");
                batch.duplicates += 1;
                continue;
            }
            batch.cards.push(card);
        }

        batch
    }

    /// First selector with any match supplies every card; results from
    /// different selectors are never merged.
    fn card_elements<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.card_selectors {
            let found: Vec<_> = document.select(selector).collect();
            if !found.is_empty() {
                return found;
            }
        }
        if self.link_fragments.is_empty() {
            return Vec::new();
        }
        document
            .select(&ANCHOR_SEL)
            .filter(|a| {
                let href = a.value().attr("href").unwrap_or("");
                self.link_fragments.iter().any(|f| href.contains(f.as_str()))
            })
            .collect()
    }

    fn first<'a>(card: ElementRef<'a>, selector: Option<&Selector>) -> Option<ElementRef<'a>> {
        selector.and_then(|sel| card.select(sel).next())
    }

    fn read_card(&self, card: ElementRef<'_>, base: &Url) -> Card {
        let name = collapse_text(Self::first(card, self.name.as_ref()));
        let comment = collapse_text(Self::first(card, self.comment.as_ref()));
        let age_hint = Self::first(card, self.age.as_ref())
            .map(|el| extract_leading_digits(&collapse_text(Some(el))))
            .unwrap_or_default();

        Card {
            name,
            thumbnail_url: self.thumbnail(card, base).unwrap_or_default(),
            detail_url: self.detail_url(card, base).unwrap_or_default(),
            comment,
            age_hint,
        }
    }

    fn detail_url(&self, card: ElementRef<'_>, base: &Url) -> Option<String> {
        let href_of = |el: ElementRef<'_>| el.value().attr("href").map(str::to_string);

        let href = Self::first(card, self.link.as_ref())
            .and_then(href_of)
            .or_else(|| (card.value().name() == "a").then(|| href_of(card)).flatten())
            .or_else(|| card.select(&ANCHOR_SEL).next().and_then(href_of))?;
        resolve_url(base, &href)
    }

    fn thumbnail(&self, card: ElementRef<'_>, base: &Url) -> Option<String> {
        if let Some(holder) = Self::first(card, self.thumbnail.as_ref()) {
            let url = if holder.value().name() == "img" {
                image_source(holder, base)
            } else {
                holder
                    .value()
                    .attr("style")
                    .and_then(|style| background_image_url(style, base))
            };
            if url.is_some() {
                return url;
            }
        }

        if let Some(url) = card.select(&IMG_SEL).next().and_then(|img| image_source(img, base)) {
            return Some(url);
        }

        std::iter::once(card)
            .filter(|c| STYLE_URL_SEL.matches(c))
            .chain(card.select(&STYLE_URL_SEL))
            .find_map(|el| {
                el.value()
                    .attr("style")
                    .and_then(|style| background_image_url(style, base))
            })
    }
}

fn image_source(img: ElementRef<'_>, base: &Url) -> Option<String> {
    IMG_ATTRS
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .find(|v| !v.trim().is_empty())
        .and_then(|src| resolve_url(base, src))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{angel_live, chatpia, madam_live};

    fn base() -> Url {
        Url::parse("https://example.jp/").unwrap()
    }

    #[test]
    fn test_duplicate_detail_urls_collapse() {
        let html = r#"
            <div class="cast-box"><h3>Aoi</h3><a href="/profile/1">more</a></div>
            <div class="cast-box"><p class="name">Aoi again</p><img src="/a.jpg"><a href="https://example.jp/profile/1">x</a></div>
            <div class="cast-box"><h3>Mio</h3><a href="/profile/2">more</a></div>
        "#;
        let batch = CardCollector::from_layout(&madam_live().cards).collect(html, &base());

        assert_eq!(batch.seen, 3);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.cards.len(), 2);
        assert_eq!(batch.cards[0].name, "Aoi");
        assert_eq!(batch.cards[0].detail_url, "https://example.jp/profile/1");
        assert_eq!(batch.cards[1].detail_url, "https://example.jp/profile/2");
    }

    #[test]
    fn test_first_matching_card_selector_wins() {
        // `li.cast` comes before `div.card`; the div card must be ignored.
        let html = r#"
            <div class="card"><h3>Ignored</h3><a href="/p/9">x</a></div>
            <ul><li class="cast"><h4>Rin</h4><a href="/p/3">x</a></li></ul>
        "#;
        let batch = CardCollector::from_layout(&madam_live().cards).collect(html, &base());
        assert_eq!(batch.cards.len(), 1);
        assert_eq!(batch.cards[0].name, "Rin");
    }

    #[test]
    fn test_anchor_fallback_by_fragment() {
        let html = r#"<nav><a href="/help">help</a></nav><a href="/girls/55"><h3>Nana</h3></a>"#;
        let batch = CardCollector::from_layout(&madam_live().cards).collect(html, &base());
        assert_eq!(batch.cards.len(), 1);
        assert_eq!(batch.cards[0].detail_url, "https://example.jp/girls/55");
        assert_eq!(batch.cards[0].name, "Nana");
    }

    #[test]
    fn test_background_thumbnail_protocol_relative() {
        let html = r#"<ul><li class="girl-line__item">
            <a class="girl-link" href="/profile?id=4">
              <div class="girl-pic__image" style="background-image:url(//cdn.example/x.jpg)"></div>
              <h3 class="girl-prof__name">Emi</h3>
            </a>
            <div class="girl-comment"><p class="girl-comment__txt">  こんばんは  </p></div>
        </li></ul>"#;
        let batch = CardCollector::from_layout(&angel_live().cards).collect(html, &base());
        let card = &batch.cards[0];

        assert_eq!(card.thumbnail_url, "https://cdn.example/x.jpg");
        assert_eq!(card.detail_url, "https://example.jp/profile?id=4");
        assert_eq!(card.comment, "こんばんは");
    }

    #[test]
    fn test_img_attribute_order() {
        let html = r#"<div class="cast-box"><img data-src="/lazy.jpg" src=""><a href="/p/1">x</a></div>"#;
        let batch = CardCollector::from_layout(&madam_live().cards).collect(html, &base());
        assert_eq!(batch.cards[0].thumbnail_url, "https://example.jp/lazy.jpg");
    }

    #[test]
    fn test_unresolvable_link_dropped() {
        let html = r#"<div class="cast-box"><h3>NoLink</h3></div>
                      <div class="cast-box"><h3>Mail</h3><a href="mailto:x@example.jp">m</a></div>"#;
        let batch = CardCollector::from_layout(&madam_live().cards).collect(html, &base());
        assert!(batch.cards.is_empty());
        assert_eq!(batch.unresolvable, 2);
    }

    #[test]
    fn test_strict_cards_and_age_hint() {
        let html = r#"
            <div class="chatbox_big">
              <div class="pict" style="background:url('//picture.chatpia.jp/1.jpg')"></div>
              <div class="name"><a href="/profile.php?id=1">Kiyomi</a> (53歳)</div>
              <div class="hitokoto">よろしくね</div>
            </div>
            <div class="chatbox_small">
              <div class="name"><a href="/profile.php?id=2">NoComment</a></div>
              <div class="pict" style="background:url(/2.jpg)"></div>
            </div>"#;
        let batch = CardCollector::from_layout(&chatpia().cards).collect(html, &base());

        assert_eq!(batch.incomplete, 1);
        assert_eq!(batch.cards.len(), 1);
        let card = &batch.cards[0];
        assert_eq!(card.name, "Kiyomi");
        assert_eq!(card.age_hint, "53");
        assert_eq!(card.thumbnail_url, "https://picture.chatpia.jp/1.jpg");
        assert_eq!(card.detail_url, "https://example.jp/profile.php?id=1");
    }

    #[test]
    fn test_no_cards_is_empty_not_error() {
        let batch = CardCollector::from_layout(&angel_live().cards).collect("<p>maintenance</p>", &base());
        assert!(batch.cards.is_empty());
        assert_eq!(batch.seen, 0);
    }
}
