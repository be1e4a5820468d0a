use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;
use url::Url;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// "(53歳)", "（53）", "(age 53)" and similar age annotations.
static AGE_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[(（][^()（）]*\d+[^()（）]*[)）]").unwrap());

/// Everything that is not a word character, whitespace, kana, kanji, the
/// long-vowel mark, full-width alphanumerics or a hyphen.
static NAME_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\sぁ-ゟ゠-ヿ一-龥々ー０-９Ａ-Ｚａ-ｚ\-]+").unwrap());

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"url\((.*?)\)").unwrap());

// ── Text ─────────────────────────────────────────────────────────────────────

/// Visible text of `node` with runs of whitespace collapsed to one space.
/// A missing node yields an empty string.
pub fn collapse_text(node: Option<ElementRef<'_>>) -> String {
    match node {
        Some(el) => el
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

/// Text held directly by `el`, ignoring descendants.
pub fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| child.value().as_text())
        .flat_map(|text| text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_leading_digits(value: &str) -> String {
    DIGITS_RE
        .find(value)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Strip an age annotation and any symbol that cannot be part of a display
/// name. May return an empty string.
pub fn sanitize_display_name(raw: &str) -> String {
    let without_age = AGE_PAREN_RE.replace_all(raw, "");
    let cleaned = NAME_STRIP_RE.replace_all(&without_age, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── URLs ─────────────────────────────────────────────────────────────────────

/// Resolve `href` against `base`; protocol-relative references always become
/// `https:`.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Url::parse(&format!("https://{}", rest))
            .ok()
            .map(|u| u.to_string());
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Pull the first `url(...)` out of an inline style declaration.
pub fn background_image_url(style: &str, base: &Url) -> Option<String> {
    let caps = CSS_URL_RE.captures(style)?;
    let raw = caps[1].trim().trim_matches(|c| c == '\'' || c == '"');
    resolve_url(base, raw)
}
