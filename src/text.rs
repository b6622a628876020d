use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use tracing::warn;

static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]+").unwrap());

// Matches http/s URLs, emails and 3-character-suffixed filenames
static MACHINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:http|\S+(?:\.[a-z]{3}|@\S+)$)").unwrap());

/// Deterministic slug derivation: transliterate to ASCII, lowercase, drop
/// apostrophes, then collapse every non-word run to a single hyphen.
/// "Women's Rights" becomes "womens-rights", not "women-s-rights".
pub fn slugify(s: &str) -> String {
    slugify_allow(s, "")
}

/// Like [`slugify`] but keeps the characters in `allow` (e.g. ":" for
/// store ids). An invalid `allow` set falls back to the plain slug.
pub fn slugify_allow(s: &str, allow: &str) -> String {
    let s = deunicode::deunicode(s).to_lowercase().replace('\'', "");
    if allow.is_empty() {
        return NON_WORD_RE.replace_all(&s, "-").into_owned();
    }
    match Regex::new(&format!(r"[^\w{}]+", regex::escape(allow))) {
        Ok(re) => re.replace_all(&s, "-").into_owned(),
        Err(_) => {
            warn!("slug: invalid allowed-character set {:?}", allow);
            NON_WORD_RE.replace_all(&s, "-").into_owned()
        }
    }
}

/// True for strings that carry no linguistic signal: URLs, emails and
/// filenames with a 3-letter extension.
pub fn is_machine_token(s: &str) -> bool {
    MACHINE_RE.is_match(s)
}

/// Typographically adjust parens such that parens within parens become
/// alternating brackets and parens. A nonzero `level` moves all nested
/// parens "down a level" (e.g.: "(hello [world])" --> "[hello (world)]").
pub fn nest_parens(text: &str, level: i32) -> String {
    let mut level = level;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let c = match c {
            '(' | '[' => {
                let adjusted = if level.rem_euclid(2) == 0 { '(' } else { '[' };
                level += 1;
                adjusted
            }
            ')' | ']' => {
                let adjusted = if level.rem_euclid(2) == 0 { ']' } else { ')' };
                level -= 1;
                adjusted
            }
            other => other,
        };
        out.push(c);
    }
    out
}

/// Deduplicate and sort a slug list, ignoring any leading hyphens when
/// ordering.
pub fn sorted_slug_set(slugs: impl IntoIterator<Item = String>) -> Vec<String> {
    let set: BTreeSet<String> = slugs.into_iter().collect();
    let mut v: Vec<String> = set.into_iter().collect();
    v.sort_by(|a, b| a.trim_start_matches('-').cmp(b.trim_start_matches('-')));
    v
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
];

/// Parse the hand-typed date formats editors actually use. Returns none
/// rather than guessing when nothing fits.
pub fn parse_date_loose(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_drops_apostrophes_before_collapsing() {
        assert_eq!(slugify("Women's Rights"), "womens-rights");
    }

    #[test]
    fn slug_transliterates() {
        assert_eq!(slugify("Acción No Violenta"), "accion-no-violenta");
        assert_eq!(slugify("Café del Mar"), "cafe-del-mar");
    }

    #[test]
    fn slug_is_idempotent() {
        let once = slugify("General Strike!");
        assert_eq!(slugify(&once), once);
    }

    #[test]
    fn slug_allow_keeps_extra_characters() {
        assert_eq!(slugify_allow("tactic:General Strike", ":"), "tactic:general-strike");
    }

    #[test]
    fn machine_tokens() {
        assert!(is_machine_token("https://example.com/page"));
        assert!(is_machine_token("someone@example.com"));
        assert!(is_machine_token("photo.jpg"));
        assert!(!is_machine_token("a perfectly ordinary sentence"));
    }

    #[test]
    fn nest_parens_alternates() {
        assert_eq!(nest_parens("(hello [world])", 1), "[hello (world)]");
        assert_eq!(nest_parens("plain text", 1), "plain text");
    }

    #[test]
    fn slug_sorting_ignores_leading_hyphen() {
        let sorted = sorted_slug_set(vec![
            "-zeta".to_string(),
            "alpha".to_string(),
            "alpha".to_string(),
            "beta".to_string(),
        ]);
        assert_eq!(sorted, vec!["alpha", "beta", "-zeta"]);
    }

    #[test]
    fn loose_dates() {
        assert!(parse_date_loose("2016-04-12").is_some());
        assert!(parse_date_loose("April 12, 2016").is_some());
        assert!(parse_date_loose("12 April 2016").is_some());
        assert!(parse_date_loose("sometime last spring").is_none());
    }
}
