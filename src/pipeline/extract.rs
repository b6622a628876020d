use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::aml;
use crate::config::Config;
use crate::record::{Provenance, Record};
use crate::source::SourceDocument;
use crate::text;

// Editors separate list entries with blank lines when they remember to;
// prefer that split and only fall back to the separator regex.
static BLANK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\n\s*\n\s*").unwrap());

/// Turn one raw document into a typed content record. Malformed input is
/// skipped with a warning, never an error: a bad document must not abort the
/// batch.
pub fn extract(document: &SourceDocument, config: &Config) -> Option<Record> {
    let mut fields = aml::parse(&document.text);

    // Rename synonymous keys before every other transformation
    for (old_key, new_key) in &config.synonyms {
        if let Some(value) = fields.remove(old_key) {
            fields.insert(new_key.clone(), value);
        }
    }

    // The first configured type whose singular key is present decides the
    // type; its value is the title.
    let spec = config.types.iter().find(|t| fields.contains_key(&t.one));
    let title = spec.and_then(|t| fields.get(&t.one)).and_then(Value::as_str);
    let (Some(spec), Some(title)) = (spec, title) else {
        warn!("skip: {} bad type information", document.id);
        return None;
    };
    let kind = spec.one.clone();
    let title = title.to_string();
    let slug = text::slugify_allow(&title, &config.slug_allow);

    let timestamp = fields
        .get("date")
        .and_then(Value::as_str)
        .and_then(text::parse_date_loose)
        .unwrap_or(document.modified)
        .timestamp_millis();

    let lang = fields.remove("lang").and_then(|v| v.as_str().map(str::to_string));

    // Convert singular keys to plural keys and split their values into lists
    for (plural_key, singular_key) in &config.plural_keys {
        if let Some(single) = fields.get(singular_key).cloned() {
            if !aml::is_empty_value(&single) {
                fields.insert(plural_key.clone(), Value::Array(vec![single]));
                if plural_key != singular_key {
                    fields.remove(singular_key);
                }
            }
        }
        if let Some(Value::String(joined)) = fields.get(plural_key).cloned() {
            let by_blank: Vec<&str> = BLANK_LINE_RE.split(&joined).collect();
            let parts: Vec<&str> = if by_blank.len() > 1 {
                by_blank
            } else {
                config.plural_separator.split(&joined).collect()
            };
            fields.insert(
                plural_key.clone(),
                Value::Array(parts.into_iter().map(|p| Value::String(p.to_string())).collect()),
            );
        }
    }

    info!("extract: {} ({}: {})", document.id, kind, title);
    Some(Record {
        kind,
        slug,
        title,
        lang,
        rev: None,
        translations: Default::default(),
        provenance: Provenance {
            document_id: document.id.clone(),
            document_link: document.link.clone(),
            document_title: document.title.clone(),
            timestamp,
        },
        fields,
        fresh: true,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceDocument;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(text: &str) -> SourceDocument {
        SourceDocument {
            id: "doc-1".to_string(),
            title: "Boycott DONE".to_string(),
            folder: "TACTICS".to_string(),
            text: text.to_string(),
            modified: chrono::Utc.with_ymd_and_hms(2016, 4, 12, 0, 0, 0).unwrap(),
            link: "https://example.org/doc-1".to_string(),
        }
    }

    fn config() -> Config {
        Config::resolve(
            "[types-tool]\none: tactic\nmany: tactics\n[]\n\
             {plural-keys}\nallies: ally\ntags: tag\n{}\n\
             {synonyms}\nauthors: contributed-by\n{}\n",
        )
        .unwrap()
    }

    #[test]
    fn extracts_type_title_and_slug() {
        let record = extract(&doc("tactic: General Strike\nwhat: Everyone stops working\n"), &config())
            .unwrap();
        assert_eq!(record.kind, "tactic");
        assert_eq!(record.title, "General Strike");
        assert_eq!(record.slug, "general-strike");
        assert!(record.fresh);
        assert_eq!(record.provenance.document_id, "doc-1");
    }

    #[test]
    fn slug_is_a_pure_function_of_title() {
        let config = config();
        let a = extract(&doc("tactic: Women's Rights\n"), &config).unwrap();
        let b = extract(&doc("tactic: Women's Rights\nwhat: different body\n"), &config).unwrap();
        assert_eq!(a.slug, "womens-rights");
        assert_eq!(a.slug, b.slug);
    }

    #[test]
    fn unknown_type_is_skipped() {
        assert!(extract(&doc("recipe: Flatbread\n"), &config()).is_none());
        assert!(extract(&doc(""), &config()).is_none());
    }

    #[test]
    fn synonyms_rename_before_type_detection() {
        let record = extract(&doc("tactic: Boycott\nauthors: Ada Lovelace\n"), &config()).unwrap();
        assert!(record.fields.contains_key("contributed-by"));
        assert!(!record.fields.contains_key("authors"));
    }

    #[test]
    fn singular_key_becomes_plural_list() {
        let record = extract(&doc("tactic: Boycott\nally: labor unions\n"), &config()).unwrap();
        assert_eq!(record.fields["allies"], json!(["labor unions"]));
        assert!(!record.fields.contains_key("ally"));
    }

    #[test]
    fn plural_string_prefers_blank_line_split() {
        let config = config();
        let record = extract(
            &doc("tactic: Boycott\nallies: labor unions\n\nstudents\n:end\n"),
            &config,
        )
        .unwrap();
        assert_eq!(record.fields["allies"], json!(["labor unions", "students"]));

        let record =
            extract(&doc("tactic: Boycott\nallies: labor unions, students and teachers\n"), &config)
                .unwrap();
        assert_eq!(
            record.fields["allies"],
            json!(["labor unions", "students", "teachers"])
        );
    }

    #[test]
    fn timestamp_prefers_explicit_date() {
        let config = config();
        let dated = extract(&doc("tactic: Boycott\ndate: 2010-01-02\n"), &config).unwrap();
        assert_eq!(dated.provenance.timestamp, 1_262_390_400_000);

        let undated = extract(&doc("tactic: Boycott\ndate: not a date\n"), &config).unwrap();
        assert_eq!(undated.provenance.timestamp, 1_460_419_200_000);
    }

    #[test]
    fn declared_language_is_kept() {
        let record = extract(&doc("tactic: Boicot\nlang: es\n"), &config()).unwrap();
        assert_eq!(record.lang.as_deref(), Some("es"));
    }
}
