//! Translation merging. Detached translated documents and language-suffixed
//! keys both end up inside a `translations` map on the default-language
//! record; translated documents disappear as standalone entities.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::aml;
use crate::config::Config;
use crate::matcher::ContentMatcher;
use crate::record::{deep_merge, Record, Translation};

/// Merge all non-default-language records into their canonical counterparts.
/// Running this on already-merged output is a no-op: no suffixed keys remain
/// and there are no translated records left to absorb.
pub fn merge_translations(records: Vec<Record>, config: &Config) -> Vec<Record> {
    let default = config.language_default.as_str();

    let mut primaries: Vec<Record> = Vec::new();
    let mut translated: Vec<Record> = Vec::new();
    for record in records {
        if record.lang.as_deref() == Some(default) {
            primaries.push(record);
        } else {
            translated.push(record);
        }
    }

    let mut primary_by_type: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, record) in primaries.iter().enumerate() {
        primary_by_type.entry(record.kind.clone()).or_default().push(i);
    }

    // Each translated document names its default-language counterpart; the
    // reference is hand-typed, so it is fuzzy matched within the same type.
    let mut matchers: BTreeMap<String, ContentMatcher> = BTreeMap::new();
    for record in translated {
        let declared = record
            .fields
            .get("default-language-content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let Some(indexes) = primary_by_type.get(&record.kind) else {
            warn!(
                "skip: {:?} can't find default language version {:?}",
                record.title, declared
            );
            continue;
        };
        let matcher = matchers.entry(record.kind.clone()).or_insert_with(|| {
            ContentMatcher::new(
                indexes.iter().map(|&i| primaries[i].title.clone()).collect(),
                &config.renamed,
                config.rename_threshold,
            )
        });
        let Some(hit) = matcher.find(&declared, config.match_threshold) else {
            warn!(
                "skip: {:?} can't find default language version {:?}",
                record.title, declared
            );
            continue;
        };
        let target = indexes[hit];
        let Some(lang) = record.lang.clone() else { continue };
        if lang == default {
            continue;
        }
        info!("merge: {} ({}) => {}", record.title, lang, primaries[target].title);
        primaries[target].translations.insert(lang, absorb(record));
    }

    // Integrate language-suffixed keys: the default language overwrites the
    // record itself, every other language deep-merges into its translation.
    for content in primaries.iter_mut() {
        let suffix = format!("-{default}");
        for key in suffixed_keys(&content.fields, &suffix) {
            let Some(value) = content.fields.remove(&key) else { continue };
            if aml::is_empty_value(&value) {
                continue;
            }
            let base = key[..key.len() - suffix.len()].to_string();
            if base == "title" {
                if let Value::String(s) = value {
                    content.title = s;
                }
            } else {
                content.fields.insert(base, value);
            }
        }

        for lang in config.language_all.iter().filter(|l| l.as_str() != default) {
            let suffix = format!("-{lang}");
            let mut incoming: Map<String, Value> = Map::new();
            for key in suffixed_keys(&content.fields, &suffix) {
                let Some(value) = content.fields.remove(&key) else { continue };
                if aml::is_empty_value(&value) {
                    continue;
                }
                incoming.insert(key[..key.len() - suffix.len()].to_string(), value);
            }
            if incoming.is_empty() {
                continue;
            }
            let mut merged: Map<String, Value> = Map::new();
            for (key, value) in incoming {
                // A dictionary-valued field starts from a copy of the default
                // language's value so untranslated subkeys survive.
                match (content.fields.get(&key), &value) {
                    (Some(Value::Object(base)), Value::Object(new)) => {
                        let mut copy = base.clone();
                        deep_merge(&mut copy, new);
                        merged.insert(key, Value::Object(copy));
                    }
                    _ => {
                        merged.insert(key, value);
                    }
                }
            }
            let translation = content.translations.entry(lang.clone()).or_default();
            for (key, value) in merged {
                translation.fields.insert(key, value);
            }
        }

        // A canonical record never carries a translation in its own language
        content.translations.remove(default);
    }

    primaries
}

/// A translated record stored whole under the canonical record, minus
/// provenance, which never appears inside translations.
fn absorb(record: Record) -> Translation {
    let fresh = record.fresh;
    let mut fields = record.fields;
    fields.insert("title".to_string(), Value::String(record.title));
    fields.insert("slug".to_string(), Value::String(record.slug));
    if let Some(lang) = record.lang {
        fields.insert("lang".to_string(), Value::String(lang));
    }
    Translation { fields, fresh }
}

fn suffixed_keys(fields: &Map<String, Value>, suffix: &str) -> Vec<String> {
    fields.keys().filter(|k| k.ends_with(suffix)).cloned().collect()
}

// ── Tests ──
