use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde_json::{Map, Value};

use crate::aml;

/// Fuzzy similarity floor for relationship and cross-reference resolution.
const DEFAULT_MATCH_THRESHOLD: u8 = 90;
/// Fuzzy similarity floor for absorbing renamed titles.
const DEFAULT_RENAME_THRESHOLD: u8 = 90;
/// Minimum weighted-corpus length before the weighted language guess counts.
const DEFAULT_WEIGHTED_CORPUS_MIN: usize = 20;

/// One content type: singular and plural key names, plus per-language display
/// names used when synthesizing cross-reference link text.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub one: String,
    pub many: String,
    pub names: BTreeMap<String, String>,
}

/// Everything the pipeline stages need, resolved once per run from the config
/// document and passed by reference into every stage. No ambient state.
#[derive(Debug)]
pub struct Config {
    pub language_default: String,
    pub language_all: Vec<String>,
    pub weighted_keys: HashSet<String>,
    pub published_filename: Regex,
    pub ignore_folder: Regex,
    pub synonyms: BTreeMap<String, String>,
    pub plural_keys: BTreeMap<String, String>,
    pub plural_separator: Regex,
    pub markdown_fields: Vec<String>,
    /// Declared order decides type detection priority.
    pub types: Vec<TypeSpec>,
    pub plural_name_for_type: BTreeMap<String, String>,
    pub singular_name_for_type: BTreeMap<String, String>,
    /// Forward relationship fields and the type they point at ("any" matches
    /// every type).
    pub forward: Vec<(String, String)>,
    /// Groups of two-way fields; each group also drives backward propagation.
    pub backward: Vec<BTreeMap<String, String>>,
    /// Historical title renames, old to new.
    pub renamed: BTreeMap<String, String>,
    /// Cross-reference templates keyed by language code, plus "link" for
    /// author-supplied link text. Placeholders: {type}, {title}, {slug}.
    pub xref_formats: BTreeMap<String, String>,
    pub slug_allow: String,
    pub match_threshold: u8,
    pub rename_threshold: u8,
    pub weighted_corpus_min: usize,
    raw: Map<String, Value>,
}

impl Config {
    /// Parse the config document, apply defaults and derive the lookup
    /// tables. This is the only fatal path in the pipeline: without a type
    /// and relationship schema nothing downstream can run.
    pub fn resolve(text: &str) -> Result<Config> {
        let raw = aml::parse(text);

        let language_default = get_str(&raw, "language-default").unwrap_or("en").to_string();
        let mut language_all: Vec<String> = get_str_list(&raw, "language-all");
        if language_all.is_empty() {
            language_all.push(language_default.clone());
        }
        let weighted_keys: HashSet<String> =
            get_str_list(&raw, "language-detection-weighted-keys").into_iter().collect();

        let published_filename = compile(&raw, "published-filename-regex", r"\bDONE\b")?;
        let ignore_folder = compile(&raw, "ignore-folder-regex", r"^$")?;
        let plural_separator =
            compile(&raw, "plural-separator-regex", r"(?:\s*,|\s+and|\s+&)\s+")?;

        // Key transformations have to account for language suffixes, so every
        // rename table also carries suffixed copies per configured language.
        let mut synonyms = get_str_map(&raw, "synonyms");
        let mut plural_keys = get_str_map(&raw, "plural-keys");
        add_language_suffixes(&mut synonyms, &language_all);
        add_language_suffixes(&mut plural_keys, &language_all);

        let markdown_fields = get_str_list(&raw, "markdown");

        // Content type information comes from every types-* key, in declared
        // order.
        let mut types: Vec<TypeSpec> = Vec::new();
        for (key, value) in &raw {
            if !key.starts_with("types-") {
                continue;
            }
            let Some(entries) = value.as_array() else { continue };
            for entry in entries {
                let Some(obj) = entry.as_object() else { continue };
                let Some(one) = obj.get("one").and_then(Value::as_str) else { continue };
                let many = obj.get("many").and_then(Value::as_str).unwrap_or(one);
                let names = obj
                    .iter()
                    .filter(|(k, _)| language_all.contains(k))
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                types.push(TypeSpec {
                    one: one.to_string(),
                    many: many.to_string(),
                    names,
                });
            }
        }
        let plural_name_for_type =
            types.iter().map(|t| (t.one.clone(), t.many.clone())).collect();
        let singular_name_for_type =
            types.iter().map(|t| (t.many.clone(), t.one.clone())).collect();

        // Relationships: one-way* keys declare forward fields, two-way* keys
        // declare forward fields that also propagate backward as a group.
        let mut forward: Vec<(String, String)> = Vec::new();
        let mut backward: Vec<BTreeMap<String, String>> = Vec::new();
        for (key, value) in &raw {
            if !(key.starts_with("one-way") || key.starts_with("two-way")) {
                continue;
            }
            let Some(obj) = value.as_object() else { continue };
            let group: BTreeMap<String, String> = obj
                .iter()
                .filter_map(|(f, t)| t.as_str().map(|t| (f.clone(), t.to_string())))
                .collect();
            for (field, ty) in &group {
                let existing = forward.iter().find(|(f, _)| f == field).map(|(_, t)| t.clone());
                match existing {
                    Some(t) if t != *ty => bail!(
                        "config: relationship field \"{}\" maps to both \"{}\" and \"{}\"",
                        field,
                        t,
                        ty
                    ),
                    Some(_) => {}
                    None => forward.push((field.clone(), ty.clone())),
                }
            }
            if key.starts_with("two-way") {
                backward.push(group);
            }
        }

        let renamed = raw
            .get("renamed-modules")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        let obj = e.as_object()?;
                        Some((
                            obj.get("old")?.as_str()?.to_string(),
                            obj.get("new")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut xref_formats: BTreeMap<String, String> = BTreeMap::new();
        for lang in &language_all {
            xref_formats
                .insert(lang.clone(), "(see: [{type}: {title}](/tool/{slug})".to_string());
        }
        xref_formats.insert("link".to_string(), "[{title}](/tool/{slug})".to_string());
        if let Some(overrides) = raw.get("xref-format-strings").and_then(Value::as_object) {
            for (k, v) in overrides {
                if let Some(s) = v.as_str() {
                    xref_formats.insert(k.clone(), s.to_string());
                }
            }
        }

        let slug_allow = get_str(&raw, "slug-allow-chars").unwrap_or("").to_string();
        let match_threshold =
            get_number(&raw, "fuzzy-match-threshold").unwrap_or(DEFAULT_MATCH_THRESHOLD as u64)
                as u8;
        let rename_threshold =
            get_number(&raw, "rename-match-threshold").unwrap_or(DEFAULT_RENAME_THRESHOLD as u64)
                as u8;
        let weighted_corpus_min = get_number(&raw, "language-corpus-min-chars")
            .unwrap_or(DEFAULT_WEIGHTED_CORPUS_MIN as u64) as usize;

        Ok(Config {
            language_default,
            language_all,
            weighted_keys,
            published_filename,
            ignore_folder,
            synonyms,
            plural_keys,
            plural_separator,
            markdown_fields,
            types,
            plural_name_for_type,
            singular_name_for_type,
            forward,
            backward,
            renamed,
            xref_formats,
            slug_allow,
            match_threshold,
            rename_threshold,
            weighted_corpus_min,
            raw,
        })
    }

    /// Display name for a type in a given language, falling back to the
    /// singular key name.
    pub fn type_name<'a>(&'a self, lang: &str, kind: &'a str) -> &'a str {
        self.types
            .iter()
            .find(|t| t.one == kind)
            .map(|t| t.names.get(lang).map(String::as_str).unwrap_or(t.one.as_str()))
            .unwrap_or(kind)
    }

    /// The config as a storable document under a fixed id.
    pub fn to_doc(&self) -> Value {
        let mut m = self.raw.clone();
        m.insert("type".to_string(), Value::String("config".to_string()));
        m.insert("slug".to_string(), Value::String("api".to_string()));
        Value::Object(m)
    }
}

fn get_str<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn get_number(raw: &Map<String, Value>, key: &str) -> Option<u64> {
    get_str(raw, key).and_then(|s| s.trim().parse().ok())
}

/// A list-valued config key; a lone string counts as a one-element list.
fn get_str_list(raw: &Map<String, Value>, key: &str) -> Vec<String> {
    match raw.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

fn get_str_map(raw: &Map<String, Value>, key: &str) -> BTreeMap<String, String> {
    raw.get(key)
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn compile(raw: &Map<String, Value>, key: &str, default: &str) -> Result<Regex> {
    let pattern = get_str(raw, key).unwrap_or(default);
    Regex::new(pattern).with_context(|| format!("config: bad regex for {key}: {pattern:?}"))
}

fn add_language_suffixes(map: &mut BTreeMap<String, String>, langs: &[String]) {
    let base: Vec<(String, String)> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for lang in langs {
        for (k, v) in &base {
            map.insert(format!("{k}-{lang}"), format!("{v}-{lang}"));
        }
    }
}

// ── Tests ──
