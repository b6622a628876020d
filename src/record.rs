use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Keys owned by the structured part of a record. Everything else in a stored
/// document body belongs to the open extension fields.
const CORE_KEYS: &[&str] = &[
    "_id",
    "type",
    "slug",
    "title",
    "lang",
    "timestamp",
    "translations",
    "document_id",
    "document_link",
    "document_title",
];

/// Where a record came from. Never copied into translations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub document_id: String,
    pub document_link: String,
    pub document_title: String,
    pub timestamp: i64,
}

/// One language's overrides for a canonical record: a partial record kept as
/// an open map. `fresh` mirrors the owning record's marker and is stripped
/// once cross-reference patching has visited the translation.
#[derive(Debug, Clone, Default)]
pub struct Translation {
    pub fields: Map<String, Value>,
    pub fresh: bool,
}

impl Translation {
    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }
}

/// The canonical unit of content: a fixed-schema core plus an open extension
/// map for type-specific fields (plural lists, markdown text, relationship
/// fields).
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: String,
    pub slug: String,
    pub title: String,
    pub lang: Option<String>,
    pub rev: Option<String>,
    pub translations: BTreeMap<String, Translation>,
    pub provenance: Provenance,
    pub fields: Map<String, Value>,
    /// Transient marker for records extracted this run; stripped after
    /// cross-reference patching.
    pub fresh: bool,
}

impl Record {
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind, self.slug)
    }

    /// Serialize to the stored document body. The fresh marker never leaves
    /// the process.
    pub fn to_doc(&self) -> Value {
        let mut m = Map::new();
        for (k, v) in &self.fields {
            m.insert(k.clone(), v.clone());
        }
        m.insert("type".to_string(), Value::String(self.kind.clone()));
        m.insert("slug".to_string(), Value::String(self.slug.clone()));
        m.insert("title".to_string(), Value::String(self.title.clone()));
        if let Some(lang) = &self.lang {
            m.insert("lang".to_string(), Value::String(lang.clone()));
        }
        m.insert("timestamp".to_string(), Value::from(self.provenance.timestamp));
        m.insert("document_id".to_string(), Value::String(self.provenance.document_id.clone()));
        m.insert("document_link".to_string(), Value::String(self.provenance.document_link.clone()));
        m.insert("document_title".to_string(), Value::String(self.provenance.document_title.clone()));
        let translations: Map<String, Value> = self
            .translations
            .iter()
            .map(|(lang, tr)| (lang.clone(), Value::Object(tr.fields.clone())))
            .collect();
        m.insert("translations".to_string(), Value::Object(translations));
        Value::Object(m)
    }

    /// Rebuild a record from a stored document body. Bodies without the core
    /// type/slug/title triple are not content records.
    pub fn from_doc(body: &Value, rev: Option<String>) -> Option<Record> {
        let obj = body.as_object()?;
        let kind = obj.get("type")?.as_str()?.to_string();
        let slug = obj.get("slug")?.as_str()?.to_string();
        let title = obj.get("title")?.as_str()?.to_string();
        let lang = obj.get("lang").and_then(Value::as_str).map(str::to_string);
        let translations = obj
            .get("translations")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(lang, v)| {
                        v.as_object().map(|fields| {
                            (lang.clone(), Translation { fields: fields.clone(), fresh: false })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let provenance = Provenance {
            document_id: obj.get("document_id").and_then(Value::as_str).unwrap_or("").to_string(),
            document_link: obj.get("document_link").and_then(Value::as_str).unwrap_or("").to_string(),
            document_title: obj.get("document_title").and_then(Value::as_str).unwrap_or("").to_string(),
            timestamp: obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        };
        let fields = obj
            .iter()
            .filter(|(k, _)| !CORE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Record {
            kind,
            slug,
            title,
            lang,
            rev,
            translations,
            provenance,
            fields,
            fresh: false,
        })
    }
}

// ── Value tree walks ──

/// Depth-first visit of every string leaf in a value tree.
pub fn visit_strings<'a>(v: &'a Value, f: &mut impl FnMut(&'a str)) {
    match v {
        Value::String(s) => f(s),
        Value::Array(items) => {
            for item in items {
                visit_strings(item, f);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                visit_strings(item, f);
            }
        }
        _ => {}
    }
}

/// Rebuild a value tree with every string leaf passed through `f`. Non-string,
/// non-container values are untouched.
pub fn map_strings(v: &Value, f: &mut impl FnMut(&str) -> String) -> Value {
    match v {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|i| map_strings(i, f)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, i)| (k.clone(), map_strings(i, f))).collect())
        }
        other => other.clone(),
    }
}

/// Recursive map merge: dictionary values merge key by key, everything else
/// overwrites.
pub fn deep_merge(dest: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (k, v) in src {
        let both_maps =
            matches!((dest.get(k), v), (Some(Value::Object(_)), Value::Object(_)));
        if both_maps {
            if let (Some(Value::Object(d)), Value::Object(s)) = (dest.get_mut(k), v) {
                deep_merge(d, s);
            }
        } else {
            dest.insert(k.clone(), v.clone());
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        Record {
            kind: "tactic".to_string(),
            slug: "boycott".to_string(),
            title: "Boycott".to_string(),
            lang: Some("en".to_string()),
            rev: Some("3".to_string()),
            translations: BTreeMap::from([(
                "es".to_string(),
                Translation {
                    fields: Map::from_iter([("title".to_string(), json!("Boicot"))]),
                    fresh: true,
                },
            )]),
            provenance: Provenance {
                document_id: "doc-1".to_string(),
                document_link: "https://example.org/doc-1".to_string(),
                document_title: "Boycott DONE".to_string(),
                timestamp: 1_460_419_200_000,
            },
            fields: Map::from_iter([("what".to_string(), json!("Withdraw support"))]),
            fresh: true,
        }
    }

    #[test]
    fn doc_roundtrip_keeps_shape() {
        let record = sample();
        let doc = record.to_doc();
        assert_eq!(doc["_id"], Value::Null);
        assert_eq!(doc["type"], "tactic");
        assert_eq!(doc["translations"]["es"]["title"], "Boicot");

        let back = Record::from_doc(&doc, Some("3".to_string())).unwrap();
        assert_eq!(back.id(), "tactic:boycott");
        assert_eq!(back.title, record.title);
        assert_eq!(back.fields, record.fields);
        assert_eq!(back.provenance, record.provenance);
        assert!(!back.fresh);
        assert!(!back.translations["es"].fresh);
    }

    #[test]
    fn from_doc_rejects_non_content() {
        assert!(Record::from_doc(&json!({"type": "config", "slug": "api"}), None).is_none());
        assert!(Record::from_doc(&json!("not an object"), None).is_none());
    }

    #[test]
    fn visit_reaches_nested_strings() {
        let v = json!({"a": ["x", {"b": "y"}], "c": 3, "d": "z"});
        let mut seen = Vec::new();
        visit_strings(&v, &mut |s| seen.push(s.to_string()));
        seen.sort();
        assert_eq!(seen, vec!["x", "y", "z"]);
    }

    #[test]
    fn map_strings_leaves_non_strings_alone() {
        let v = json!({"a": ["x", 1], "b": true});
        let mapped = map_strings(&v, &mut |s| s.to_uppercase());
        assert_eq!(mapped, json!({"a": ["X", 1], "b": true}));
    }

    #[test]
    fn deep_merge_preserves_missing_subkeys() {
        let mut dest = json!({"contact": {"email": "a@b.org", "phone": "1"}, "x": 1})
            .as_object()
            .unwrap()
            .clone();
        let src = json!({"contact": {"email": "c@d.org"}, "y": 2}).as_object().unwrap().clone();
        deep_merge(&mut dest, &src);
        assert_eq!(dest["contact"]["email"], "c@d.org");
        assert_eq!(dest["contact"]["phone"], "1");
        assert_eq!(dest["y"], 2);
    }
}
