//! Relationship resolution. Forward fields hold hand-typed titles and are
//! rewritten to slugs; backward groups then complete the link from the other
//! side so related content points both ways even when authored one way.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::matcher::ContentMatcher;
use crate::record::Record;
use crate::text;

pub fn resolve_relationships(records: &mut Vec<Record>, config: &Config) {
    resolve_forward(records, config);
    propagate_backward(records, config);
}

fn resolve_forward(records: &mut Vec<Record>, config: &Config) {
    // Candidate pools are snapshotted per declared type before any field is
    // rewritten; titles and slugs never change during this pass.
    let mut pools: HashMap<&str, (ContentMatcher, Vec<String>)> = HashMap::new();
    for (_, ty) in &config.forward {
        pools.entry(ty.as_str()).or_insert_with(|| {
            let (titles, slugs) = records
                .iter()
                .filter(|r| ty == "any" || r.kind == *ty)
                .map(|r| (r.title.clone(), r.slug.clone()))
                .unzip();
            (
                ContentMatcher::new(titles, &config.renamed, config.rename_threshold),
                slugs,
            )
        });
    }

    for (field, ty) in &config.forward {
        let (matcher, slugs) = &pools[ty.as_str()];
        for record in records.iter_mut() {
            let Some(value) = record.fields.get(field).cloned() else { continue };
            match value {
                Value::Array(items) => {
                    let mut resolved = Vec::new();
                    for title in items.iter().filter_map(Value::as_str) {
                        match matcher.find(title, config.match_threshold) {
                            Some(i) => resolved.push(slugs[i].clone()),
                            None => warn!(
                                "relation: {} has no {} match for {:?} in {:?}",
                                record.id(),
                                ty,
                                title,
                                field
                            ),
                        }
                    }
                    let resolved = text::sorted_slug_set(resolved);
                    if resolved.is_empty() {
                        record.fields.remove(field);
                    } else {
                        record.fields.insert(
                            field.clone(),
                            Value::Array(resolved.into_iter().map(Value::String).collect()),
                        );
                    }
                }
                Value::String(title) => match matcher.find(&title, config.match_threshold) {
                    Some(i) => {
                        record.fields.insert(field.clone(), Value::String(slugs[i].clone()));
                    }
                    None => {
                        warn!(
                            "relation: {} has no {} match for {:?} in {:?}",
                            record.id(),
                            ty,
                            title,
                            field
                        );
                        record.fields.remove(field);
                    }
                },
                _ => {}
            }
        }
    }
}

fn propagate_backward(records: &mut [Record], config: &Config) {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        index.insert((record.kind.clone(), record.slug.clone()), i);
    }

    // Collect every (target, back-field, slug) first; applying while walking
    // would mean mutating records other than the one being visited.
    let mut pushes: Vec<(usize, String, String)> = Vec::new();
    for group in &config.backward {
        let back_field_for_type: HashMap<&str, &str> =
            group.iter().map(|(field, ty)| (ty.as_str(), field.as_str())).collect();
        for record in records.iter() {
            let Some(back_field) = back_field_for_type.get(record.kind.as_str()) else {
                continue;
            };
            for (field, ty) in group {
                let Some(value) = record.fields.get(field) else { continue };
                for slug in slug_list(value) {
                    if let Some(&target) = index.get(&(ty.clone(), slug.to_string())) {
                        pushes.push((target, back_field.to_string(), record.slug.clone()));
                    }
                }
            }
        }
    }

    for (target, field, slug) in pushes {
        let updated = match records[target].fields.get(&field) {
            None => vec![slug],
            Some(Value::String(existing)) => {
                text::sorted_slug_set([existing.clone(), slug])
            }
            Some(Value::Array(items)) => {
                let mut all: Vec<String> =
                    items.iter().filter_map(Value::as_str).map(str::to_string).collect();
                all.push(slug);
                text::sorted_slug_set(all)
            }
            Some(_) => continue,
        };
        records[target].fields.insert(
            field,
            Value::Array(updated.into_iter().map(Value::String).collect()),
        );
    }
}

fn slug_list(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

// ── Tests ──
