//! Cross-reference patching. Editors link between documents with inline
//! `[text](Some Title)` markdown; targets are fuzzy-resolved against every
//! title (translations included) and rewritten to stable slug links. What
//! cannot be resolved degrades to plain text or disappears.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::Config;
use crate::matcher::ContentMatcher;
use crate::record::{map_strings, Record};
use crate::text;

// Detecting nested parens without a proper parser is hopeless; swallowing one
// stray trailing close paren covers the common authoring mistake. Image links
// and absolute or already-rewritten targets are recognized in code and left
// alone.
static XREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\(([^)]+)\)(?:\s*\))?").unwrap());

struct Target {
    slug: String,
    kind: String,
    title: String,
    translated_titles: BTreeMap<String, String>,
}

struct PatchContext<'a> {
    matcher: ContentMatcher,
    /// Candidate index to target record, since several titles can name one
    /// record.
    owner: Vec<usize>,
    targets: Vec<Target>,
    config: &'a Config,
}

/// Rewrite inline links in every markdown field of every fresh record and
/// translation, then strip the fresh markers: after this pass the batch is
/// final.
pub fn patch_references(records: &mut [Record], config: &Config) {
    let mut titles = Vec::new();
    let mut owner = Vec::new();
    let mut targets = Vec::new();
    for record in records.iter() {
        let index = targets.len();
        titles.push(record.title.clone());
        owner.push(index);
        for translation in record.translations.values() {
            if let Some(title) = translation.title() {
                titles.push(title.to_string());
                owner.push(index);
            }
        }
        targets.push(Target {
            slug: record.slug.clone(),
            kind: record.kind.clone(),
            title: record.title.clone(),
            translated_titles: record
                .translations
                .iter()
                .filter_map(|(lang, tr)| {
                    tr.title().map(|t| (lang.clone(), t.to_string()))
                })
                .collect(),
        });
    }
    let context = PatchContext {
        matcher: ContentMatcher::new(titles, &config.renamed, config.rename_threshold),
        owner,
        targets,
        config,
    };

    for record in records.iter_mut() {
        let lang = record.lang.clone().unwrap_or_default();
        if record.fresh && config.language_all.contains(&lang) {
            for field in &config.markdown_fields {
                if let Some(value) = record.fields.get(field) {
                    let patched =
                        map_strings(value, &mut |s| patch_links(s, &lang, &context));
                    record.fields.insert(field.clone(), patched);
                }
            }
        }
        record.fresh = false;

        for (translation_lang, translation) in record.translations.iter_mut() {
            if translation.fresh && config.language_all.contains(translation_lang) {
                for field in &config.markdown_fields {
                    if let Some(value) = translation.fields.get(field) {
                        let patched = map_strings(value, &mut |s| {
                            patch_links(s, translation_lang, &context)
                        });
                        translation.fields.insert(field.clone(), patched);
                    }
                }
            }
            translation.fresh = false;
        }
    }
}

fn patch_links(text_value: &str, lang: &str, context: &PatchContext) -> String {
    let mut out = String::with_capacity(text_value.len());
    let mut last = 0;
    for caps in XREF_RE.captures_iter(text_value) {
        let whole = caps.get(0).unwrap();
        let link_text = &caps[1];
        let target = caps[2].trim();

        // Images, absolute URLs and already-rewritten slug links pass through
        // untouched, which also keeps this pass idempotent.
        if whole.as_str().starts_with('!') || target.starts_with("http") || target.starts_with('/')
        {
            out.push_str(&text_value[last..whole.end()]);
            last = whole.end();
            continue;
        }

        let pre = &text_value[last..whole.start()];
        match context.matcher.find(target, context.config.match_threshold) {
            Some(candidate) => {
                out.push_str(pre);
                let record = &context.targets[context.owner[candidate]];
                if !link_text.is_empty() {
                    out.push_str(&fill(
                        context.config.xref_formats.get("link").map(String::as_str).unwrap_or(""),
                        "",
                        link_text,
                        &record.slug,
                    ));
                } else {
                    // Synthesized text uses the translated title where one
                    // exists, decorated with the type name for that language
                    let title = if lang == context.config.language_default {
                        &record.title
                    } else {
                        record.translated_titles.get(lang).unwrap_or(&record.title)
                    };
                    let title = text::nest_parens(title, 1);
                    let type_name = context.config.type_name(lang, &record.kind).to_uppercase();
                    let template = context
                        .config
                        .xref_formats
                        .get(lang)
                        .map(String::as_str)
                        .unwrap_or("");
                    out.push_str(&fill(template, &type_name, &title, &record.slug));
                }
            }
            None if !link_text.is_empty() => {
                warn!("xref: no match for {:?}, keeping link text", target);
                out.push_str(pre);
                out.push_str(link_text);
            }
            None => {
                warn!("xref: no match for {:?}, removing construct", target);
                out.push_str(pre.trim_end());
            }
        }
        last = whole.end();
    }
    out.push_str(&text_value[last..]);
    out
}

fn fill(template: &str, type_name: &str, title: &str, slug: &str) -> String {
    template
        .replace("{type}", type_name)
        .replace("{title}", title)
        .replace("{slug}", slug)
}

// ── Tests ──
