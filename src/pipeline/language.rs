//! Weighted language detection. A document can declare its language with a
//! lang: value; otherwise it is guessed from a corpus of field text, with a
//! second guess over config-designated high-signal fields breaking the call
//! when it is more confident.

use tracing::info;
use whatlang::Lang;

use crate::config::Config;
use crate::record::{visit_strings, Record};
use crate::text;

pub fn tag_languages(records: &mut [Record], config: &Config) {
    let suffixes: Vec<String> =
        config.language_all.iter().map(|lang| format!("-{lang}")).collect();

    for record in records.iter_mut() {
        if record.lang.is_some() {
            continue;
        }

        let mut corpus = String::new();
        let mut weighted = String::new();
        let push = |buf: &mut String, s: &str| {
            if text::is_machine_token(s) {
                return;
            }
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(s);
        };

        push(&mut corpus, &record.title);
        for (key, value) in &record.fields {
            if suffixes.iter().any(|suffix| key.ends_with(suffix.as_str())) {
                continue;
            }
            visit_strings(value, &mut |s| push(&mut corpus, s));
            if config.weighted_keys.contains(key) {
                visit_strings(value, &mut |s| push(&mut weighted, s));
            }
        }
        let corpus = corpus.replace('\n', " ");
        let weighted = weighted.replace('\n', " ");

        let guess = whatlang::detect(&corpus);
        let guess_weighted = if weighted.chars().count() > config.weighted_corpus_min {
            whatlang::detect(&weighted)
        } else {
            None
        };

        // Strictly higher confidence wins when the guesses disagree; an exact
        // tie between different languages or a failed detection falls back to
        // the default language.
        let lang = match (guess, guess_weighted) {
            (Some(g), Some(w)) => {
                if g.lang() == w.lang() {
                    Some(g.lang())
                } else if w.confidence() > g.confidence() {
                    Some(w.lang())
                } else if g.confidence() > w.confidence() {
                    Some(g.lang())
                } else {
                    None
                }
            }
            (Some(g), None) => Some(g.lang()),
            (None, Some(w)) => Some(w.lang()),
            (None, None) => None,
        };

        let code = lang.map(iso639_1).unwrap_or(config.language_default.as_str());
        record.lang = Some(code.to_string());
        info!("language: guessed {} for {:?}", code, record.title);
    }
}

/// Two-letter code for a detected language, matching the codes used in config
/// language sets and key suffixes. Languages without a two-letter code keep
/// their three-letter one.
fn iso639_1(lang: Lang) -> &'static str {
    match lang.code() {
        "arb" => "ar",
        "aze" => "az",
        "bel" => "be",
        "ben" => "bn",
        "bul" => "bg",
        "cat" => "ca",
        "ces" => "cs",
        "cmn" => "zh",
        "dan" => "da",
        "deu" => "de",
        "ell" => "el",
        "eng" => "en",
        "epo" => "eo",
        "est" => "et",
        "fin" => "fi",
        "fra" => "fr",
        "heb" => "he",
        "hin" => "hi",
        "hrv" => "hr",
        "hun" => "hu",
        "ind" => "id",
        "ita" => "it",
        "jpn" => "ja",
        "kat" => "ka",
        "kor" => "ko",
        "lav" => "lv",
        "lit" => "lt",
        "mar" => "mr",
        "mkd" => "mk",
        "nld" => "nl",
        "nob" => "nb",
        "pes" => "fa",
        "pol" => "pl",
        "por" => "pt",
        "ron" => "ro",
        "rus" => "ru",
        "slk" => "sk",
        "slv" => "sl",
        "spa" => "es",
        "srp" => "sr",
        "swe" => "sv",
        "tgl" => "tl",
        "tha" => "th",
        "tur" => "tr",
        "ukr" => "uk",
        "urd" => "ur",
        "vie" => "vi",
        "zul" => "zu",
        other => other,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Provenance, Record};
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        Record {
            kind: "tactic".to_string(),
            slug: "x".to_string(),
            title: "X".to_string(),
            lang: None,
            rev: None,
            translations: Default::default(),
            provenance: Provenance::default(),
            fields: fields.as_object().unwrap().clone(),
            fresh: true,
        }
    }

    fn config() -> Config {
        Config::resolve(
            "language-default: en\n[language-all]\n* en\n* es\n[]\n\
             [language-detection-weighted-keys]\n* what\n[]\n",
        )
        .unwrap()
    }

    #[test]
    fn declared_language_skips_detection() {
        let mut records = vec![record(json!({}))];
        records[0].lang = Some("ar".to_string());
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("ar"));
    }

    #[test]
    fn english_corpus_is_tagged_en() {
        let mut records = vec![record(json!({
            "what": "A coordinated withdrawal of economic support from a company \
                     or institution, sustained until the demands are met."
        }))];
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("en"));
    }

    #[test]
    fn spanish_corpus_is_tagged_es() {
        let mut records = vec![record(json!({
            "what": "Una retirada coordinada del apoyo económico a una empresa \
                     o institución, sostenida hasta que se cumplan las demandas."
        }))];
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("es"));
    }

    #[test]
    fn empty_corpus_falls_back_to_default() {
        let mut records = vec![record(json!({}))];
        records[0].title = String::new();
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("en"));
    }

    #[test]
    fn machine_tokens_are_excluded_from_the_corpus() {
        let mut records = vec![record(json!({
            "learn-more": ["https://ejemplo.example/articulo", "foto.jpg"],
            "what": "Una huelga general convocada por los sindicatos del país \
                     para exigir mejores condiciones de trabajo para todos."
        }))];
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("es"));
    }

    #[test]
    fn suffixed_keys_do_not_pollute_detection() {
        let mut records = vec![record(json!({
            "what": "A coordinated withdrawal of economic support from a company \
                     or institution, sustained until the demands are met.",
            "what-es": "Una retirada coordinada del apoyo económico a una empresa."
        }))];
        tag_languages(&mut records, &config());
        assert_eq!(records[0].lang.as_deref(), Some("en"));
    }
}
