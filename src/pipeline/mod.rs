pub mod extract;
pub mod language;
pub mod relations;
pub mod translate;
pub mod xref;

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::Config;
use crate::record::Record;
use crate::source::SourceDocument;

pub struct PipelineCounts {
    pub documents: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub canonical: usize,
    pub translations: usize,
}

impl PipelineCounts {
    pub fn print(&self) {
        println!(
            "Processed {} documents: {} extracted, {} skipped; {} canonical records carrying {} translations.",
            self.documents, self.extracted, self.skipped, self.canonical, self.translations,
        );
    }
}

/// Run the full reconciliation pipeline over one batch of source documents.
/// `existing` carries previously persisted records on incremental runs; a
/// re-extracted document replaces its stored version but keeps the stored
/// revision and translations. All stages run strictly in sequence over the
/// whole batch; nothing is written until the caller persists the result.
pub fn run(
    documents: Vec<SourceDocument>,
    existing: Vec<Record>,
    config: &Config,
) -> (Vec<Record>, PipelineCounts) {
    let total = documents.len();

    // Extraction of one document never depends on another
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );
    let extracted: Vec<Record> = documents
        .par_iter()
        .filter_map(|document| {
            let record = extract::extract(document, config);
            pb.inc(1);
            record
        })
        .collect();
    pb.finish_and_clear();
    let skipped = total - extracted.len();
    let extracted_count = extracted.len();

    // Fold into previously persisted content by source document identity
    let mut by_document_id: BTreeMap<String, Record> = existing
        .into_iter()
        .map(|r| (r.provenance.document_id.clone(), r))
        .collect();
    for mut record in extracted {
        if let Some(previous) = by_document_id.get(&record.provenance.document_id) {
            record.rev = previous.rev.clone();
            record.translations = previous.translations.clone();
        }
        by_document_id.insert(record.provenance.document_id.clone(), record);
    }
    let mut records: Vec<Record> = by_document_id.into_values().collect();

    language::tag_languages(&mut records, config);
    let mut records = translate::merge_translations(records, config);
    relations::resolve_relationships(&mut records, config);
    xref::patch_references(&mut records, config);

    let translations = records.iter().map(|r| r.translations.len()).sum();
    let counts = PipelineCounts {
        documents: total,
        extracted: extracted_count,
        skipped,
        canonical: records.len(),
        translations,
    };
    (records, counts)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(id: &str, title: &str, text: &str) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            title: title.to_string(),
            folder: "CONTENT".to_string(),
            text: text.to_string(),
            modified: chrono::Utc.with_ymd_and_hms(2016, 4, 12, 0, 0, 0).unwrap(),
            link: format!("https://example.org/{id}"),
        }
    }

    fn config() -> Config {
        Config::resolve(
            "language-default: en\n[language-all]\n* en\n* es\n[]\n\
             [types-tool]\none: tactic\nmany: tactics\n[]\n\
             {plural-keys}\nallies: ally\n{}\n\
             {two-way-tools}\nallies: tactic\n{}\n\
             [markdown]\n* what\n[]\n",
        )
        .unwrap()
    }

    #[test]
    fn end_to_end_batch() {
        let documents = vec![
            doc(
                "d1",
                "Labor Unions DONE",
                "tactic: Labor Unions\nlang: en\nwhat: Organized workers acting together.\n",
            ),
            doc(
                "d2",
                "Boycott DONE",
                "tactic: Boycott\nlang: en\n\
                 what: Withdraw support. See [](Labor Unions) for partners.\n\
                 allies: labour union\n",
            ),
            doc(
                "d3",
                "Boicot DONE",
                "tactic: Boicot\nlang: es\ndefault-language-content: Boycott\n",
            ),
        ];
        let (records, counts) = run(documents, Vec::new(), &config());

        assert_eq!(counts.documents, 3);
        assert_eq!(counts.extracted, 3);
        assert_eq!(counts.canonical, 2);
        assert_eq!(counts.translations, 1);

        let boycott = records.iter().find(|r| r.slug == "boycott").unwrap();
        assert_eq!(boycott.fields["allies"], json!(["labor-unions"]));
        assert_eq!(boycott.translations["es"].fields["title"], "Boicot");
        assert!(!boycott.fresh);
        assert!(boycott
            .fields["what"]
            .as_str()
            .unwrap()
            .contains("[TACTIC: Labor Unions](/tool/labor-unions)"));

        // Backward propagation completes the ally link from the other side
        let unions = records.iter().find(|r| r.slug == "labor-unions").unwrap();
        assert_eq!(unions.fields["allies"], json!(["boycott"]));
    }

    #[test]
    fn incremental_run_preserves_revision_and_translations() {
        let config = config();
        let first_docs = vec![
            doc("d1", "Boycott DONE", "tactic: Boycott\nlang: en\n"),
            doc(
                "d2",
                "Boicot DONE",
                "tactic: Boicot\nlang: es\ndefault-language-content: Boycott\n",
            ),
        ];
        let (first, _) = run(first_docs, Vec::new(), &config);
        let mut stored = first[0].clone();
        stored.rev = Some("7".to_string());

        // Re-extract only the canonical document; the detached translation is
        // not in this batch but must survive through the stored record
        let second_docs =
            vec![doc("d1", "Boycott DONE", "tactic: Boycott\nlang: en\nwhat: updated\n")];
        let (second, _) = run(second_docs, vec![stored], &config);

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].rev.as_deref(), Some("7"));
        assert_eq!(second[0].fields["what"], "updated");
        assert_eq!(second[0].translations["es"].fields["title"], "Boicot");
    }

    #[test]
    fn malformed_documents_never_abort_the_batch() {
        let documents = vec![
            doc("d1", "Boycott DONE", "tactic: Boycott\nlang: en\n"),
            doc("d2", "Junk DONE", "complete nonsense with no keys at all\n"),
        ];
        let (records, counts) = run(documents, Vec::new(), &config());
        assert_eq!(records.len(), 1);
        assert_eq!(counts.skipped, 1);
    }
}
