//! Fuzzy title matching. Reference fields are written by hand, so every
//! lookup must tolerate spelling variance, word reordering and historical
//! renames.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use tracing::info;

/// Similarity score in [0, 100]: the best of a character-level indel ratio,
/// a normalized Levenshtein ratio and a token-set comparison that forgives
/// word order.
pub fn score(a: &str, b: &str) -> u8 {
    let a_n = normalize(a);
    let b_n = normalize(b);
    if a_n.is_empty() || b_n.is_empty() {
        return 0;
    }

    let plain = indel_ratio(&a_n, &b_n);
    let lev = (strsim::normalized_levenshtein(&a_n, &b_n) * 100.0).round() as u8;

    let ta = tokens(&a_n);
    let tb = tokens(&b_n);
    let inter: Vec<&str> =
        ta.intersection(&tb).map(String::as_str).collect();
    let diff_a: Vec<&str> = ta.difference(&tb).map(String::as_str).collect();
    let diff_b: Vec<&str> = tb.difference(&ta).map(String::as_str).collect();
    let s0 = inter.join(" ");
    let s1 = join_parts(&s0, &diff_a);
    let s2 = join_parts(&s0, &diff_b);
    let token_set = indel_ratio(&s0, &s1)
        .max(indel_ratio(&s0, &s2))
        .max(indel_ratio(&s1, &s2));

    plain.max(lev).max(token_set)
}

/// Highest-scoring candidate at or above `threshold`; ties keep the earliest.
pub fn best_match<'a, I>(query: &str, candidates: I, threshold: u8) -> Option<(usize, u8)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, u8)> = None;
    for (i, candidate) in candidates.into_iter().enumerate() {
        let s = score(query, candidate);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best.filter(|&(_, s)| s >= threshold)
}

/// A matcher over one fixed candidate set. Lookups are cached per query; the
/// fingerprint is a content hash of the candidate titles, so a mutated set
/// means building a new matcher rather than silently reusing stale entries.
pub struct ContentMatcher {
    titles: Vec<String>,
    fingerprint: u64,
    renames: BTreeMap<String, String>,
    rename_threshold: u8,
    cache: RefCell<HashMap<(String, u8), Option<usize>>>,
    rename_logged: RefCell<HashSet<String>>,
}

impl ContentMatcher {
    pub fn new(
        titles: Vec<String>,
        renames: &BTreeMap<String, String>,
        rename_threshold: u8,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        titles.hash(&mut hasher);
        let fingerprint = hasher.finish();
        ContentMatcher {
            titles,
            fingerprint,
            renames: renames.clone(),
            rename_threshold,
            cache: RefCell::new(HashMap::new()),
            rename_logged: RefCell::new(HashSet::new()),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn title(&self, idx: usize) -> &str {
        &self.titles[idx]
    }

    /// Resolve a hand-typed name to a candidate index, absorbing historical
    /// renames first.
    pub fn find(&self, name: &str, threshold: u8) -> Option<usize> {
        let key = (name.to_string(), threshold);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return *cached;
        }

        let mut name = name.to_string();
        if !self.renames.is_empty() {
            let keys: Vec<&str> = self.renames.keys().map(String::as_str).collect();
            if let Some((i, _)) = best_match(&name, keys.iter().copied(), self.rename_threshold) {
                let renamed = &self.renames[keys[i]];
                if self.rename_logged.borrow_mut().insert(name.clone()) {
                    info!("renamed: reference changed from {:?} to {:?}", name, renamed);
                }
                name = renamed.clone();
            }
        }

        let hit = best_match(&name, self.titles.iter().map(String::as_str), threshold)
            .map(|(i, _)| i);
        self.cache.borrow_mut().insert(key, hit);
        hit
    }
}

// Lowercase, strip everything but letters/digits to spaces, collapse runs.
fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn join_parts(base: &str, extra: &[&str]) -> String {
    let mut out = base.to_string();
    for part in extra {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

// Ratio of the longest common subsequence against both lengths, the usual
// sequence-matcher formulation.
fn indel_ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let lcs = lcs_len(&a, &b);
    ((200.0 * lcs as f64) / ((a.len() + b.len()) as f64)).round() as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb { prev[j] + 1 } else { row[j].max(prev[j + 1]) };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

// ── Tests ──
