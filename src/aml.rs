//! Best-effort parser for the lightweight key/value markup content editors
//! write in. It understands `key: value` lines, multi-line values terminated
//! by `:end`, `[arrays]` of bullet strings or repeated-key objects, and
//! `{scopes}` of nested keys. Anything it cannot classify is ignored; parsing
//! never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_\-]*)\s*:\s*(.*)$").unwrap());
static ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([A-Za-z0-9_\-]*)\]$").unwrap());
static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\{([A-Za-z0-9_\-]*)\}$").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*\s*(.*)$").unwrap());

// Word processors leave [a]-style annotation markers behind; obliterate all
// of them before parsing.
static ANNOTATION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\[[a-z]\].*$").unwrap());
static ANNOTATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[a-z]\]").unwrap());

struct ArrayCtx {
    key: String,
    strings: Vec<Value>,
    objects: Vec<Value>,
    first_key: Option<String>,
    current: Map<String, Value>,
}

impl ArrayCtx {
    fn new(key: String) -> Self {
        ArrayCtx {
            key,
            strings: Vec::new(),
            objects: Vec::new(),
            first_key: None,
            current: Map::new(),
        }
    }

    fn finish(mut self) -> (String, Value) {
        if !self.current.is_empty() {
            self.objects.push(Value::Object(self.current));
        }
        let items = if self.objects.is_empty() { self.strings } else { self.objects };
        (self.key, Value::Array(items))
    }
}

struct Pending {
    key: String,
    first: String,
    buffer: Vec<String>,
}

pub fn parse(text: &str) -> Map<String, Value> {
    let text = text.replace('\r', "");
    let text = ANNOTATION_LINE_RE.replace_all(&text, "");
    let text = ANNOTATION_RE.replace_all(&text, "");

    let mut root: Map<String, Value> = Map::new();
    let mut scope: Option<(String, Map<String, Value>)> = None;
    let mut array: Option<ArrayCtx> = None;
    let mut pending: Option<Pending> = None;
    let mut skipping = false;

    for raw in text.lines() {
        let line = raw.trim();

        if skipping {
            if line.eq_ignore_ascii_case(":endskip") {
                skipping = false;
            }
            continue;
        }
        if line.eq_ignore_ascii_case(":skip") {
            skipping = true;
            pending = None;
            continue;
        }

        // A value committed at its key line gets upgraded to the full block
        // when an :end shows up before the next structural line.
        if line.eq_ignore_ascii_case(":end") {
            if let Some(p) = pending.take() {
                let mut block = p.first;
                for l in p.buffer {
                    block.push('\n');
                    block.push_str(&l);
                }
                let block = Value::String(block.trim().to_string());
                // Replace the value committed at the key line, wherever it went
                if let Some(ctx) = array.as_mut() {
                    ctx.current.insert(p.key, block);
                } else if let Some((_, map)) = scope.as_mut() {
                    map.insert(p.key, block);
                } else {
                    root.insert(p.key, block);
                }
            }
            continue;
        }

        if let Some(caps) = ARRAY_RE.captures(line) {
            pending = None;
            if let Some(ctx) = array.take() {
                let (key, items) = ctx.finish();
                insert_raw(&mut root, &mut scope, key, items);
            }
            if !caps[1].is_empty() {
                array = Some(ArrayCtx::new(caps[1].to_string()));
            }
            continue;
        }

        if let Some(caps) = SCOPE_RE.captures(line) {
            pending = None;
            if let Some(ctx) = array.take() {
                let (key, items) = ctx.finish();
                insert_raw(&mut root, &mut scope, key, items);
            }
            if let Some((key, map)) = scope.take() {
                root.insert(key, Value::Object(map));
            }
            if !caps[1].is_empty() {
                scope = Some((caps[1].to_string(), Map::new()));
            }
            continue;
        }

        if let Some(ctx) = array.as_mut() {
            if let Some(caps) = BULLET_RE.captures(line) {
                pending = None;
                ctx.strings.push(Value::String(caps[1].to_string()));
                continue;
            }
        }

        if let Some(caps) = KEY_RE.captures(line) {
            let key = caps[1].to_string();
            let value = caps[2].to_string();
            pending = Some(Pending { key: key.clone(), first: value.clone(), buffer: Vec::new() });
            insert_value(&mut root, &mut scope, &mut array, key, value);
            continue;
        }

        // Unclassified line: only meaningful as part of a multi-line block
        if let Some(p) = pending.as_mut() {
            p.buffer.push(line.to_string());
        }
    }

    if let Some(ctx) = array.take() {
        let (key, items) = ctx.finish();
        insert_raw(&mut root, &mut scope, key, items);
    }
    if let Some((key, map)) = scope.take() {
        root.insert(key, Value::Object(map));
    }

    // Keys get lowercased and empty values dropped, undoing auto-capitalization
    // and half-filled template leftovers in one go.
    root.into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .filter(|(_, v)| !is_empty_value(v))
        .collect()
}

pub fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn insert_value(
    root: &mut Map<String, Value>,
    scope: &mut Option<(String, Map<String, Value>)>,
    array: &mut Option<ArrayCtx>,
    key: String,
    value: String,
) {
    if let Some(ctx) = array.as_mut() {
        // A repeat of the first key starts the next object in the array
        match &ctx.first_key {
            None => ctx.first_key = Some(key.clone()),
            Some(first) if *first == key && !ctx.current.is_empty() => {
                ctx.objects.push(Value::Object(std::mem::take(&mut ctx.current)));
            }
            _ => {}
        }
        ctx.current.insert(key, Value::String(value));
        return;
    }
    insert_raw(root, scope, key, Value::String(value));
}

fn insert_raw(
    root: &mut Map<String, Value>,
    scope: &mut Option<(String, Map<String, Value>)>,
    key: String,
    value: Value,
) {
    let target = match scope.as_mut() {
        Some((_, map)) => map,
        None => root,
    };
    // Repeated scalar keys accumulate into a list
    match target.remove(&key) {
        Some(Value::Array(mut items)) => {
            items.push(value);
            target.insert(key, Value::Array(items));
        }
        Some(previous) => {
            target.insert(key, Value::Array(vec![previous, value]));
        }
        None => {
            target.insert(key, value);
        }
    }
}

// ── Tests ──
