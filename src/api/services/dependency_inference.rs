//! Finds values that a captured request took from an earlier response.
//!
//! Every sufficiently long leaf of an earlier response body is a candidate token. When a
//! later request's URL, header values or body contain the token, the occurrence is
//! replaced with a template reading the producer's response, e.g.
//! `Bearer {{request_1.response.body.token}}`.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Default minimum token length.
pub const DEFAULT_MIN_TOKEN_LEN: usize = 8;

/// A response value that later requests may reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSource {
    pub token: String,
    /// Template path relative to the producer node, e.g. `request_1.response.body.id`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub producer: usize,
    pub consumer: usize,
    pub token: String,
    pub variable: String,
}

/// The parts of a request that may carry reused values.
#[derive(Debug, Clone, Default)]
pub struct RequestTexts {
    pub url: String,
    pub header_values: Vec<String>,
    pub param_values: Vec<String>,
    pub body: String,
}

impl RequestTexts {
    fn contains(&self, token: &str) -> bool {
        self.url.contains(token)
            || self.header_values.iter().any(|v| v.contains(token))
            || self.param_values.iter().any(|v| v.contains(token))
            || self.body.contains(token)
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn push_key(path: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{}.{}", path, key)
    } else {
        format!("{}[{}]", path, serde_json::to_string(key).unwrap_or_default())
    }
}

fn collect_leaves(value: &Value, path: String, min_len: usize, out: &mut Vec<TokenSource>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect_leaves(child, push_key(&path, key), min_len, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, format!("{}[{}]", path, i), min_len, out);
            }
        }
        Value::String(s) if s.chars().count() >= min_len => out.push(TokenSource {
            token: s.clone(),
            path,
        }),
        Value::Number(n) => {
            let s = n.to_string();
            if s.len() >= min_len {
                out.push(TokenSource { token: s, path });
            }
        }
        _ => {}
    }
}

/// Candidate tokens in a response body produced by node `node_name`.
///
/// JSON bodies yield their leaves; anything else is considered as one token when it
/// contains no whitespace.
pub fn response_tokens(node_name: &str, body: &str, min_len: usize) -> Vec<TokenSource> {
    let root = format!("{}.response.body", node_name);
    let mut out = Vec::new();
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            collect_leaves(&value, root, min_len, &mut out);
        }
        _ => {
            let trimmed = body.trim();
            if trimmed.chars().count() >= min_len && !trimmed.contains(char::is_whitespace) {
                out.push(TokenSource {
                    token: trimmed.to_string(),
                    path: root,
                });
            }
        }
    }
    // Longer tokens first so a token never shadows one that contains it.
    out.sort_by(|a, b| b.token.len().cmp(&a.token.len()).then(a.path.cmp(&b.path)));
    out
}

/// Dependencies of every request on earlier responses. The latest producer of a token wins.
pub fn infer(
    responses: &[Vec<TokenSource>],
    requests: &[RequestTexts],
) -> Vec<Dependency> {
    let mut out = Vec::new();
    for (consumer, texts) in requests.iter().enumerate().skip(1) {
        let mut seen: HashSet<&str> = HashSet::new();
        for producer in (0..consumer.min(responses.len())).rev() {
            for source in &responses[producer] {
                if seen.contains(source.token.as_str()) || !texts.contains(&source.token) {
                    continue;
                }
                seen.insert(source.token.as_str());
                out.push(Dependency {
                    producer,
                    consumer,
                    token: source.token.clone(),
                    variable: source.path.clone(),
                });
            }
        }
    }
    out
}

/// Replace every occurrence of the dependencies' tokens with their templates.
///
/// One left-to-right pass over the original text; at each position the longest token
/// wins, and inserted templates are never scanned again.
pub fn rewrite(text: &str, dependencies: &[&Dependency]) -> String {
    let mut ordered: Vec<&Dependency> = dependencies
        .iter()
        .copied()
        .filter(|d| !d.token.is_empty())
        .collect();
    ordered.sort_by(|a, b| b.token.len().cmp(&a.token.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        match ordered.iter().find(|d| rest.starts_with(d.token.as_str())) {
            Some(dep) => {
                out.push_str("{{");
                out.push_str(&dep.variable);
                out.push_str("}}");
                rest = &rest[dep.token.len()..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}
