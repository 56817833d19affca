//! Optional checks applied to generated Cypher before it reaches the store
//!
//! Without a validator every generated query runs as-is, including writes and
//! unbounded traversals.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).unwrap());

static WRITE_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CREATE|DELETE|DETACH|SET|MERGE|DROP|REMOVE|FOREACH|LOAD\s+CSV)\b").unwrap()
});

static NODE_LABELS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*[A-Za-z0-9_]*\s*((?::\s*`?[A-Za-z_][A-Za-z0-9_]*`?\s*)+)").unwrap()
});

static REL_TYPES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*[A-Za-z0-9_]*\s*:\s*(`?[A-Za-z_][A-Za-z0-9_]*`?(?:\s*\|\s*:?\s*`?[A-Za-z_][A-Za-z0-9_]*`?)*)").unwrap()
});

fn strip_literals(query: &str) -> String {
    STRING_LITERAL_RE.replace_all(query, "''").into_owned()
}

/// Accepts or rejects a generated query, with a reason on rejection
pub trait QueryValidator: Send + Sync {
    fn validate(&self, query: &str) -> Result<(), String>;
}

/// Rejects queries containing write clauses
#[derive(Debug, Default, Clone)]
pub struct ReadOnlyValidator;

impl QueryValidator for ReadOnlyValidator {
    fn validate(&self, query: &str) -> Result<(), String> {
        let stripped = strip_literals(query);
        match WRITE_CLAUSE_RE.find(&stripped) {
            Some(m) => Err(format!("write clause '{}' is not allowed", m.as_str().to_uppercase())),
            None => Ok(()),
        }
    }
}

/// Labels and relationship types referenced in node and relationship patterns
pub fn referenced_names(query: &str) -> BTreeSet<String> {
    let stripped = strip_literals(query);
    let mut names = BTreeSet::new();

    for caps in NODE_LABELS_RE.captures_iter(&stripped) {
        for label in caps[1].split(':') {
            let label = label.trim().trim_matches('`');
            if !label.is_empty() {
                names.insert(label.to_string());
            }
        }
    }
    for caps in REL_TYPES_RE.captures_iter(&stripped) {
        for rel in caps[1].split(|c: char| c == '|' || c == ':') {
            let rel = rel.trim().trim_matches('`');
            if !rel.is_empty() {
                names.insert(rel.to_string());
            }
        }
    }
    names
}

/// Rejects queries that reference labels or relationship types outside the allow-list
#[derive(Debug, Clone)]
pub struct AllowListValidator {
    allowed: BTreeSet<String>,
}

impl AllowListValidator {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl QueryValidator for AllowListValidator {
    fn validate(&self, query: &str) -> Result<(), String> {
        let outside: Vec<String> = referenced_names(query)
            .into_iter()
            .filter(|name| !self.allowed.contains(name))
            .collect();
        if outside.is_empty() {
            Ok(())
        } else {
            Err(format!("references names outside the allow-list: {}", outside.join(", ")))
        }
    }
}

/// Runs validators in order; the first rejection wins
#[derive(Clone, Default)]
pub struct CompositeValidator {
    validators: Vec<Arc<dyn QueryValidator>>,
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: Arc<dyn QueryValidator>) -> Self {
        self.validators.push(validator);
        self
    }
}

impl QueryValidator for CompositeValidator {
    fn validate(&self, query: &str) -> Result<(), String> {
        self.validators.iter().try_for_each(|v| v.validate(query))
    }
}
