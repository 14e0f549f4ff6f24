use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::schema::Entity;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Lowercase and collapse runs of whitespace to a single space.
pub fn normalize_text(s: &str) -> String {
    let lowered = s.to_lowercase();
    WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
}

/// `normalize_text` plus stripping of leading/trailing punctuation.
pub fn normalize_name(s: &str) -> String {
    let text = normalize_text(s);
    text.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace() || is_unicode_quote(c))
        .to_string()
}

fn is_unicode_quote(c: char) -> bool {
    matches!(c, '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}')
}

/// Normalized names and aliases of a candidate's entities.
pub struct EntityIndex {
    names: HashSet<String>,
}

impl EntityIndex {
    pub fn new(entities: &[Entity]) -> Self {
        let names = entities
            .iter()
            .flat_map(|e| std::iter::once(&e.name).chain(e.aliases.iter()))
            .map(|n| normalize_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        let normalized = normalize_name(name);
        !normalized.is_empty() && self.names.contains(&normalized)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
