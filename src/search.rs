use std::sync::OnceLock;

use regex::Regex;

fn quoted_phrase() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"]*)""#).expect("quoted phrase pattern is valid"))
}

/// Splits a free-text filter into search terms.
///
/// Double-quoted spans become single terms (quotes stripped) and come first,
/// in order of appearance. Whatever is left once those spans are removed is
/// split on whitespace. A dangling quote stays in the plain text; input made
/// of nothing but quotes and whitespace yields no terms.
pub fn words_to_search(input: &str) -> Vec<String> {
    if input.chars().all(|c| c == '"' || c.is_whitespace()) {
        return Vec::new();
    }
    let pattern = quoted_phrase();

    let mut words: Vec<String> = pattern
        .captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|word| !word.is_empty())
        .map(ToString::to_string)
        .collect();

    let remainder = pattern.replace_all(input, "");
    words.extend(remainder.split_whitespace().map(ToString::to_string));
    words
}

/// Disjunction of "content contains term" predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    terms: Vec<String>,
}

impl ContentFilter {
    pub fn from_text(text: &str) -> Self {
        Self::from_terms(words_to_search(text))
    }

    pub fn from_terms(terms: Vec<String>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, content: &str) -> bool {
        self.terms.iter().any(|term| content.contains(term.as_str()))
    }

    /// Renders the filter as an SQL boolean expression over `column`.
    ///
    /// Placeholders are numbered from `first_param`; bind [`Self::terms`] in
    /// order. `instr` keeps the match a case-sensitive substring test with no
    /// wildcard interpretation of `%` or `_`.
    pub fn to_sql(&self, column: &str, first_param: usize) -> Option<String> {
        if self.terms.is_empty() {
            return None;
        }
        let clauses: Vec<String> = (0..self.terms.len())
            .map(|idx| format!("instr({}, ?{}) > 0", column, first_param + idx))
            .collect();
        Some(format!("({})", clauses.join(" OR ")))
    }
}
