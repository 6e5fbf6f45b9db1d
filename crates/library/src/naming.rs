use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How display names turn into sort keys. Never affects identities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Naming {
    /// Ignores leading English articles and compares digit runs numerically.
    #[default]
    Intelligent,
    /// Compares the punctuation-stripped name as plain text.
    Simple,
}

impl Naming {
    pub fn name(&self, raw: &str, sort: Option<&str>) -> Name {
        let source = sort.unwrap_or(raw);
        let tokens = match self {
            Naming::Intelligent => intelligent_tokens(source),
            Naming::Simple => vec![SortToken::Text(text_key(&strip_punctuation(source)))],
        };
        Name::Known(KnownName {
            raw: raw.to_string(),
            sort: sort.map(str::to_string),
            tokens,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Placeholder {
    Artist,
    Genre,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Placeholder::Artist => "Unknown Artist",
            Placeholder::Genre => "Unknown Genre",
        };
        f.write_str(text)
    }
}

/// A display name with its sort key. Unknown names sort before every known one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Name {
    Known(KnownName),
    Unknown(Placeholder),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KnownName {
    pub raw: String,
    pub sort: Option<String>,
    tokens: Vec<SortToken>,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Known(known) => f.write_str(&known.raw),
            Name::Unknown(placeholder) => placeholder.fmt(f),
        }
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Name::Unknown(a), Name::Unknown(b)) => a.cmp(b),
            (Name::Unknown(_), Name::Known(_)) => Ordering::Less,
            (Name::Known(_), Name::Unknown(_)) => Ordering::Greater,
            (Name::Known(a), Name::Known(b)) => a
                .tokens
                .cmp(&b.tokens)
                .then_with(|| a.raw.cmp(&b.raw)),
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SortToken {
    /// Digit run with leading zeros removed.
    Numeric(String),
    Text(String),
}

impl Ord for SortToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortToken::Numeric(a), SortToken::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (SortToken::Numeric(_), SortToken::Text(_)) => Ordering::Less,
            (SortToken::Text(_), SortToken::Numeric(_)) => Ordering::Greater,
            (SortToken::Text(a), SortToken::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SortToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn strip_punctuation(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        name.to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_article(name: &str) -> &str {
    for article in ["the ", "an ", "a "] {
        let matches = name
            .get(..article.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(article));
        if matches && name.len() > article.len() {
            return &name[article.len()..];
        }
    }
    name
}

fn text_key(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        token.to_lowercase()
    } else {
        trimmed.to_lowercase()
    }
}

fn intelligent_tokens(name: &str) -> Vec<SortToken> {
    let stripped = strip_punctuation(name);
    let body = strip_article(&stripped);

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut numeric = false;
    for c in body.chars() {
        let digit = c.is_ascii_digit();
        if !current.is_empty() && digit != numeric {
            tokens.push(finish_token(&current, numeric));
            current.clear();
        }
        numeric = digit;
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(finish_token(&current, numeric));
    }
    tokens
}

fn finish_token(token: &str, numeric: bool) -> SortToken {
    if numeric {
        let digits = token.trim_start_matches('0');
        SortToken::Numeric(if digits.is_empty() { token } else { digits }.to_string())
    } else {
        SortToken::Text(text_key(token))
    }
}

/// Characters that split single-valued artist and genre tags. A backslash escapes a separator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Separators {
    chars: BTreeSet<char>,
}

impl Separators {
    pub fn new(chars: &str) -> Self {
        Self {
            chars: chars.chars().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Splits `values` only when the tag holds exactly one value; multi-valued tags are
    /// already split by the container.
    pub fn split(&self, values: &[String]) -> Vec<String> {
        match values {
            [single] if !self.is_empty() => self.split_one(single),
            _ => values.to_vec(),
        }
    }

    fn split_one(&self, value: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = value.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    if self.chars.contains(&next) {
                        current.push(next);
                        chars.next();
                        continue;
                    }
                }
                current.push(c);
            } else if self.chars.contains(&c) {
                parts.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        parts.push(current);
        parts
            .into_iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    }
}

impl From<String> for Separators {
    fn from(chars: String) -> Self {
        Separators::new(&chars)
    }
}

impl From<Separators> for String {
    fn from(separators: Separators) -> Self {
        separators.chars.into_iter().collect()
    }
}
