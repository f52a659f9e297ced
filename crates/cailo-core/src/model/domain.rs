use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A normalized (trimmed, lowercase) host name naming a restricted site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    /// Validate user input and normalize it into a domain.
    ///
    /// Accepts dotted host names whose labels use letters, digits, `-` or
    /// `_`, with an alphabetic top-level label of at least two characters.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyDomain);
        }
        if !is_valid_host(&normalized) {
            return Err(ValidationError::InvalidDomain(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `host` is this domain or a proper subdomain of it.
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.0.as_str();
        if host == domain {
            return true;
        }
        host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
    }
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_valid_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let (tld, rest) = match labels.split_last() {
        Some(parts) => parts,
        None => return false,
    };
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    let Some((name, subdomains)) = rest.split_last() else {
        return false;
    };
    let mut name_chars = name.chars();
    let starts_alnum = name_chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if name.len() < 2 || !starts_alnum || !name_chars.all(is_label_char) {
        return false;
    }
    subdomains
        .iter()
        .all(|label| !label.is_empty() && label.chars().all(is_label_char))
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        Self(value.trim().to_lowercase())
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
