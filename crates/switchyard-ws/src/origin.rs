//! Origin allow-list.
//!
//! An [`OriginPolicy`] holds the rules an upgrade request's `Origin` header is
//! checked against. An empty policy accepts every request, including requests
//! that send no `Origin` at all. A non-empty policy requires the header to be
//! present and to match at least one rule.

use std::fmt;

use regex::Regex;

/// Prefix that marks a rule string as a regular expression.
pub const REGEX_PREFIX: &str = "regex:";

/// A single origin rule.
#[derive(Clone)]
pub enum OriginRule {
    /// Exact origin, compared case-insensitively.
    Exact(String),
    /// Glob where `*` matches any run of characters (e.g. `https://*.example.com`).
    Glob {
        /// The glob as written.
        pattern: String,
        /// The compiled, anchored expression.
        regex: Regex,
    },
    /// Arbitrary regular expression.
    Pattern(Regex),
}

impl OriginRule {
    /// Parse a rule from its textual form.
    ///
    /// Strings starting with `regex:` are compiled as regular expressions,
    /// strings containing `*` are globs, everything else is an exact origin.
    pub fn parse(rule: &str) -> Result<Self, regex::Error> {
        if let Some(pattern) = rule.strip_prefix(REGEX_PREFIX) {
            return Ok(Self::Pattern(Regex::new(pattern)?));
        }
        if rule.contains('*') {
            return Self::glob(rule);
        }
        Ok(Self::Exact(rule.to_ascii_lowercase()))
    }

    /// Build a glob rule.
    pub fn glob(pattern: &str) -> Result<Self, regex::Error> {
        let escaped = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?i)^{escaped}$"))?;
        Ok(Self::Glob {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Check whether an origin satisfies this rule.
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(expected) => expected.eq_ignore_ascii_case(origin),
            Self::Glob { regex, .. } | Self::Pattern(regex) => regex.is_match(origin),
        }
    }
}

impl fmt::Debug for OriginRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(origin) => f.debug_tuple("Exact").field(origin).finish(),
            Self::Glob { pattern, .. } => f.debug_tuple("Glob").field(pattern).finish(),
            Self::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
        }
    }
}

/// The set of origins allowed to open connections.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    rules: Vec<OriginRule>,
}

impl OriginPolicy {
    /// Create a policy that allows every origin.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a policy from rule strings. See [`OriginRule::parse`].
    pub fn from_strings<I, S>(rules: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|rule| OriginRule::parse(rule.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Add a rule.
    pub fn push(&mut self, rule: OriginRule) {
        self.rules.push(rule);
    }

    /// Whether any rule is configured.
    pub fn is_restricted(&self) -> bool {
        !self.rules.is_empty()
    }

    /// The configured rules.
    pub fn rules(&self) -> &[OriginRule] {
        &self.rules
    }

    /// Check a request's `Origin` header value.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.rules.iter().any(|rule| rule.matches(origin)))
    }
}
