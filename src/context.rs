//! Context namespaces and qualified subject names
//!
//! A context partitions subjects, schema IDs, fingerprints and configuration.
//! Subjects may carry their context inline using the qualified form
//! `:.{context}:{subject}`; the default context `.` never appears in that form.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Name of the default context
pub const DEFAULT_CONTEXT: &str = ".";

/// Reserved context holding cross-context config and mode state only
pub const GLOBAL_CONTEXT: &str = "__GLOBAL";

const MAX_CONTEXT_NAME_LEN: usize = 255;

fn context_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("context name pattern compiles"))
}

/// A validated context name in display form (`.`, `.production`, `__GLOBAL`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextName(String);

impl ContextName {
    /// The default context `.`
    pub fn default_context() -> Self {
        Self(DEFAULT_CONTEXT.to_string())
    }

    /// The reserved `__GLOBAL` context
    pub fn global() -> Self {
        Self(GLOBAL_CONTEXT.to_string())
    }

    /// Validate and normalize a context name.
    ///
    /// A missing leading dot is added (`production` becomes `.production`), an empty
    /// name means the default context, and `__GLOBAL` is accepted with or without a dot.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == DEFAULT_CONTEXT {
            return Ok(Self::default_context());
        }
        if trimmed.trim_start_matches('.') == GLOBAL_CONTEXT {
            return Ok(Self::global());
        }
        let normalized = if trimmed.starts_with('.') {
            trimmed.to_string()
        } else {
            format!(".{}", trimmed)
        };
        if normalized.len() > MAX_CONTEXT_NAME_LEN {
            return Err(RegistryError::InvalidContextName {
                name: raw.to_string(),
                reason: format!("longer than {} characters", MAX_CONTEXT_NAME_LEN),
            });
        }
        if !context_name_pattern().is_match(&normalized) {
            return Err(RegistryError::InvalidContextName {
                name: raw.to_string(),
                reason: "only letters, digits, '.', '_' and '-' are allowed".to_string(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CONTEXT
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_CONTEXT
    }

    /// Fail if this is the reserved global context
    pub fn ensure_not_global(&self, operation: &str) -> Result<()> {
        if self.is_global() {
            return Err(RegistryError::OperationNotAllowedInGlobalContext {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Render `subject` in qualified form for this context
    pub fn qualify(&self, subject: &str) -> String {
        if self.is_default() {
            subject.to_string()
        } else {
            format!(":{}:{}", self.0, subject)
        }
    }
}

impl Default for ContextName {
    fn default() -> Self {
        Self::default_context()
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContextName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContextName> for String {
    fn from(value: ContextName) -> Self {
        value.0
    }
}

/// A subject resolved to its owning context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedSubject {
    pub context: ContextName,
    pub subject: String,
}

impl QualifiedSubject {
    pub fn new(context: ContextName, subject: impl Into<String>) -> Self {
        Self {
            context,
            subject: subject.into(),
        }
    }

    /// Parse a subject parameter that may carry an inline `:.ctx:` prefix
    pub fn parse(raw: &str) -> Result<Self> {
        Self::resolve(None, raw)
    }

    /// Resolve a subject parameter against an optional URL-level context.
    ///
    /// An inline qualified prefix always wins over `url_context`.
    pub fn resolve(url_context: Option<&str>, raw: &str) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix(":.") {
            let (name, subject) = match rest.find(':') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            let context = if name.is_empty() {
                ContextName::default_context()
            } else {
                ContextName::parse(&format!(".{}", name))?
            };
            return Ok(Self::new(context, subject));
        }
        let context = match url_context {
            Some(name) => ContextName::parse(name)?,
            None => ContextName::default_context(),
        };
        Ok(Self::new(context, raw))
    }
}

impl fmt::Display for QualifiedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context.qualify(&self.subject))
    }
}
