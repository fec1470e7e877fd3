use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AssignError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// Normalizes a raw page identifier to its canonical storage form.
///
/// Lowercases, converts slashes to the colon hierarchy delimiter, maps
/// whitespace to underscores, drops characters outside the page-id alphabet,
/// and collapses and trims runs of colons. Wildcard characters are dropped,
/// so cleaning a namespace pattern body yields just the namespace path.
#[must_use]
pub fn clean_id(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut prev_colon = true;

    for ch in raw.trim().chars() {
        let ch = match ch {
            '/' | ';' => ':',
            c if c.is_whitespace() => '_',
            c => c,
        };
        for lower in ch.to_lowercase() {
            if lower == ':' {
                if prev_colon {
                    continue;
                }
                prev_colon = true;
                cleaned.push(lower);
            } else if lower.is_alphanumeric() || matches!(lower, '_' | '-' | '.') {
                prev_colon = false;
                cleaned.push(lower);
            }
        }
    }

    while cleaned.ends_with(':') {
        cleaned.pop();
    }
    cleaned
}

/// Returns the enclosing namespace of a cleaned page id, if any.
#[must_use]
pub fn namespace_of(page: &str) -> Option<&str> {
    page.rsplit_once(':').map(|(ns, _)| ns)
}

/// Wraps a namespace path in the hierarchy delimiter on both ends.
///
/// Namespace `a:b` becomes `:a:b:`; the empty (root) namespace becomes `::`.
/// Subtree and exact-namespace checks reduce to prefix/equality tests on
/// these boundary strings.
#[must_use]
pub fn boundary_wrap(namespace: &str) -> String {
    format!(":{namespace}:")
}

/// The boundary-wrapped namespace of a cleaned page id.
#[must_use]
pub fn namespace_boundary(page: &str) -> String {
    boundary_wrap(namespace_of(page).unwrap_or(""))
}

/// Maps an externally supplied page identifier to its canonical root form.
///
/// Implementations strip translation or variant qualifiers so that all
/// language variants of one logical document share one assignment record.
/// Must be deterministic and stable across calls within one reconciliation.
pub trait IdentityResolver {
    fn canonicalize(&self, pid: &str) -> String;
}

/// Default resolver for installations without translated page variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIdentityResolver;

impl IdentityResolver for NoopIdentityResolver {
    fn canonicalize(&self, pid: &str) -> String {
        pid.to_string()
    }
}

/// Strips a leading translation-namespace segment from page ids.
///
/// With languages `["en", "de"]`, `en:wiki:start` resolves to `wiki:start`
/// while `end:wiki:start` is left untouched.
#[derive(Debug, Clone, Default)]
pub struct LanguagePrefixResolver {
    languages: Vec<String>,
}

impl LanguagePrefixResolver {
    #[must_use]
    pub fn new(languages: Vec<String>) -> Self {
        Self { languages }
    }
}

impl IdentityResolver for LanguagePrefixResolver {
    fn canonicalize(&self, pid: &str) -> String {
        if let Some((head, rest)) = pid.split_once(':') {
            if self.languages.iter().any(|lang| lang == head) {
                return rest.to_string();
            }
        }
        pid.to_string()
    }
}

/// The shape of an assignment pattern, decided once at parse time.
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// `**` (modulo surrounding colons): matches every page.
    MatchAll,
    /// Slash-delimited regular expression, tested against `:{page}`.
    Regex(regex::Regex),
    /// Trailing `**`: the page namespace boundary starts with this boundary.
    NamespaceSubtree(String),
    /// Trailing `*`: the page namespace boundary equals this boundary.
    NamespaceExact(String),
    /// Anything else: cleaned pattern equals the cleaned page id.
    ExactPage(String),
}

/// One parsed assignment rule: a page/namespace expression bound to a schema.
#[derive(Debug, Clone)]
pub struct AssignmentPattern {
    raw: String,
    schema: String,
    kind: PatternKind,
}

impl AssignmentPattern {
    /// Parses a raw pattern into its tagged shape.
    ///
    /// # Errors
    /// Returns [`AssignError::Validation`] for empty inputs and for regex
    /// patterns that are unterminated or fail to compile. Malformed rules
    /// are rejected here, before anything is persisted.
    pub fn parse(raw: &str, schema: &str) -> Result<Self, AssignError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AssignError::Validation(
                "pattern must not be empty".to_string(),
            ));
        }

        let schema = schema.trim();
        if schema.is_empty() {
            return Err(AssignError::Validation(
                "schema name must not be empty".to_string(),
            ));
        }

        let kind = if raw.trim_matches(':') == "**" {
            PatternKind::MatchAll
        } else if let Some(rest) = raw.strip_prefix('/') {
            let body = rest.strip_suffix('/').ok_or_else(|| {
                AssignError::Validation(format!(
                    "regex pattern {raw} is missing its closing delimiter"
                ))
            })?;
            if body.is_empty() {
                return Err(AssignError::Validation(
                    "regex pattern body must not be empty".to_string(),
                ));
            }
            let compiled = regex::Regex::new(body)
                .map_err(|err| AssignError::Validation(format!("invalid regex pattern: {err}")))?;
            PatternKind::Regex(compiled)
        } else if let Some(namespace) = raw.strip_suffix("**") {
            PatternKind::NamespaceSubtree(boundary_wrap(&clean_id(namespace)))
        } else if let Some(namespace) = raw.strip_suffix('*') {
            PatternKind::NamespaceExact(boundary_wrap(&clean_id(namespace)))
        } else {
            PatternKind::ExactPage(clean_id(raw))
        };

        Ok(Self {
            raw: raw.to_string(),
            schema: schema.to_string(),
            kind,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    #[must_use]
    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    /// Checks whether this pattern matches a cleaned, canonical page id.
    ///
    /// `boundary_hint` is the page's boundary-wrapped namespace, precomputed
    /// by callers that test many patterns against one page; pass `None` to
    /// derive it from `page`.
    #[must_use]
    pub fn matches(&self, page: &str, boundary_hint: Option<&str>) -> bool {
        match &self.kind {
            PatternKind::MatchAll => true,
            PatternKind::Regex(compiled) => compiled.is_match(&format!(":{page}")),
            PatternKind::NamespaceSubtree(boundary) => {
                page_boundary(page, boundary_hint).starts_with(boundary.as_str())
            }
            PatternKind::NamespaceExact(boundary) => {
                page_boundary(page, boundary_hint) == boundary.as_str()
            }
            PatternKind::ExactPage(target) => target == page,
        }
    }
}

fn page_boundary<'a>(page: &str, hint: Option<&'a str>) -> std::borrow::Cow<'a, str> {
    match hint {
        Some(value) => std::borrow::Cow::Borrowed(value),
        None => std::borrow::Cow::Owned(namespace_boundary(page)),
    }
}

/// A stored pattern row, as listed back to rule authors.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct PatternRow {
    pub pattern: String,
    pub schema: String,
}

/// One recorded flag transition produced by a reconciliation pass.
///
/// Boundary layers feed these into their content cache invalidation; the
/// engine itself only reports what changed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct PageChange {
    pub pid: String,
    pub schema: String,
    pub assigned: bool,
}
