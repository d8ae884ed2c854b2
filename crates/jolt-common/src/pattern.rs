use glob::{MatchOptions, Pattern, PatternError};
use url::Url;

/// Check responses of the judge, one path segment per submission.
pub const SUBMISSION_CHECK_PATTERN: &str = "https://leetcode.com/submissions/detail/*/check/";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob over absolute URLs. `*` never crosses a `/`, query strings and
/// fragments are ignored.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    pattern: Pattern,
}

impl UrlPattern {
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        Ok(Self {
            raw: raw.to_string(),
            pattern: Pattern::new(raw)?,
        })
    }

    pub fn submission_check() -> Self {
        // The literal above is a valid glob.
        Self::new(SUBMISSION_CHECK_PATTERN).unwrap_or_else(|_| unreachable!())
    }

    /// The glob as written, usable as a CDP `urlPattern`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, url: &str) -> bool {
        let Ok(mut parsed) = Url::parse(url) else {
            return false;
        };
        parsed.set_query(None);
        parsed.set_fragment(None);
        self.pattern.matches_with(parsed.as_str(), MATCH_OPTIONS)
    }
}

impl Default for UrlPattern {
    fn default() -> Self {
        Self::submission_check()
    }
}
