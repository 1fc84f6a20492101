//! Glob suppression patterns.
//!
//! A pattern matches a resource ID literally except for `*`, which matches
//! any run of characters (including none). Matches are anchored to the whole
//! ID. There is no escape for a literal `*`.

use regex::Regex;
use tracing::error;

/// A compiled set of suppression patterns for one policy.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSet {
    matchers: Vec<Regex>,
}

impl SuppressionSet {
    /// Compile every pattern. A pattern that fails to compile is logged and
    /// left out of the set.
    pub fn compile<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let matchers = patterns
            .into_iter()
            .filter_map(|pattern| {
                let pattern = pattern.as_ref();
                match Regex::new(&glob_to_regex(pattern)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        error!(pattern, error = %e, "invalid suppression pattern, skipping");
                        None
                    }
                }
            })
            .collect();
        Self { matchers }
    }

    pub fn is_suppressed(&self, resource_id: &str) -> bool {
        self.matchers.iter().any(|re| re.is_match(resource_id))
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// True if `resource_id` matches any of `patterns`.
pub fn is_suppressed<S: AsRef<str>>(resource_id: &str, patterns: &[S]) -> bool {
    SuppressionSet::compile(patterns).is_suppressed(resource_id)
}

fn glob_to_regex(pattern: &str) -> String {
    let literal = regex::escape(pattern).replace(r"\*", ".*");
    format!("^(?s:{literal})$")
}
