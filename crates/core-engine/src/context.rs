//! Evaluation contexts and `${NAME}` token replacement.
//!
//! An [`EvalContext`] supplies values for parameter tokens embedded in
//! policy resource values. The admin path uses [`WildcardContext`] so
//! that every token collapses to the asterisk: a delegated-admin check
//! asks about the entire shape of what a policy could match.

use core_model::WILDCARD;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Source of values for parameter tokens during evaluation
pub trait EvalContext {
    /// Value for a context key, if one is known
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>>;
}

/// Context returning the asterisk wildcard for every key
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardContext;

impl EvalContext for WildcardContext {
    fn lookup(&self, _key: &str) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(WILDCARD))
    }
}

/// Context backed by a plain key/value map
#[derive(Debug, Clone, Default)]
pub struct MapContext {
    entries: BTreeMap<String, String>,
}

impl MapContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

impl EvalContext for MapContext {
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>> {
        self.entries.get(key).map(|v| Cow::Borrowed(v.as_str()))
    }
}

/// Expands `${NAME}` tokens in policy resource values.
///
/// One replacer exists per resource element that opts into token
/// replacement; elements without a replacer pass values through
/// unchanged. Tokens whose name the context cannot resolve are left
/// intact.
#[derive(Debug, Clone)]
pub struct StringTokenReplacer {
    token_prefix: &'static str,
    token_suffix: char,
}

impl Default for StringTokenReplacer {
    fn default() -> Self {
        Self {
            token_prefix: "${",
            token_suffix: '}',
        }
    }
}

impl StringTokenReplacer {
    /// Create a replacer with the standard `${NAME}` token form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the value contains at least one replaceable token
    #[must_use]
    pub fn has_tokens(&self, value: &str) -> bool {
        value
            .find(self.token_prefix)
            .and_then(|start| value[start..].find(self.token_suffix))
            .is_some()
    }

    /// Replace every resolvable token in `value` with its context value.
    #[must_use]
    pub fn replace_tokens(&self, value: &str, ctx: &dyn EvalContext) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find(self.token_prefix) {
            let after_prefix = &rest[start + self.token_prefix.len()..];

            let Some(end) = after_prefix.find(self.token_suffix) else {
                break;
            };

            let name = &after_prefix[..end];
            out.push_str(&rest[..start]);

            match ctx.lookup(name) {
                Some(replacement) => out.push_str(&replacement),
                None => {
                    out.push_str(self.token_prefix);
                    out.push_str(name);
                    out.push(self.token_suffix);
                }
            }

            rest = &after_prefix[end + 1..];
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_context_expands_everything() {
        let replacer = StringTokenReplacer::new();

        assert_eq!(
            replacer.replace_tokens("/home/${USER}/data", &WildcardContext),
            "/home/*/data"
        );
    }

    #[test]
    fn test_map_context_lookup() {
        let replacer = StringTokenReplacer::new();
        let ctx = MapContext::new().with("USER", "alice");

        assert_eq!(
            replacer.replace_tokens("/home/${USER}", &ctx),
            "/home/alice"
        );
    }

    #[test]
    fn test_unknown_token_left_intact() {
        let replacer = StringTokenReplacer::new();
        let ctx = MapContext::new();

        assert_eq!(
            replacer.replace_tokens("/home/${USER}", &ctx),
            "/home/${USER}"
        );
    }

    #[test]
    fn test_multiple_tokens() {
        let replacer = StringTokenReplacer::new();
        let ctx = MapContext::new().with("USER", "alice").with("GROUP", "hr");

        assert_eq!(
            replacer.replace_tokens("${GROUP}/${USER}", &ctx),
            "hr/alice"
        );
    }

    #[test]
    fn test_unterminated_token_untouched() {
        let replacer = StringTokenReplacer::new();

        assert_eq!(
            replacer.replace_tokens("/data/${USER", &WildcardContext),
            "/data/${USER"
        );
    }

    #[test]
    fn test_no_tokens() {
        let replacer = StringTokenReplacer::new();

        assert!(!replacer.has_tokens("/plain/path"));
        assert_eq!(
            replacer.replace_tokens("/plain/path", &WildcardContext),
            "/plain/path"
        );
    }
}
