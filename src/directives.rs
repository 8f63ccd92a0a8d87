//! Inline control markers (`ffnbot!ignore`, `ffnbot!refresh`, ...).

use regex::Regex;

use std::collections::BTreeSet;
use std::sync::LazyLock;

static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ffnbot!([a-z_]+)").expect("hardcoded directive marker regex")
});

/// A control marker that alters how an item is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Directive {
    /// Suppress all processing.
    Ignore,
    /// Process even if already handled or otherwise ignored.
    Force,
    /// Re-dispatch to the item's parent.
    Parent,
    /// Delete the bot reply this comment answers.
    Delete,
    /// Delete and re-derive prior bot replies.
    Refresh,
    /// Compact reply format.
    Slim,
    /// Extract links from the submission's own URL.
    SubmissionLink,
    /// Reply with direct links only.
    DirectLinks,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Ignore => "ignore",
            Directive::Force => "force",
            Directive::Parent => "parent",
            Directive::Delete => "delete",
            Directive::Refresh => "refresh",
            Directive::Slim => "slim",
            Directive::SubmissionLink => "submissionlink",
            Directive::DirectLinks => "directlinks",
        }
    }

    pub fn parse(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "ignore" => Some(Directive::Ignore),
            "force" => Some(Directive::Force),
            "parent" => Some(Directive::Parent),
            "delete" => Some(Directive::Delete),
            "refresh" => Some(Directive::Refresh),
            "slim" => Some(Directive::Slim),
            "submissionlink" => Some(Directive::SubmissionLink),
            "directlinks" => Some(Directive::DirectLinks),
            _ => None,
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of directives attached to one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet(BTreeSet<Directive>);

impl DirectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, directive: Directive) -> bool {
        self.0.contains(&directive)
    }

    pub fn insert(&mut self, directive: Directive) -> bool {
        self.0.insert(directive)
    }

    pub fn with(mut self, directive: Directive) -> Self {
        self.0.insert(directive);
        self
    }

    /// Union of both sets.
    pub fn merged(mut self, other: &DirectiveSet) -> Self {
        self.0.extend(other.0.iter().copied());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Directive> + '_ {
        self.0.iter().copied()
    }

    /// Directives injected when escalating to a parent item.
    pub fn parent_escalation() -> Self {
        [Directive::DirectLinks, Directive::SubmissionLink, Directive::Force]
            .into_iter()
            .collect()
    }
}

impl FromIterator<Directive> for DirectiveSet {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for DirectiveSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Directive::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Extracts directives from raw item text.
pub trait DirectiveParser: Send + Sync + 'static {
    fn parse(&self, text: &str) -> DirectiveSet;
}

/// Recognises `ffnbot!<marker>` tokens anywhere in the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerParser;

impl DirectiveParser for MarkerParser {
    fn parse(&self, text: &str) -> DirectiveSet {
        MARKER_REGEX
            .captures_iter(text)
            .filter_map(|captures| {
                let marker = captures.get(1)?.as_str();
                let directive = Directive::parse(marker);
                if directive.is_none() {
                    tracing::debug!(marker, "ignoring unknown directive marker");
                }
                directive
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markers_case_insensitively() {
        let set = MarkerParser.parse("please ffnbot!Refresh and FFNBOT!slim this");
        assert!(set.contains(Directive::Refresh));
        assert!(set.contains(Directive::Slim));
        assert!(!set.contains(Directive::Force));
    }

    #[test]
    fn unknown_markers_are_dropped() {
        let set = MarkerParser.parse("ffnbot!teleport ffnbot!ignore");
        assert_eq!(set, DirectiveSet::new().with(Directive::Ignore));
    }

    #[test]
    fn text_without_markers_yields_empty_set() {
        assert!(MarkerParser.parse("linkffn(12345) please").is_empty());
    }

    #[test]
    fn parent_escalation_injects_force_and_link_flags() {
        let set = DirectiveSet::parent_escalation();
        assert!(set.contains(Directive::Force));
        assert!(set.contains(Directive::DirectLinks));
        assert!(set.contains(Directive::SubmissionLink));
        assert!(!set.contains(Directive::Parent));
    }

    #[test]
    fn merged_is_a_union() {
        let a = DirectiveSet::new().with(Directive::Slim);
        let b = DirectiveSet::new().with(Directive::Force);
        let merged = a.merged(&b);
        assert_eq!(merged.to_string(), "{force, slim}");
    }
}
