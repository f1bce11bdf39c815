//! Glob key matcher / 通配符键匹配
//!
//! Turns glob patterns into a lazy stream of [`ObjectDescriptor`]s. Each
//! positive pattern is listed under its literal prefix, page by page, only as
//! fast as the consumer pulls descriptors.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::sync::Arc;

use crate::binding::Binding;
use crate::error::{Error, Result};
use crate::record::{normalize_base, ObjectDescriptor};

const GLOB_META: &[char] = &['*', '?', '['];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct PositivePattern {
    pattern: Pattern,
    prefix: String,
}

/// Compiled patterns scoped to a base / 编译后的匹配规则
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    positives: Vec<PositivePattern>,
    negatives: Vec<Pattern>,
    base: String,
}

impl KeyMatcher {
    /// Compile `patterns`; a leading `!` marks a negation / `!` 开头为排除规则
    pub fn new<S: AsRef<str>>(patterns: &[S], base: &str) -> Result<Self> {
        let base = normalize_base(base);
        let mut positives = Vec::new();
        let mut negatives = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref().trim_start_matches('/');
            let (negated, source) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim_start_matches('/')),
                None => (false, raw),
            };
            let pattern = Pattern::new(source).map_err(|e| Error::Pattern {
                pattern: raw.to_string(),
                source: e,
            })?;

            if negated {
                negatives.push(pattern);
                continue;
            }
            // Pattern and base are disjoint: nothing can match
            let Some(prefix) = scoped_prefix(&literal_prefix(source), &base) else {
                tracing::debug!("pattern {} lies outside base {}, skipped", source, base);
                continue;
            };
            positives.push(PositivePattern { pattern, prefix });
        }

        Ok(Self {
            positives,
            negatives,
            base,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Whether `key` is selected by the patterns / 判断键是否匹配
    pub fn is_match(&self, key: &str) -> bool {
        (0..self.positives.len()).any(|index| self.accepts(index, key))
    }

    fn is_excluded(&self, key: &str) -> bool {
        self.negatives.iter().any(|n| n.matches_with(key, MATCH_OPTIONS))
    }

    /// Lazily list and filter matching descriptors / 惰性列出匹配的对象
    ///
    /// Patterns are listed in the order given; a key matched by several
    /// patterns is yielded once. A listing failure is yielded as an error.
    pub fn into_stream(
        self,
        binding: Arc<dyn Binding>,
    ) -> BoxStream<'static, Result<ObjectDescriptor>> {
        let Self {
            positives,
            negatives,
            base,
        } = self;
        let matcher = Arc::new(Self {
            positives: positives.clone(),
            negatives,
            base,
        });

        let listed = stream::iter(positives.into_iter().enumerate())
            .map(move |(index, positive)| {
                list_prefix(binding.clone(), positive.prefix)
                    .map_ok(move |descriptor| (index, descriptor))
            })
            .flatten();

        let mut seen = HashSet::new();
        listed
            .try_filter_map(move |(index, descriptor)| {
                let keep = matcher.accepts(index, &descriptor.key)
                    && seen.insert(descriptor.key.clone());
                future::ready(Ok(keep.then_some(descriptor)))
            })
            .boxed()
    }

    fn accepts(&self, index: usize, key: &str) -> bool {
        !key.ends_with('/')
            && key.starts_with(&self.base)
            && self.positives[index].pattern.matches_with(key, MATCH_OPTIONS)
            && !self.is_excluded(key)
    }
}

/// Page through `prefix`; a page is fetched only when the previous one is consumed.
fn list_prefix(
    binding: Arc<dyn Binding>,
    prefix: String,
) -> impl futures::Stream<Item = Result<ObjectDescriptor>> + Send + 'static {
    // None: exhausted; Some(token): fetch the page after `token`
    stream::try_unfold(Some(None::<String>), move |state| {
        let binding = binding.clone();
        let prefix = prefix.clone();
        async move {
            let Some(token) = state else {
                return Ok(None);
            };
            tracing::debug!("listing prefix={:?} continuation={:?}", prefix, token);
            let page = binding.list_page(&prefix, token).await?;
            let next = page.next.map(Some);
            let objects = page.objects.into_iter().map(Ok::<ObjectDescriptor, Error>);
            Ok::<_, Error>(Some((stream::iter(objects), next)))
        }
    })
    .try_flatten()
}

/// Listing prefix of a pattern: everything up to the last `/` before the
/// first glob metacharacter, or the whole pattern when it has none.
fn literal_prefix(pattern: &str) -> String {
    let Some(meta) = pattern.find(GLOB_META) else {
        return pattern.to_string();
    };
    match pattern[..meta].rfind('/') {
        Some(slash) => pattern[..=slash].to_string(),
        None => String::new(),
    }
}

/// Narrow a listing prefix by the base; `None` when they are disjoint.
fn scoped_prefix(prefix: &str, base: &str) -> Option<String> {
    if base.starts_with(prefix) {
        Some(base.to_string())
    } else if prefix.starts_with(base) {
        Some(prefix.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::memory::MemoryBinding;

    fn store() -> Arc<MemoryBinding> {
        Arc::new(
            MemoryBinding::new()
                .with_object("a/1.txt", "x")
                .with_object("a/2.txt", "y")
                .with_object("a/deep/3.txt", "z")
                .with_object("a/img.png", "p")
                .with_object("a/sub/", "")
                .with_object("b/4.txt", "w"),
        )
    }

    async fn keys(matcher: KeyMatcher, binding: Arc<MemoryBinding>) -> Vec<String> {
        matcher
            .into_stream(binding)
            .map_ok(|d| d.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("a/*.txt"), "a/");
        assert_eq!(literal_prefix("a/b?.txt"), "a/");
        assert_eq!(literal_prefix("ab*.txt"), "");
        assert_eq!(literal_prefix("**/*.txt"), "");
        assert_eq!(literal_prefix("a/1.txt"), "a/1.txt");
        assert_eq!(literal_prefix("a/[ab].txt"), "a/");
    }

    #[test]
    fn test_scoped_prefix() {
        assert_eq!(scoped_prefix("a/", "").as_deref(), Some("a/"));
        assert_eq!(scoped_prefix("", "a/").as_deref(), Some("a/"));
        assert_eq!(scoped_prefix("a/deep/", "a/").as_deref(), Some("a/deep/"));
        assert_eq!(scoped_prefix("b/", "a/"), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = KeyMatcher::new(&["a/[.txt"], "").unwrap_err();
        assert!(matches!(err, Error::Pattern { .. }));
    }

    #[test]
    fn test_is_match() {
        let matcher = KeyMatcher::new(&["a/**/*.txt", "!a/deep/**"], "a").unwrap();
        assert!(matcher.is_match("a/1.txt"));
        assert!(!matcher.is_match("a/deep/3.txt"));
        assert!(!matcher.is_match("a/img.png"));
        assert!(!matcher.is_match("b/4.txt"));
    }

    #[tokio::test]
    async fn test_star_stays_within_segment() {
        let binding = store();
        let matcher = KeyMatcher::new(&["a/*.txt"], "").unwrap();
        assert_eq!(keys(matcher, binding.clone()).await, vec!["a/1.txt", "a/2.txt"]);
        assert_eq!(binding.calls_of("list"), vec!["a/"]);
    }

    #[tokio::test]
    async fn test_globstar_and_negation() {
        let matcher = KeyMatcher::new(&["**/*.txt", "!a/2.txt"], "").unwrap();
        assert_eq!(
            keys(matcher, store()).await,
            vec!["a/1.txt", "a/deep/3.txt", "b/4.txt"]
        );
    }

    #[tokio::test]
    async fn test_base_scopes_matching() {
        let binding = store();
        let matcher = KeyMatcher::new(&["**/*.txt"], "a/").unwrap();
        assert_eq!(
            keys(matcher, binding.clone()).await,
            vec!["a/1.txt", "a/2.txt", "a/deep/3.txt"]
        );
        assert_eq!(binding.calls_of("list"), vec!["a/"]);

        let matcher = KeyMatcher::new(&["b/*.txt"], "a/").unwrap();
        assert!(keys(matcher, store()).await.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_patterns_yield_once_in_pattern_order() {
        let matcher = KeyMatcher::new(&["a/2.txt", "a/*.txt", "a/*.png"], "").unwrap();
        assert_eq!(
            keys(matcher, store()).await,
            vec!["a/2.txt", "a/1.txt", "a/img.png"]
        );
    }

    #[tokio::test]
    async fn test_directory_placeholders_are_skipped() {
        let matcher = KeyMatcher::new(&["a/**"], "").unwrap();
        let found = keys(matcher, store()).await;
        assert!(!found.iter().any(|k| k.ends_with('/')));
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn test_pages_are_fetched_lazily() {
        let binding = Arc::new(
            MemoryBinding::new()
                .with_page_size(2)
                .with_object("p/1", "")
                .with_object("p/2", "")
                .with_object("p/3", "")
                .with_object("p/4", "")
                .with_object("p/5", ""),
        );
        let matcher = KeyMatcher::new(&["p/*"], "").unwrap();
        let mut stream = matcher.into_stream(binding.clone());

        assert_eq!(stream.next().await.unwrap().unwrap().key, "p/1");
        assert_eq!(binding.calls_of("list").len(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap().key, "p/2");
        assert_eq!(binding.calls_of("list").len(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap().key, "p/3");
        assert_eq!(binding.calls_of("list").len(), 2);

        let rest: Vec<_> = stream.map_ok(|d| d.key).try_collect().await.unwrap();
        assert_eq!(rest, vec!["p/4", "p/5"]);
        assert_eq!(binding.calls_of("list").len(), 3);
    }
}
