//! Reply composition: turn generated text into size-bounded messages.
//!
//! Verbose replies keep the generator's own segmentation and append the
//! standard footer to each part. Slim replies are re-parsed into story
//! records, merged with records borrowed from other threads, de-duplicated
//! and greedily packed so that no message exceeds the platform limit.

use crate::directives::{Directive, DirectiveSet};
use crate::recommend::Generation;
use crate::stories::{self, SLIM_SIGNATURE, StoryRecord};

/// Standard footer appended to every verbose message. The hidden
/// `ffnbot!ignore` marker keeps the bot from answering its own replies.
pub const FOOTER: &str = concat!(
    "**FanfictionBot**^(1.4.0) **|** \\[[Usage][1]\\] | \\[[Changelog][2]\\] | \\[[Issues][3]\\] | \\[[GitHub][4]\\] | \\[[Contact][5]\\]\n",
    "[1]: https://github.com/tusing/reddit-ffn-bot/wiki/Usage       \"How to use the bot\"\n",
    "[2]: https://github.com/tusing/reddit-ffn-bot/wiki/Changelog   \"What changed until now\"\n",
    "[3]: https://github.com/tusing/reddit-ffn-bot/issues/          \"Bugs? Suggestions? Enter them here!\"\n",
    "[4]: https://github.com/tusing/reddit-ffn-bot/                 \"Fork me on GitHub\"\n",
    "[5]: https://www.reddit.com/message/compose?to=tusing          \"The maintainer\"",
    "\n\n^^^^^^^^^^^^^^^^^ffnbot!ignore",
    "\n\n^(*New in this version: Slim recommendations using* ffnbot!slim! *Thread recommendations using* linksub(thread_id)^)!",
);

/// Footer appended to every slim message. Carries the slim signature so
/// later `linksub` requests can recognise the reply.
pub fn slim_footer(sourced_from_threads: bool) -> String {
    let mut footer = format!("\n\n---\n\n*{SLIM_SIGNATURE}*^(1.4.0).");
    if sourced_from_threads {
        footer.push_str(
            " Note that some story data has been sourced from older threads, and may be out of date.",
        );
    }
    footer
}

/// Notice sent instead of a reply when a request names too many stories.
pub fn too_many_stories_notice(limit: usize) -> String {
    format!("You requested too many fics.\n\nWe allow a maximum of {limit} stories")
}

/// Size limits used when composing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeLimits {
    /// Platform maximum message length, in characters.
    pub max_message_size: usize,
    /// Replies at or below this many characters are not sent.
    pub min_content: usize,
}

impl Default for ComposeLimits {
    fn default() -> Self {
        Self {
            max_message_size: 10_000,
            min_content: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Verbose,
    Slim,
}

/// What should be posted in response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composition {
    /// Messages to post in order, footers already applied.
    Reply { mode: ReplyMode, messages: Vec<String> },
    /// Single notice replacing the reply.
    TooManyStories { notice: String },
    /// Nothing worth sending.
    Nothing,
}

/// Builds outgoing messages from generated text.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    limits: ComposeLimits,
}

impl Compositor {
    pub fn new(limits: ComposeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ComposeLimits {
        self.limits
    }

    /// Compose the reply for `generation`.
    ///
    /// `borrowed` holds records pulled from other threads; passing `Some`
    /// (even empty) marks the reply as partly sourced from elsewhere.
    pub fn compose(
        &self,
        generation: Generation,
        directives: &DirectiveSet,
        borrowed: Option<&[StoryRecord]>,
    ) -> Composition {
        let segments = match generation {
            Generation::Segments(segments) => segments,
            Generation::StoryLimitExceeded { requested, limit } => {
                tracing::info!(requested, limit, "request exceeds story limit");
                return Composition::TooManyStories {
                    notice: too_many_stories_notice(limit),
                };
            }
        };

        if directives.contains(Directive::Slim) {
            self.compose_slim(&segments, borrowed)
        } else {
            self.compose_verbose(segments)
        }
    }

    fn compose_verbose(&self, segments: Vec<String>) -> Composition {
        let total: usize = segments.iter().map(|segment| segment.chars().count()).sum();
        if total <= self.limits.min_content {
            tracing::info!(total, "no reply conditions met");
            return Composition::Nothing;
        }

        tracing::debug!(characters = total, messages = segments.len(), "composed verbose reply");
        let messages = segments
            .into_iter()
            .map(|segment| segment + FOOTER)
            .collect();
        Composition::Reply {
            mode: ReplyMode::Verbose,
            messages,
        }
    }

    fn compose_slim(&self, segments: &[String], borrowed: Option<&[StoryRecord]>) -> Composition {
        let raw: String = segments.concat();
        let raw_len = raw.chars().count();
        let borrowed_len: usize = borrowed
            .unwrap_or_default()
            .iter()
            .map(StoryRecord::len)
            .sum();

        if raw_len <= self.limits.min_content && borrowed_len <= self.limits.min_content {
            tracing::info!(raw_len, borrowed_len, "no reply conditions met");
            return Composition::Nothing;
        }

        let footer = slim_footer(borrowed.is_some());
        let records = stories::dedupe(
            borrowed
                .unwrap_or_default()
                .iter()
                .cloned()
                .chain(stories::parse_reply(&raw)),
        );

        let capacity = self
            .limits
            .max_message_size
            .saturating_sub(footer.chars().count());
        let chunks = pack(&records, capacity);
        if chunks.is_empty() {
            tracing::info!("no stories left after slimming");
            return Composition::Nothing;
        }

        tracing::debug!(
            stories = records.len(),
            messages = chunks.len(),
            "composed slim reply"
        );
        let messages = chunks.into_iter().map(|chunk| chunk + &footer).collect();
        Composition::Reply {
            mode: ReplyMode::Slim,
            messages,
        }
    }
}

/// Greedily pack records, in order, into chunks of at most `capacity`
/// characters. Records are never split; a record larger than `capacity`
/// gets a chunk of its own.
pub fn pack(records: &[StoryRecord], capacity: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for record in records {
        let len = record.len();
        if current_len > 0 && current_len + len > capacity {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if len > capacity {
            tracing::warn!(
                key = %record.key,
                len,
                capacity,
                "story record exceeds message capacity"
            );
        }
        current.push_str(&record.body);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn record(key: &str, len: usize) -> StoryRecord {
        StoryRecord {
            key: key.into(),
            body: "x".repeat(len),
        }
    }

    fn slim() -> DirectiveSet {
        DirectiveSet::new().with(Directive::Slim)
    }

    const ONE_STORY: &str = indoc! {"
        [Title](https://fic/1) by [Author](https://fic/u/1)

        > A summary long enough to matter.

        ^(*Words*: 1,000 ^*|* *Status*: Complete)

        ---
    "};

    #[test]
    fn pack_respects_exact_boundary() {
        // 10_000 max with a 40-char footer leaves 9_960 per chunk.
        let capacity = 10_000 - 40;
        let records = [
            record("a", 3000),
            record("b", 3000),
            record("c", 3960),
            record("d", 1),
        ];
        let chunks = pack(&records, capacity);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 9960);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn pack_flushes_before_overflowing_record() {
        let records = [record("a", 3000), record("b", 3000), record("c", 4000)];
        let chunks = pack(&records, 9960);
        assert_eq!(chunks.iter().map(String::len).collect::<Vec<_>>(), [6000, 4000]);

        let with_tail = [
            record("a", 3000),
            record("b", 3000),
            record("c", 4000),
            record("d", 1),
        ];
        let chunks = pack(&with_tail, 9960);
        assert_eq!(chunks.iter().map(String::len).collect::<Vec<_>>(), [6000, 4001]);
    }

    #[test]
    fn pack_never_drops_or_splits_records() {
        let records: Vec<StoryRecord> = (0..25)
            .map(|i| StoryRecord {
                key: format!("k{i}"),
                body: format!("<{i}:{}>", "y".repeat(100 + i * 37)),
            })
            .collect();
        let chunks = pack(&records, 1000);

        for chunk in &chunks {
            assert!(chunk.len() <= 1000);
        }
        let joined: String = chunks.concat();
        let expected: String = records.iter().map(|record| record.body.as_str()).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn oversized_record_gets_its_own_chunk() {
        let chunks = pack(&[record("a", 5), record("b", 50), record("c", 5)], 20);
        assert_eq!(chunks.iter().map(String::len).collect::<Vec<_>>(), [5, 50, 5]);
    }

    #[test]
    fn verbose_reply_appends_footer_to_each_part() {
        let compositor = Compositor::default();
        let composition = compositor.compose(
            Generation::Segments(vec!["first part".into(), "second part".into()]),
            &DirectiveSet::new(),
            None,
        );
        let Composition::Reply { mode, messages } = composition else {
            panic!("expected a reply, got {composition:?}");
        };
        assert_eq!(mode, ReplyMode::Verbose);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], format!("first part{FOOTER}"));
        assert!(messages[1].starts_with("second part"));
    }

    #[test]
    fn near_empty_generation_sends_nothing() {
        let compositor = Compositor::default();
        let composition = compositor.compose(
            Generation::Segments(vec!["tiny".into(), "".into()]),
            &DirectiveSet::new(),
            None,
        );
        assert_eq!(composition, Composition::Nothing);

        let composition = compositor.compose(Generation::Segments(vec![]), &slim(), None);
        assert_eq!(composition, Composition::Nothing);
    }

    #[test]
    fn story_limit_produces_single_notice() {
        let composition = Compositor::default().compose(
            Generation::StoryLimitExceeded {
                requested: 31,
                limit: 30,
            },
            &slim(),
            None,
        );
        assert_eq!(
            composition,
            Composition::TooManyStories {
                notice: "You requested too many fics.\n\nWe allow a maximum of 30 stories".into()
            }
        );
    }

    #[test]
    fn slim_reply_uses_slim_footer() {
        let composition = Compositor::default().compose(
            Generation::Segments(vec![ONE_STORY.into()]),
            &slim(),
            None,
        );
        let Composition::Reply { mode, messages } = composition else {
            panic!("expected a reply, got {composition:?}");
        };
        assert_eq!(mode, ReplyMode::Slim);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("(1,000 words, complete; no download available)"));
        assert!(messages[0].ends_with(&slim_footer(false)));
    }

    #[test]
    fn borrowed_records_lose_to_fresh_ones_with_same_key() {
        let borrowed = [
            StoryRecord {
                key: "[Title](https://fic/1) by".into(),
                body: "\n\nSTALE COPY\n\n".into(),
            },
            StoryRecord {
                key: "[Other](https://fic/2) by".into(),
                body: "\n\n[Other](https://fic/2) by [B](b)\n\n> other summary\n\n".into(),
            },
        ];
        let composition = Compositor::default().compose(
            Generation::Segments(vec![ONE_STORY.into()]),
            &slim(),
            Some(&borrowed),
        );
        let Composition::Reply { messages, .. } = composition else {
            panic!("expected a reply, got {composition:?}");
        };
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert!(!message.contains("STALE COPY"));
        assert_eq!(message.matches("[Title](https://fic/1) by").count(), 1);
        // The deduplicated entry keeps the borrowed record's position.
        let fresh = message.find("[Title]").unwrap();
        let other = message.find("[Other]").unwrap();
        assert!(fresh < other);
        assert!(message.ends_with(&slim_footer(true)));
    }

    #[test]
    fn borrowed_records_alone_are_enough_to_reply() {
        let borrowed = [StoryRecord {
            key: "[Other](https://fic/2) by".into(),
            body: "\n\n[Other](https://fic/2) by [B](b)\n\n> other summary\n\n".into(),
        }];
        let composition = Compositor::default().compose(
            Generation::Segments(vec![String::new()]),
            &slim(),
            Some(&borrowed),
        );
        assert!(matches!(composition, Composition::Reply { mode: ReplyMode::Slim, .. }));
    }

    #[test]
    fn slim_messages_stay_within_platform_limit() {
        let limits = ComposeLimits {
            max_message_size: 300,
            min_content: 10,
        };
        let stories: String = (0..12)
            .map(|i| {
                format!(
                    "[Story {i}](https://fic/{i}) by [Author](https://fic/u)\n\n> Summary {i}.\n\n^(*Words*: {i},000)\n\n---\n\n"
                )
            })
            .collect();
        let composition =
            Compositor::new(limits).compose(Generation::Segments(vec![stories]), &slim(), None);
        let Composition::Reply { messages, .. } = composition else {
            panic!("expected a reply, got {composition:?}");
        };
        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.chars().count() <= 300, "message too long: {}", message.len());
        }
        let total: usize = messages.iter().map(|message| message.matches("[Story ").count()).sum();
        assert_eq!(total, 12);
    }
}
