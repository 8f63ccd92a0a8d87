//! `linksub(...)` requests: reuse the bot's replies from other threads.
//!
//! A request may name threads by bare 6-character id, `redd.it/<id>` short
//! link or `/comments/<id>/` permalink, separated by `;`. Every bot reply in
//! each referenced thread is converted back into story records so the
//! compositor can merge them into a slim reply.

use crate::platform::Platform;
use crate::stories::{self, StoryRecord};
use crate::{Item, ItemId};

use regex::Regex;

use std::sync::LazyLock;

/// Token that switches a request into sibling-thread mode.
pub const TRIGGER: &str = "linksub(";

const THREAD_ID_LEN: usize = 6;

static LINKSUB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"linksub\((.*)\)").expect("hardcoded linksub regex"));
static SHORT_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"redd\.it/(\S{6})").expect("hardcoded short link regex"));
static PERMALINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/comments/(\S{6})").expect("hardcoded permalink regex"));

/// Old ebook mirror domain, rewritten in borrowed replies.
const MOVED_DOWNLOAD_HOSTS: [(&str, &str); 2] =
    [("p0ody-files", "ff2ebook"), ("ff_to_ebook", "old")];

pub fn is_requested(body: &str) -> bool {
    body.contains(TRIGGER)
}

/// Thread ids named inside every `linksub(...)` group, first mention first.
pub fn thread_ids(body: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push = |id: &str| {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    };

    for group in LINKSUB_REGEX.captures_iter(body) {
        let inner = &group[1];
        for capture in SHORT_LINK_REGEX.captures_iter(inner) {
            push(&capture[1]);
        }
        for capture in PERMALINK_REGEX.captures_iter(inner) {
            push(&capture[1]);
        }

        let compact: String = inner.chars().filter(|c| !c.is_whitespace()).collect();
        for token in compact.split(';') {
            if token.chars().count() == THREAD_ID_LEN {
                push(token);
            }
        }
    }

    ids
}

/// Gathers story records from the bot's replies in referenced threads.
pub struct ThreadHarvester<'a, P> {
    platform: &'a P,
    bot_username: &'a str,
    subreddits: &'a [String],
}

impl<'a, P: Platform> ThreadHarvester<'a, P> {
    pub fn new(platform: &'a P, bot_username: &'a str, subreddits: &'a [String]) -> Self {
        Self {
            platform,
            bot_username,
            subreddits,
        }
    }

    /// Records from every thread the request names. Threads that fail to load
    /// or live outside the target subreddits contribute nothing.
    pub async fn harvest(&self, body: &str) -> Vec<StoryRecord> {
        let ids = thread_ids(body);
        tracing::info!(threads = ?ids, "handling sibling thread request");

        let mut records = Vec::new();
        for id in ids {
            match self.thread_replies(&id).await {
                Ok(replies) => {
                    tracing::info!(
                        thread_id = %id,
                        replies = replies.len(),
                        "handled sibling thread"
                    );
                    let text = rewrite_moved_hosts(&replies.join("\n "));
                    records.extend(stories::parse_reply(&text));
                }
                Err(error) => {
                    tracing::error!(
                        thread_id = %id,
                        %error,
                        "failed to gather sibling thread recommendations"
                    );
                }
            }
        }
        records
    }

    async fn thread_replies(&self, id: &str) -> crate::Result<Vec<String>> {
        let Item::Submission(submission) = self.platform.fetch_full(&ItemId::submission(id)).await?
        else {
            return Ok(Vec::new());
        };

        let allowed = self
            .subreddits
            .iter()
            .any(|subreddit| subreddit.eq_ignore_ascii_case(&submission.subreddit));
        if !allowed {
            tracing::error!(
                thread_id = %id,
                subreddit = %submission.subreddit,
                targets = ?self.subreddits,
                "refusing sibling thread outside target subreddits"
            );
            return Ok(Vec::new());
        }

        Ok(submission
            .flattened_comments()
            .into_iter()
            .filter(|comment| {
                comment
                    .author
                    .as_deref()
                    .is_some_and(|author| author.eq_ignore_ascii_case(self.bot_username))
            })
            .map(|comment| comment.body.clone())
            .collect())
    }
}

fn rewrite_moved_hosts(text: &str) -> String {
    if !text.contains(MOVED_DOWNLOAD_HOSTS[0].0) {
        return text.to_string();
    }
    MOVED_DOWNLOAD_HOSTS
        .iter()
        .fold(text.to_string(), |text, (from, to)| text.replace(from, to))
}
