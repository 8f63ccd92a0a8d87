//! In-memory collaborators for dispatch and scheduler tests.

use crate::error::{PlatformError, Result};
use crate::platform::{ItemStream, Platform};
use crate::recommend::{Generation, RecommendationRequest, Recommender};
use crate::{Comment, Item, ItemId, Message, Submission};

use futures::StreamExt as _;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct PlatformState {
    items: HashMap<ItemId, Item>,
    full_items: HashMap<ItemId, Item>,
    submissions: Vec<Submission>,
    comments: Vec<Comment>,
    messages: Vec<Message>,
    comment_feed: Vec<Item>,
    submission_feed: Vec<Item>,
    comment_feed_fault: Option<String>,
    failing_comments: bool,
    reply_calls: usize,
    failing_reply_call: Option<usize>,
    replies: Vec<(ItemId, String)>,
    deleted: Vec<ItemId>,
    read: Vec<ItemId>,
    logins: usize,
}

/// Platform double that serves canned items and records every write.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlatformState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Serve `item` from `fetch`.
    pub fn insert(&self, item: impl Into<Item>) {
        let item = item.into();
        self.with_state(|state| state.items.insert(item.fullname(), item));
    }

    /// Serve `item` from `fetch_full` (and from `fetch` if nothing lighter is known).
    pub fn insert_full(&self, item: impl Into<Item>) {
        let item = item.into();
        self.with_state(|state| state.full_items.insert(item.fullname(), item));
    }

    pub fn set_submissions(&self, submissions: Vec<Submission>) {
        self.with_state(|state| state.submissions = submissions);
    }

    pub fn set_comments(&self, comments: Vec<Comment>) {
        self.with_state(|state| state.comments = comments);
    }

    pub fn set_messages(&self, messages: Vec<Message>) {
        self.with_state(|state| state.messages = messages);
    }

    /// Make `new_comments` fail.
    pub fn fail_comments(&self) {
        self.with_state(|state| state.failing_comments = true);
    }

    /// Make the `call`-th `reply` (1-based) fail once without posting.
    pub fn fail_reply_call(&self, call: usize) {
        self.with_state(|state| state.failing_reply_call = Some(call));
    }

    /// Items the comment stream yields, optionally followed by a fault.
    pub fn set_comment_feed(&self, items: Vec<Item>, fault: Option<&str>) {
        self.with_state(|state| {
            state.comment_feed = items;
            state.comment_feed_fault = fault.map(str::to_string);
        });
    }

    /// Items the submission stream yields before idling forever.
    pub fn set_submission_feed(&self, items: Vec<Item>) {
        self.with_state(|state| state.submission_feed = items);
    }

    pub fn replies(&self) -> Vec<(ItemId, String)> {
        self.with_state(|state| state.replies.clone())
    }

    pub fn replies_to(&self, target: &ItemId) -> Vec<String> {
        self.replies()
            .into_iter()
            .filter(|(id, _)| id == target)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn deleted(&self) -> Vec<ItemId> {
        self.with_state(|state| state.deleted.clone())
    }

    pub fn read(&self) -> Vec<ItemId> {
        self.with_state(|state| state.read.clone())
    }

    pub fn logins(&self) -> usize {
        self.with_state(|state| state.logins)
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authenticate(&self) -> Result<()> {
        self.with_state(|state| state.logins += 1);
        Ok(())
    }

    async fn new_submissions(
        &self,
        _subreddits: &[String],
        limit: usize,
    ) -> Result<Vec<Submission>> {
        Ok(self.with_state(|state| {
            state.submissions.iter().take(limit).cloned().collect()
        }))
    }

    async fn new_comments(&self, _subreddits: &[String], limit: usize) -> Result<Vec<Comment>> {
        self.with_state(|state| {
            if state.failing_comments {
                return Err(PlatformError::Request("comment listing unavailable".into()).into());
            }
            Ok(state.comments.iter().take(limit).cloned().collect())
        })
    }

    async fn unread_messages(&self) -> Result<Vec<Message>> {
        Ok(self.with_state(|state| state.messages.clone()))
    }

    async fn fetch(&self, id: &ItemId) -> Result<Item> {
        self.with_state(|state| {
            state
                .items
                .get(id)
                .or_else(|| state.full_items.get(id))
                .cloned()
                .ok_or_else(|| PlatformError::NotFound { id: id.to_string() }.into())
        })
    }

    async fn fetch_full(&self, id: &ItemId) -> Result<Item> {
        self.with_state(|state| {
            state
                .full_items
                .get(id)
                .or_else(|| state.items.get(id))
                .cloned()
                .ok_or_else(|| PlatformError::NotFound { id: id.to_string() }.into())
        })
    }

    async fn reply(&self, target: &ItemId, text: &str) -> Result<()> {
        self.with_state(|state| {
            state.reply_calls += 1;
            if state.failing_reply_call == Some(state.reply_calls) {
                state.failing_reply_call = None;
                return Err(PlatformError::Request("reply rejected".into()).into());
            }
            state.replies.push((target.clone(), text.to_string()));
            Ok(())
        })
    }

    async fn delete(&self, id: &ItemId) -> Result<()> {
        self.with_state(|state| state.deleted.push(id.clone()));
        Ok(())
    }

    async fn mark_read(&self, message: &Message) -> Result<()> {
        self.with_state(|state| state.read.push(message.fullname()));
        Ok(())
    }

    fn comment_stream(&self, _subreddits: Vec<String>, _limit: usize) -> ItemStream {
        let (items, fault) = self.with_state(|state| {
            (
                std::mem::take(&mut state.comment_feed),
                state.comment_feed_fault.take(),
            )
        });
        let items = futures::stream::iter(items.into_iter().map(Ok));
        match fault {
            Some(reason) => items
                .chain(futures::stream::iter([Err(
                    PlatformError::Request(reason).into()
                )]))
                .boxed(),
            None => items.chain(futures::stream::pending()).boxed(),
        }
    }

    fn submission_stream(&self, _subreddits: Vec<String>, _limit: usize) -> ItemStream {
        let items = self.with_state(|state| std::mem::take(&mut state.submission_feed));
        futures::stream::iter(items.into_iter().map(Ok))
            .chain(futures::stream::pending())
            .boxed()
    }
}

/// Recommender double returning queued generations, then a default.
pub struct FakeRecommender {
    queued: Mutex<VecDeque<Generation>>,
    fallback: Generation,
    links: Vec<String>,
    requests: Mutex<Vec<RecommendationRequest>>,
}

impl FakeRecommender {
    /// Always answers with `text` as a single segment.
    pub fn answering(text: &str) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Generation::Segments(vec![text.to_string()]),
            links: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    pub fn then(self, generation: Generation) -> Self {
        self.queued.lock().unwrap().push_back(generation);
        self
    }

    pub fn requests(&self) -> Vec<RecommendationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Recommender for FakeRecommender {
    async fn generate(&self, request: &RecommendationRequest) -> Result<Generation> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.queued.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn direct_links(
        &self,
        _url: &str,
        _directives: &crate::directives::DirectiveSet,
    ) -> Result<Vec<String>> {
        Ok(self.links.clone())
    }
}
