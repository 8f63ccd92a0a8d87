//! Platform client trait.

use crate::error::Result;
use crate::{Comment, Item, ItemId, Message, Submission};

use futures::Stream;

use std::future::Future;
use std::pin::Pin;

/// Continuous feed of newly posted items.
pub type ItemStream = Pin<Box<dyn Stream<Item = Result<Item>> + Send>>;

/// Everything the agent needs from the discussion platform.
///
/// Implementations own authentication and the wire protocol; the dispatcher
/// only sees the closed [`Item`] model.
pub trait Platform: Send + Sync + 'static {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// (Re-)establish a session. Called at the start of every scheduling run.
    fn authenticate(&self) -> impl Future<Output = Result<()>> + Send;

    /// Newest submissions across `subreddits`, newest first.
    fn new_submissions(
        &self,
        subreddits: &[String],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Submission>>> + Send;

    /// Newest comments across `subreddits`, newest first.
    fn new_comments(
        &self,
        subreddits: &[String],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Comment>>> + Send;

    fn unread_messages(&self) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Fetch a single comment or submission without its replies.
    fn fetch(&self, id: &ItemId) -> impl Future<Output = Result<Item>> + Send;

    /// Fetch a comment with its replies, or a submission with its comments.
    fn fetch_full(&self, id: &ItemId) -> impl Future<Output = Result<Item>> + Send;

    /// Post `text` as a reply to the item named by `target`.
    fn reply(&self, target: &ItemId, text: &str) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, id: &ItemId) -> impl Future<Output = Result<()>> + Send;

    fn mark_read(&self, message: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Endless feed of new comments. Ends with an error item on failure.
    fn comment_stream(&self, subreddits: Vec<String>, limit: usize) -> ItemStream;

    /// Endless feed of new submissions. Ends with an error item on failure.
    fn submission_stream(&self, subreddits: Vec<String>, limit: usize) -> ItemStream;
}
