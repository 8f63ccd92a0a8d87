//! Dispatch controller: decide what to do with one ingested item.
//!
//! Every item runs through the same state machine. Known items are skipped
//! unless forced; `ignore` short-circuits; `parent` delegates to the parent
//! item first; `delete` and `refresh` act on earlier bot replies; everything
//! else is answered through the recommender and compositor. Each terminal
//! path marks the triggering item in the ledger.

use crate::compose::{ComposeLimits, Composition, Compositor, ReplyMode};
use crate::directives::{Directive, DirectiveParser, DirectiveSet, MarkerParser};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::linksub::{self, ThreadHarvester};
use crate::platform::Platform;
use crate::quota::QuotaTracker;
use crate::recommend::{RecommendationRequest, Recommender};
use crate::{Comment, Item, ItemId, Message, Submission};

use futures::future::BoxFuture;

use std::sync::Arc;
use std::time::Duration;

/// Knobs the dispatcher needs from the configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Account the bot posts as. Compared case-insensitively.
    pub bot_username: String,
    /// Subreddits the bot operates on; sibling threads must live here.
    pub subreddits: Vec<String>,
    /// Log replies and deletions instead of performing them.
    pub dry_run: bool,
    pub story_limit: usize,
    pub limits: ComposeLimits,
    /// Pause after each message of a multi-part slim reply.
    pub chunk_pacing: Duration,
    /// Pause after answering a request.
    pub reply_pacing: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            bot_username: String::new(),
            subreddits: Vec::new(),
            dry_run: false,
            story_limit: 30,
            limits: ComposeLimits::default(),
            chunk_pacing: Duration::from_secs(10),
            reply_pacing: Duration::from_secs(15),
        }
    }
}

/// Quota weight of a message: one per requested story target.
pub fn request_weight(body: &str) -> u32 {
    let weight = body.matches("link").count() + body.matches(';').count();
    u32::try_from(weight).unwrap_or(u32::MAX)
}

/// Single-writer owner of the ledger and quota tracker.
pub struct Dispatcher<P, R> {
    settings: DispatchSettings,
    platform: Arc<P>,
    recommender: Arc<R>,
    parser: Arc<dyn DirectiveParser>,
    compositor: Compositor,
    ledger: Ledger,
    quota: QuotaTracker,
}

impl<P: Platform, R: Recommender> Dispatcher<P, R> {
    pub fn new(
        settings: DispatchSettings,
        platform: Arc<P>,
        recommender: Arc<R>,
        ledger: Ledger,
        quota: QuotaTracker,
    ) -> Self {
        let compositor = Compositor::new(settings.limits);
        Self {
            settings,
            platform,
            recommender,
            parser: Arc::new(MarkerParser),
            compositor,
            ledger,
            quota,
        }
    }

    /// Replace the default `ffnbot!` marker parser.
    pub fn with_parser(mut self, parser: impl DirectiveParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Dispatch one freshly ingested item.
    #[tracing::instrument(skip_all, fields(item_id = %item.fullname()))]
    pub async fn handle(&mut self, item: Item) -> Result<()> {
        self.dispatch(item, DirectiveSet::new()).await
    }

    /// Boxed so parent escalation and refresh can re-enter the state machine.
    fn dispatch(&mut self, item: Item, extra: DirectiveSet) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match item {
                Item::Submission(submission) => self.handle_submission(submission, extra).await,
                Item::Comment(comment) => self.handle_comment(comment, extra).await,
                Item::Message(message) => self.handle_message(message).await,
            }
        })
    }

    async fn handle_submission(
        &mut self,
        submission: Submission,
        extra: DirectiveSet,
    ) -> Result<()> {
        let id = submission.fullname();
        let forced = extra.contains(Directive::Force);
        if !forced && (extra.contains(Directive::Ignore) || self.ledger.contains(&id)?) {
            return Ok(());
        }
        if submission.author.is_none() {
            tracing::error!(submission_id = %id, "skipping deleted submission");
            self.ledger.add(&id)?;
            return Ok(());
        }

        tracing::info!(submission_id = %id, "found new submission");
        let outcome = self.answer_submission(&submission, &extra).await;
        // Marked even when answering failed.
        self.ledger.add(&id)?;
        outcome
    }

    async fn answer_submission(
        &mut self,
        submission: &Submission,
        extra: &DirectiveSet,
    ) -> Result<()> {
        let directives = self.parser.parse(&submission.selftext).merged(extra);
        if is_ignored(&directives) {
            tracing::debug!(submission_id = %submission.fullname(), "submission ignored");
            return Ok(());
        }

        let additions = if directives.contains(Directive::SubmissionLink) {
            self.recommender
                .direct_links(&submission.url, &directives)
                .await?
        } else {
            Vec::new()
        };

        let target = submission.fullname();
        let composition = self
            .compose_reply(&submission.selftext, directives, additions)
            .await?;
        self.deliver(&target, composition).await
    }

    async fn handle_comment(&mut self, comment: Comment, extra: DirectiveSet) -> Result<()> {
        let id = comment.fullname();
        let forced = extra.contains(Directive::Force);
        if self.ledger.contains(&id)? && !forced {
            return Ok(());
        }
        if comment.author.is_none() {
            tracing::error!(comment_id = %id, "skipping deleted comment");
            self.ledger.add(&id)?;
            return Ok(());
        }

        let directives = self.parser.parse(&comment.body).merged(&extra);
        if is_ignored(&directives) {
            tracing::debug!(comment_id = %id, "comment ignored");
            self.ledger.add(&id)?;
            return Ok(());
        }
        tracing::info!(comment_id = %id, %directives, "found new comment");

        if directives.contains(Directive::Parent) {
            let parent_id = if comment.is_root() {
                &comment.link_id
            } else {
                &comment.parent_id
            };
            tracing::info!(
                comment_id = %id,
                parent_id = %parent_id,
                "escalating request to parent"
            );
            let parent = self.platform.fetch(parent_id).await?;
            // Escalation failures never skip the comment's own answer and mark.
            if let Err(error) = self
                .dispatch(parent, DirectiveSet::parent_escalation())
                .await
            {
                tracing::error!(comment_id = %id, %error, "answering parent failed");
            }
        }

        if directives.contains(Directive::Delete) && !self.ledger.contains(&id)? {
            self.ledger.add(&id)?;
            return self.delete_parent_reply(&comment).await;
        }

        if directives.contains(Directive::Refresh) && !self.ledger.contains(&id)? {
            self.ledger.add(&id)?;
            return self.refresh(&comment).await;
        }

        let outcome = match self.compose_reply(&comment.body, directives, Vec::new()).await {
            Ok(composition) => self.deliver(&id, composition).await,
            Err(error) => Err(error),
        };
        self.ledger.add(&id)?;
        outcome
    }

    async fn delete_parent_reply(&mut self, comment: &Comment) -> Result<()> {
        tracing::info!(comment_id = %comment.fullname(), "delete requested");
        if comment.is_root() {
            tracing::error!(comment_id = %comment.fullname(), "delete requested by a root comment");
            return Ok(());
        }

        let parent = self.platform.fetch(&comment.parent_id).await?;
        if !parent.is_valid() {
            tracing::error!(parent_id = %comment.parent_id, "delete requested on a deleted item");
            return Ok(());
        }
        if !parent.is_authored_by(&self.settings.bot_username) {
            tracing::error!(
                parent_id = %comment.parent_id,
                "delete requested on a non-bot comment"
            );
            return Ok(());
        }

        self.remove(&parent.fullname()).await
    }

    async fn refresh(&mut self, comment: &Comment) -> Result<()> {
        tracing::info!(comment_id = %comment.fullname(), "refresh requested");

        let mut requester = self.platform.fetch_full(&comment.parent_id).await?;
        if !requester.is_valid() {
            tracing::error!(item_id = %requester.fullname(), "refresh target is invalid");
            return Ok(());
        }

        // Refresh called on a bot reply: the real request is one level up.
        if requester.is_authored_by(&self.settings.bot_username) {
            let Item::Comment(bot_reply) = &requester else {
                tracing::error!(item_id = %requester.fullname(), "cannot step above bot item");
                return Ok(());
            };
            tracing::info!(bot_reply = %bot_reply.fullname(), "refresh requested on a bot reply");
            let parent_id = bot_reply.parent_id.clone();
            requester = self.platform.fetch_full(&parent_id).await?;
            if !requester.is_valid() {
                tracing::error!(item_id = %parent_id, "parent of bot reply is invalid");
                return Ok(());
            }
        }

        let stale: Vec<ItemId> = match &requester {
            Item::Comment(requesting) => self.bot_replies(&requesting.replies),
            Item::Submission(submission) => self.bot_replies(&submission.comments),
            Item::Message(message) => {
                tracing::error!(message_id = %message.fullname(), "cannot refresh a message");
                return Ok(());
            }
        };

        if stale.is_empty() {
            tracing::info!(item_id = %requester.fullname(), "no earlier bot replies to remove");
        }
        for reply in &stale {
            self.remove(reply).await?;
        }

        tracing::info!(item_id = %requester.fullname(), "re-handling refreshed request");
        self.dispatch(requester, DirectiveSet::new().with(Directive::Force))
            .await
    }

    /// Fullnames of the valid bot-authored comments in `comments`.
    fn bot_replies(&self, comments: &[Comment]) -> Vec<ItemId> {
        comments
            .iter()
            .filter(|reply| {
                reply
                    .author
                    .as_deref()
                    .is_some_and(|author| author.eq_ignore_ascii_case(&self.settings.bot_username))
            })
            .map(Comment::fullname)
            .collect()
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        // Read first so a failing message is not picked up again.
        self.platform.mark_read(&message).await?;

        let Some(sender) = message.author.clone() else {
            tracing::error!(message_id = %message.fullname(), "received invalid message");
            return Ok(());
        };
        if message.was_comment {
            tracing::debug!(message_id = %message.fullname(), "skipping comment reply in inbox");
            return Ok(());
        }

        let id = message.fullname();
        if self.ledger.contains(&id)? {
            return Ok(());
        }

        let directives = self.parser.parse(&message.body);
        if is_ignored(&directives) {
            tracing::debug!(message_id = %id, "message ignored");
            self.ledger.add(&id)?;
            return Ok(());
        }

        let weight = request_weight(&message.body);
        if !self.quota.would_allow(&sender, weight) {
            tracing::warn!(
                sender = %sender,
                requested = weight,
                remaining = self.quota.remaining(&sender),
                window_secs_left = self.quota.seconds_remaining(),
                "sender exceeded their request quota, dropping message"
            );
            self.ledger.add(&id)?;
            return Ok(());
        }

        let outcome = match self.compose_reply(&message.body, directives, Vec::new()).await {
            Ok(composition) => {
                // Story-limit notices do not count against the sender.
                if !matches!(composition, Composition::TooManyStories { .. }) {
                    self.quota.record_request(&sender, weight);
                }
                self.deliver(&id, composition).await
            }
            Err(error) => Err(error),
        };
        self.ledger.add(&id)?;
        outcome
    }

    async fn compose_reply(
        &self,
        body: &str,
        mut directives: DirectiveSet,
        additions: Vec<String>,
    ) -> Result<Composition> {
        let borrowed = if linksub::is_requested(body) {
            directives.insert(Directive::Slim);
            let harvester = ThreadHarvester::new(
                self.platform.as_ref(),
                &self.settings.bot_username,
                &self.settings.subreddits,
            );
            Some(harvester.harvest(body).await)
        } else {
            None
        };

        let request = RecommendationRequest {
            body: body.to_string(),
            directives,
            additions,
            story_limit: self.settings.story_limit,
        };
        let generation = self.recommender.generate(&request).await?;
        Ok(self
            .compositor
            .compose(generation, &request.directives, borrowed.as_deref()))
    }

    async fn deliver(&self, target: &ItemId, composition: Composition) -> Result<()> {
        match composition {
            Composition::Nothing => {
                tracing::info!(target = %target, "no reply conditions met");
            }
            Composition::TooManyStories { notice } => {
                tracing::info!(target = %target, "too many stories requested");
                self.post(target, &notice).await?;
                return Ok(());
            }
            Composition::Reply { mode, messages } => {
                let characters: usize =
                    messages.iter().map(|message| message.chars().count()).sum();
                tracing::info!(
                    target = %target,
                    characters,
                    messages = messages.len(),
                    slim = mode == ReplyMode::Slim,
                    "writing reply"
                );
                for message in &messages {
                    self.post(target, message).await?;
                    if mode == ReplyMode::Slim {
                        pause(self.settings.chunk_pacing).await;
                    }
                }
            }
        }

        pause(self.settings.reply_pacing).await;
        Ok(())
    }

    async fn post(&self, target: &ItemId, text: &str) -> Result<()> {
        if self.settings.dry_run {
            tracing::info!(
                target = %target,
                characters = text.chars().count(),
                "dry run, not sending reply"
            );
            return Ok(());
        }
        self.platform.reply(target, text).await
    }

    async fn remove(&self, id: &ItemId) -> Result<()> {
        if self.settings.dry_run {
            tracing::info!(item_id = %id, "dry run, not deleting bot reply");
            return Ok(());
        }
        tracing::info!(item_id = %id, "deleting bot reply");
        self.platform.delete(id).await
    }
}

fn is_ignored(directives: &DirectiveSet) -> bool {
    directives.contains(Directive::Ignore) && !directives.contains(Directive::Force)
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
