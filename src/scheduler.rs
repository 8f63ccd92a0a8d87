//! Ingestion scheduler: feed platform items to the dispatcher.
//!
//! Polling mode walks bounded listings of new submissions, new comments and
//! unread messages, then sleeps. Streaming mode spawns one task per feed that
//! forwards items into a shared queue drained by a single consumer, so the
//! ledger and quota tracker keep exactly one writer.

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::platform::{ItemStream, Platform};
use crate::recommend::Recommender;
use crate::Item;

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use tokio::sync::mpsc;

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Polling,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub mode: Mode,
    /// Sleep between polling passes.
    pub poll_interval: Duration,
    /// Pause after a failed pass or a crashed run.
    pub error_backoff: Duration,
    pub submission_limit: usize,
    pub comment_limit: usize,
    /// Listing size each streaming feed polls with.
    pub stream_limit: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Polling,
            poll_interval: Duration::from_secs(15),
            error_backoff: Duration::from_secs(30),
            submission_limit: 50,
            comment_limit: 100,
            stream_limit: 100,
        }
    }
}

/// What one polling pass saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub submissions: usize,
    pub comments: usize,
    pub messages: usize,
    /// Items whose dispatch failed and was skipped.
    pub failures: usize,
}

impl PassSummary {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            submissions: 0,
            comments: 0,
            messages: 0,
            failures: 0,
        }
    }
}

/// Message on the streaming queue. A fault ends the run.
#[derive(Debug)]
enum Envelope {
    Item(Item),
    Fault { feed: &'static str, reason: String },
}

pub struct Scheduler<P, R> {
    settings: SchedulerSettings,
    dispatcher: Dispatcher<P, R>,
}

impl<P: Platform, R: Recommender> Scheduler<P, R> {
    pub fn new(settings: SchedulerSettings, dispatcher: Dispatcher<P, R>) -> Self {
        Self {
            settings,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<P, R> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<P, R> {
        &mut self.dispatcher
    }

    /// Run until the process is stopped. Each failed run is logged, the ledger
    /// is saved, and after a pause the next run starts from a fresh login.
    pub async fn run_forever(&mut self) {
        loop {
            let error = match self.run().await {
                Ok(()) => {
                    tracing::warn!("scheduler run ended without error, restarting");
                    continue;
                }
                Err(error) => error,
            };

            match &error {
                Error::StreamFault { feed, reason } => {
                    tracing::error!(%feed, %reason, "ingestion feed crashed, restarting scheduler");
                }
                _ => tracing::error!(%error, "scheduler run failed"),
            }

            if let Err(error) = self.dispatcher.ledger().save() {
                tracing::error!(%error, "failed to save ledger");
            }
            tokio::time::sleep(self.settings.error_backoff).await;
        }
    }

    /// Log in and run the configured mode once. Polling never returns `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        let platform = self.dispatcher.platform().clone();
        platform.authenticate().await?;
        tracing::info!(
            platform = platform.name(),
            mode = ?self.settings.mode,
            subreddits = ?self.dispatcher.settings().subreddits,
            "scheduler started"
        );

        match self.settings.mode {
            Mode::Polling => loop {
                match self.run_pass().await {
                    Ok(_) => tokio::time::sleep(self.settings.poll_interval).await,
                    Err(error) => {
                        tracing::error!(%error, "polling pass failed");
                        tokio::time::sleep(self.settings.error_backoff).await;
                    }
                }
            },
            Mode::Streaming => self.run_streaming().await,
        }
    }

    /// One polling pass: submissions, then comments, then unread messages.
    /// A failing listing aborts the rest of the pass; failing items do not.
    pub async fn run_pass(&mut self) -> Result<PassSummary> {
        let platform = self.dispatcher.platform().clone();
        let subreddits = self.dispatcher.settings().subreddits.clone();
        let mut summary = PassSummary::new();

        tracing::info!("parsing new submissions");
        let submissions = platform
            .new_submissions(&subreddits, self.settings.submission_limit)
            .await?;
        summary.submissions = submissions.len();
        for submission in submissions {
            summary.failures += self.dispatch_logged(submission.into()).await;
        }

        tracing::info!("parsing new comments");
        let comments = platform
            .new_comments(&subreddits, self.settings.comment_limit)
            .await?;
        summary.comments = comments.len();
        for comment in comments {
            summary.failures += self.dispatch_logged(comment.into()).await;
        }

        tracing::info!("parsing unread messages");
        let messages = platform.unread_messages().await?;
        summary.messages = messages.len();
        for message in messages {
            summary.failures += self.dispatch_logged(message.into()).await;
        }

        tracing::info!(
            submissions = summary.submissions,
            comments = summary.comments,
            messages = summary.messages,
            failures = summary.failures,
            elapsed_ms = (Utc::now() - summary.started_at).num_milliseconds(),
            "polling pass complete"
        );
        Ok(summary)
    }

    /// Drain both feeds through one consumer until a feed faults.
    pub async fn run_streaming(&mut self) -> Result<()> {
        let platform = self.dispatcher.platform().clone();
        let subreddits = self.dispatcher.settings().subreddits.clone();
        let limit = self.settings.stream_limit;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let feeds = [
            ("comments", platform.comment_stream(subreddits.clone(), limit)),
            ("submissions", platform.submission_stream(subreddits, limit)),
        ];
        let producers: Vec<_> = feeds
            .into_iter()
            .map(|(feed, stream)| tokio::spawn(forward(feed, stream, tx.clone())))
            .collect();
        drop(tx);

        let outcome = loop {
            match rx.recv().await {
                Some(Envelope::Item(item)) => {
                    self.dispatch_logged(item).await;
                }
                Some(Envelope::Fault { feed, reason }) => {
                    break Err(Error::StreamFault { feed, reason });
                }
                None => {
                    break Err(Error::StreamFault {
                        feed: "all",
                        reason: "every feed closed".into(),
                    });
                }
            }
        };

        for producer in producers {
            producer.abort();
        }
        outcome
    }

    /// Dispatch `item`, logging instead of propagating failures. Returns the
    /// number of failures (0 or 1).
    async fn dispatch_logged(&mut self, item: Item) -> usize {
        let id = item.fullname();
        match self.dispatcher.handle(item).await {
            Ok(()) => 0,
            Err(error) => {
                tracing::error!(item_id = %id, %error, "failed to handle item");
                1
            }
        }
    }
}

/// Forward one feed into the queue. Any error or the end of the feed is
/// reported as a fault.
async fn forward(
    feed: &'static str,
    mut stream: ItemStream,
    tx: mpsc::UnboundedSender<Envelope>,
) {
    while let Some(next) = stream.next().await {
        let envelope = match next {
            Ok(item) => {
                tracing::debug!(feed, item_id = %item.fullname(), "queueing item");
                Envelope::Item(item)
            }
            Err(error) => Envelope::Fault {
                feed,
                reason: error.to_string(),
            },
        };
        let fault = matches!(envelope, Envelope::Fault { .. });
        if tx.send(envelope).is_err() || fault {
            return;
        }
    }

    let _ = tx.send(Envelope::Fault {
        feed,
        reason: "feed ended".into(),
    });
}
