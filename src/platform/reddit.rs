//! Reddit adapter over the OAuth JSON API.
//!
//! Uses the script-app password grant, so the bot account's own credentials
//! are enough. Streams are emulated the same way the classic helpers do it:
//! poll the newest listing on a timer and yield ids not seen before.

use crate::error::{PlatformError, Result};
use crate::platform::traits::{ItemStream, Platform};
use crate::{Comment, Item, ItemId, ItemKind, Message, Submission};

use anyhow::Context as _;
use serde::Deserialize;
use tokio::sync::RwLock;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Author placeholder the API uses for deleted content.
const DELETED_AUTHOR: &str = "[deleted]";

/// How many recent ids a stream remembers to suppress repeats.
const STREAM_MEMORY: usize = 1000;

/// Credentials and client settings for the Reddit adapter.
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    /// Refresh a minute early to avoid racing the expiry.
    fn is_expired(&self) -> bool {
        Instant::now() + Duration::from_secs(60) >= self.expires_at
    }
}

struct Inner {
    http: reqwest::Client,
    credentials: RedditCredentials,
    token: RwLock<Option<AccessToken>>,
    stream_interval: Duration,
}

/// Reddit client. Cheap to clone.
#[derive(Clone)]
pub struct RedditClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("username", &self.inner.credentials.username)
            .finish_non_exhaustive()
    }
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, stream_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(credentials.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                credentials,
                token: RwLock::new(None),
                stream_interval,
            }),
        })
    }

    async fn login(&self) -> Result<AccessToken> {
        let credentials = &self.inner.credentials;
        tracing::info!(username = %credentials.username, "logging in");

        let response = self
            .inner
            .http
            .post(TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .context("failed to send login request")?;

        let status = response.status();
        let body = response.text().await.context("failed to read login response")?;
        if !status.is_success() {
            return Err(PlatformError::AuthFailed(format!("{status}: {body}")).into());
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|error| PlatformError::AuthFailed(format!("{error}: {body}")))?;
        tracing::info!(username = %credentials.username, "logged in");

        Ok(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.inner.token.read().await.as_ref()
            && !token.is_expired()
        {
            return Ok(token.value.clone());
        }

        let token = self.login().await?;
        let value = token.value.clone();
        *self.inner.token.write().await = Some(token);
        Ok(value)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let bearer = self.bearer().await?;
        let url = format!("{API_BASE}{path}");
        let response = self
            .inner
            .http
            .get(&url)
            .bearer_auth(bearer)
            .query(&[("raw_json", "1".to_string())])
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        decode(response, path).await
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<()> {
        let bearer = self.bearer().await?;
        let url = format!("{API_BASE}{path}");
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(bearer)
            .form(form)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("POST {path} returned {status}: {body}");
            return Err(PlatformError::Request(reason).into());
        }
        Ok(())
    }

    async fn info(&self, id: &ItemId) -> Result<Item> {
        let listing: Listing = self
            .get("/api/info", &[("id", id.to_string())])
            .await?;
        listing
            .into_items()
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound { id: id.to_string() }.into())
    }

    fn stream(&self, feed: Feed, subreddits: Vec<String>, limit: usize) -> ItemStream {
        let client = self.clone();
        let interval = self.inner.stream_interval;

        Box::pin(async_stream::stream! {
            let mut seen = RecentIds::new(STREAM_MEMORY);
            loop {
                let batch = match feed {
                    Feed::Comments => client
                        .new_comments(&subreddits, limit)
                        .await
                        .map(|comments| {
                            comments.into_iter().map(Item::Comment).collect::<Vec<_>>()
                        }),
                    Feed::Submissions => client
                        .new_submissions(&subreddits, limit)
                        .await
                        .map(|submissions| {
                            submissions.into_iter().map(Item::Submission).collect::<Vec<_>>()
                        }),
                };

                let items = match batch {
                    Ok(items) => items,
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                };

                // Listings are newest first; emit in posting order.
                for item in items.into_iter().rev() {
                    if seen.insert(item.fullname()) {
                        yield Ok(item);
                    }
                }

                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Comments,
    Submissions,
}

/// Bounded set of recently seen ids, oldest evicted first.
struct RecentIds {
    capacity: usize,
    order: VecDeque<ItemId>,
    members: HashSet<ItemId>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    fn insert(&mut self, id: ItemId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.members.remove(&evicted);
        }
        true
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    path: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed to read response for {path}"))?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PlatformError::NotFound { id: path.to_string() }.into());
    }
    if !status.is_success() {
        return Err(PlatformError::Request(format!("GET {path} returned {status}: {body}")).into());
    }

    serde_json::from_str(&body)
        .map_err(|error| PlatformError::Decode(format!("{path}: {error}")).into())
}

fn multireddit(subreddits: &[String]) -> String {
    subreddits.join("+")
}

impl Platform for RedditClient {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn authenticate(&self) -> Result<()> {
        let token = self.login().await?;
        *self.inner.token.write().await = Some(token);
        Ok(())
    }

    async fn new_submissions(
        &self,
        subreddits: &[String],
        limit: usize,
    ) -> Result<Vec<Submission>> {
        let path = format!("/r/{}/new", multireddit(subreddits));
        let listing: Listing = self.get(&path, &[("limit", limit.to_string())]).await?;
        Ok(listing
            .into_items()
            .into_iter()
            .filter_map(|item| match item {
                Item::Submission(submission) => Some(submission),
                _ => None,
            })
            .collect())
    }

    async fn new_comments(&self, subreddits: &[String], limit: usize) -> Result<Vec<Comment>> {
        let path = format!("/r/{}/comments", multireddit(subreddits));
        let listing: Listing = self.get(&path, &[("limit", limit.to_string())]).await?;
        Ok(listing
            .into_items()
            .into_iter()
            .filter_map(|item| match item {
                Item::Comment(comment) => Some(comment),
                _ => None,
            })
            .collect())
    }

    async fn unread_messages(&self) -> Result<Vec<Message>> {
        let listing: Listing = self.get("/message/unread", &[]).await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(Thing::into_message)
            .collect())
    }

    async fn fetch(&self, id: &ItemId) -> Result<Item> {
        self.info(id).await
    }

    async fn fetch_full(&self, id: &ItemId) -> Result<Item> {
        match id.kind() {
            Some(ItemKind::Submission) => {
                let path = format!("/comments/{}", id.base36());
                let (submission, comments): (Listing, Listing) =
                    self.get(&path, &[("limit", "500".to_string())]).await?;
                let Some(Item::Submission(mut submission)) =
                    submission.into_items().into_iter().next()
                else {
                    return Err(PlatformError::NotFound { id: id.to_string() }.into());
                };
                submission.comments = comments
                    .into_items()
                    .into_iter()
                    .filter_map(|item| match item {
                        Item::Comment(comment) => Some(comment),
                        _ => None,
                    })
                    .collect();
                Ok(Item::Submission(submission))
            }
            Some(ItemKind::Comment) => {
                // Replies only come back through the thread endpoint.
                let Item::Comment(comment) = self.info(id).await? else {
                    return Err(PlatformError::NotFound { id: id.to_string() }.into());
                };
                let path = format!("/comments/{}", comment.link_id.base36());
                let (_, thread): (Listing, Listing) = self
                    .get(&path, &[("comment", id.base36().to_string())])
                    .await?;
                thread
                    .into_items()
                    .into_iter()
                    .find(|item| item.fullname() == *id)
                    .ok_or_else(|| PlatformError::NotFound { id: id.to_string() }.into())
            }
            Some(ItemKind::Message) | None => {
                tracing::error!(item_id = %id, "cannot determine comment vs submission");
                Err(PlatformError::NotFound { id: id.to_string() }.into())
            }
        }
    }

    async fn reply(&self, target: &ItemId, text: &str) -> Result<()> {
        self.post(
            "/api/comment",
            &[("api_type", "json"), ("thing_id", target.as_str()), ("text", text)],
        )
        .await
    }

    async fn delete(&self, id: &ItemId) -> Result<()> {
        self.post("/api/del", &[("id", id.as_str())]).await
    }

    async fn mark_read(&self, message: &Message) -> Result<()> {
        let fullname = if message.was_comment {
            ItemId::comment(&message.id)
        } else {
            message.fullname()
        };
        self.post("/api/read_message", &[("id", fullname.as_str())])
            .await
    }

    fn comment_stream(&self, subreddits: Vec<String>, limit: usize) -> ItemStream {
        self.stream(Feed::Comments, subreddits, limit)
    }

    fn submission_stream(&self, subreddits: Vec<String>, limit: usize) -> ItemStream {
        self.stream(Feed::Submissions, subreddits, limit)
    }
}

// -- Wire types -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

impl Listing {
    fn into_items(self) -> Vec<Item> {
        self.data
            .children
            .into_iter()
            .filter_map(Thing::into_item)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "data")]
enum Thing {
    #[serde(rename = "t1")]
    Comment(RawComment),
    #[serde(rename = "t3")]
    Link(RawLink),
    #[serde(rename = "t4")]
    Message(RawMessage),
    #[serde(rename = "more")]
    More(serde::de::IgnoredAny),
}

impl Thing {
    fn into_item(self) -> Option<Item> {
        match self {
            Thing::Comment(raw) => Some(Item::Comment(raw.into_comment())),
            Thing::Link(raw) => Some(Item::Submission(raw.into_submission())),
            Thing::Message(raw) => Some(Item::Message(raw.into_message())),
            Thing::More(_) => None,
        }
    }

    /// Inbox entries: comment replies show up as `t1` with `was_comment`.
    fn into_message(self) -> Option<Message> {
        match self {
            Thing::Message(raw) => Some(raw.into_message()),
            Thing::Comment(raw) => Some(Message {
                id: raw.id,
                author: author(raw.author),
                body: raw.body,
                was_comment: true,
            }),
            Thing::Link(_) | Thing::More(_) => None,
        }
    }
}

fn author(raw: Option<String>) -> Option<String> {
    raw.filter(|name| name != DELETED_AUTHOR)
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    link_id: String,
    /// Either an empty string or a nested listing.
    #[serde(default)]
    replies: serde_json::Value,
}

impl RawComment {
    fn into_comment(self) -> Comment {
        let replies = match self.replies {
            serde_json::Value::Object(_) => serde_json::from_value::<Listing>(self.replies)
                .map(|listing| {
                    listing
                        .into_items()
                        .into_iter()
                        .filter_map(|item| match item {
                            Item::Comment(comment) => Some(comment),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_else(|error| {
                    tracing::warn!(comment_id = %self.id, %error, "failed to decode replies");
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        Comment {
            author: author(self.author),
            subreddit: self.subreddit,
            body: self.body,
            parent_id: ItemId::parse(&self.parent_id),
            link_id: ItemId::parse(&self.link_id),
            replies,
            id: self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLink {
    id: String,
    author: Option<String>,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
}

impl RawLink {
    fn into_submission(self) -> Submission {
        Submission {
            id: self.id,
            author: author(self.author),
            subreddit: self.subreddit,
            title: self.title,
            selftext: self.selftext,
            url: self.url,
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    was_comment: bool,
}

impl RawMessage {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            author: author(self.author),
            body: self.body,
            was_comment: self.was_comment,
        }
    }
}
