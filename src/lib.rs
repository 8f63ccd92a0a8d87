//! ficbot: a reply agent that answers story recommendation requests on a
//! threaded discussion platform without ever answering the same thing twice.

pub mod compose;
pub mod config;
pub mod directives;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod linksub;
pub mod platform;
pub mod quota;
pub mod recommend;
pub mod scheduler;
pub mod stories;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Kind of a platform item, as encoded in its fullname prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Comment,
    Message,
    Submission,
}

impl ItemKind {
    /// Fullname prefix used by the platform for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ItemKind::Comment => "t1_",
            ItemKind::Message => "t4_",
            ItemKind::Submission => "t3_",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "t1_" => Some(ItemKind::Comment),
            "t3_" => Some(ItemKind::Submission),
            "t4_" => Some(ItemKind::Message),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Comment => write!(f, "comment"),
            ItemKind::Message => write!(f, "message"),
            ItemKind::Submission => write!(f, "submission"),
        }
    }
}

/// Legacy ledger prefix used for submissions before fullnames were stored.
const LEGACY_SUBMISSION_PREFIX: &str = "SUBMISSION_";

/// Canonical platform fullname (`t1_abc123`, `t3_xyz789`, ...).
///
/// Construction always canonicalises: legacy `SUBMISSION_<id>` keys become
/// `t3_<id>` and bare ids without a kind prefix are treated as comments.
/// Canonicalising an already canonical id is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn new(kind: ItemKind, base36: &str) -> Self {
        Self(format!("{}{}", kind.prefix(), base36))
    }

    pub fn comment(base36: &str) -> Self {
        Self::new(ItemKind::Comment, base36)
    }

    pub fn submission(base36: &str) -> Self {
        Self::new(ItemKind::Submission, base36)
    }

    pub fn message(base36: &str) -> Self {
        Self::new(ItemKind::Message, base36)
    }

    /// Parse a raw key, rewriting legacy formats into the canonical form.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(base36) = raw.strip_prefix(LEGACY_SUBMISSION_PREFIX) {
            return Self::submission(base36);
        }
        if has_kind_prefix(raw) {
            return Self(raw.to_string());
        }
        Self::comment(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Option<ItemKind> {
        self.0.get(..3).and_then(ItemKind::from_prefix)
    }

    /// The id without its kind prefix.
    pub fn base36(&self) -> &str {
        self.0.get(3..).unwrap_or_default()
    }
}

/// `t<digit>_` is the platform's fullname prefix shape.
fn has_kind_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() > 3 && bytes[0] == b't' && bytes[1].is_ascii_digit() && bytes[2] == b'_'
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for ItemId {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl From<&ItemId> for ItemId {
    fn from(id: &ItemId) -> Self {
        id.clone()
    }
}

impl From<&Item> for ItemId {
    fn from(item: &Item) -> Self {
        item.fullname()
    }
}

impl From<&Comment> for ItemId {
    fn from(comment: &Comment) -> Self {
        comment.fullname()
    }
}

impl From<&Submission> for ItemId {
    fn from(submission: &Submission) -> Self {
        submission.fullname()
    }
}

impl From<&Message> for ItemId {
    fn from(message: &Message) -> Self {
        message.fullname()
    }
}

/// A thread-starting post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    /// Base-36 id without prefix.
    pub id: String,
    /// `None` when the post was deleted.
    pub author: Option<String>,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub url: String,
    /// Root-level comments. Only populated by full fetches.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Submission {
    pub fn fullname(&self) -> ItemId {
        ItemId::submission(&self.id)
    }

    /// Every comment in the thread, depth first.
    pub fn flattened_comments(&self) -> Vec<&Comment> {
        let mut flat = Vec::new();
        for comment in &self.comments {
            comment.flatten_into(&mut flat);
        }
        flat
    }
}

/// A reply inside a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    /// Base-36 id without prefix.
    pub id: String,
    /// `None` when the comment was deleted.
    pub author: Option<String>,
    pub subreddit: String,
    pub body: String,
    /// Fullname of the comment or submission this replies to.
    pub parent_id: ItemId,
    /// Fullname of the submission the comment lives in.
    pub link_id: ItemId,
    /// Direct replies. Only populated by full fetches.
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn fullname(&self) -> ItemId {
        ItemId::comment(&self.id)
    }

    /// Root comments reply directly to the submission.
    pub fn is_root(&self) -> bool {
        self.parent_id.kind() == Some(ItemKind::Submission)
    }

    fn flatten_into<'a>(&'a self, flat: &mut Vec<&'a Comment>) {
        flat.push(self);
        for reply in &self.replies {
            reply.flatten_into(flat);
        }
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// A private message from the inbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Base-36 id without prefix.
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    /// Inbox entries that are really comment replies carry this flag.
    #[serde(default)]
    pub was_comment: bool,
}

impl Message {
    pub fn fullname(&self) -> ItemId {
        ItemId::message(&self.id)
    }
}

/// Anything the agent can ingest and act on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Submission(Submission),
    Comment(Comment),
    Message(Message),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Submission(_) => ItemKind::Submission,
            Item::Comment(_) => ItemKind::Comment,
            Item::Message(_) => ItemKind::Message,
        }
    }

    pub fn fullname(&self) -> ItemId {
        match self {
            Item::Submission(submission) => submission.fullname(),
            Item::Comment(comment) => comment.fullname(),
            Item::Message(message) => message.fullname(),
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Item::Submission(submission) => submission.author.as_deref(),
            Item::Comment(comment) => comment.author.as_deref(),
            Item::Message(message) => message.author.as_deref(),
        }
    }

    /// Request text: selftext for submissions, body otherwise.
    pub fn body(&self) -> &str {
        match self {
            Item::Submission(submission) => &submission.selftext,
            Item::Comment(comment) => &comment.body,
            Item::Message(message) => &message.body,
        }
    }

    /// Deleted items surface without an author and are never acted on.
    pub fn is_valid(&self) -> bool {
        self.author().is_some()
    }

    /// Usernames compare case-insensitively on the platform.
    pub fn is_authored_by(&self, username: &str) -> bool {
        self.author()
            .is_some_and(|author| author.eq_ignore_ascii_case(username))
    }
}

impl From<Submission> for Item {
    fn from(submission: Submission) -> Self {
        Item::Submission(submission)
    }
}

impl From<Comment> for Item {
    fn from(comment: Comment) -> Self {
        Item::Comment(comment)
    }
}

impl From<Message> for Item {
    fn from(message: Message) -> Self {
        Item::Message(message)
    }
}
