//! Recommendation generator seam.
//!
//! The agent never renders story content itself. It hands the request text
//! and its directives to a [`Recommender`] and gets back either reply
//! segments or an explicit story-limit rejection.

use crate::directives::DirectiveSet;
use crate::error::{RecommendError, Result};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use std::future::Future;

/// Everything the generator needs to answer one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationRequest {
    pub body: String,
    pub directives: DirectiveSet,
    /// Extra request lines, e.g. links extracted from a submission URL.
    pub additions: Vec<String>,
    /// Maximum number of stories a single request may ask for.
    pub story_limit: usize,
}

/// Outcome of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Pre-segmented reply text; each segment fits one message.
    Segments(Vec<String>),
    /// The request named more stories than allowed.
    StoryLimitExceeded { requested: usize, limit: usize },
}

/// Turns request text into formatted recommendation text.
pub trait Recommender: Send + Sync + 'static {
    fn generate(
        &self,
        request: &RecommendationRequest,
    ) -> impl Future<Output = Result<Generation>> + Send;

    /// Request lines derived from a submission's URL.
    fn direct_links(
        &self,
        url: &str,
        directives: &DirectiveSet,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        let _ = (url, directives);
        async { Ok(Vec::new()) }
    }
}

/// Recommender backed by an HTTP service.
///
/// `POST {endpoint}/recommend` answers with either
/// `{"status": "ok", "segments": [...]}` or
/// `{"status": "story_limit_exceeded", "requested": n}`.
/// `POST {endpoint}/links` answers with `{"links": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpRecommender {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    body: &'a str,
    directives: Vec<&'static str>,
    additions: &'a [String],
    story_limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum GenerateResponse {
    Ok { segments: Vec<String> },
    StoryLimitExceeded { requested: usize },
}

#[derive(Debug, Serialize)]
struct LinksBody<'a> {
    url: &'a str,
    directives: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct LinksResponse {
    #[serde(default)]
    links: Vec<String>,
}

impl HttpRecommender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach recommender at {url}"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read recommender response")?;

        if !status.is_success() {
            return Err(RecommendError::Request(format!("{status}: {text}")).into());
        }

        Ok(serde_json::from_str(&text).context("failed to parse recommender response")?)
    }
}

fn directive_names(directives: &DirectiveSet) -> Vec<&'static str> {
    directives.iter().map(|directive| directive.as_str()).collect()
}

impl Recommender for HttpRecommender {
    async fn generate(&self, request: &RecommendationRequest) -> Result<Generation> {
        let body = GenerateBody {
            body: &request.body,
            directives: directive_names(&request.directives),
            additions: &request.additions,
            story_limit: request.story_limit,
        };

        let response: GenerateResponse = self.post("recommend", &body).await?;
        Ok(match response {
            GenerateResponse::Ok { segments } => Generation::Segments(segments),
            GenerateResponse::StoryLimitExceeded { requested } => Generation::StoryLimitExceeded {
                requested,
                limit: request.story_limit,
            },
        })
    }

    async fn direct_links(&self, url: &str, directives: &DirectiveSet) -> Result<Vec<String>> {
        let body = LinksBody {
            url,
            directives: directive_names(directives),
        };
        let response: LinksResponse = self.post("links", &body).await?;
        Ok(response.links)
    }
}
