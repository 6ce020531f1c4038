//! Recommendation API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::build_client;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::queue::{Book, RecommendationSource};

#[derive(Serialize)]
struct RecommendationRequest<'a> {
    liked: &'a [Book],
    disliked: &'a [Book],
}

#[derive(Deserialize)]
struct Candidate {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

/// The API answers with either a bare list or `{ "books": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RecommendationResponse {
    List(Vec<Candidate>),
    Wrapped { books: Vec<Candidate> },
}

impl RecommendationResponse {
    fn into_books(self) -> Vec<Book> {
        let candidates = match self {
            RecommendationResponse::List(books) => books,
            RecommendationResponse::Wrapped { books } => books,
        };
        candidates
            .into_iter()
            .filter_map(|candidate| {
                let title = candidate.title.trim();
                if title.is_empty() {
                    return None;
                }
                Some(Book::new(
                    title,
                    candidate.description.unwrap_or_default().trim(),
                ))
            })
            .collect()
    }
}

/// POSTs the session's preferences to the recommendation API
#[derive(Clone)]
pub struct HttpRecommendationSource {
    client: Client,
    url: String,
}

impl HttpRecommendationSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RecommendationSource for HttpRecommendationSource {
    #[instrument(skip_all, fields(liked = liked.len(), disliked = disliked.len()))]
    async fn fetch_recommendations(&self, liked: &[Book], disliked: &[Book]) -> Result<Vec<Book>> {
        let response = self
            .client
            .post(&self.url)
            .json(&RecommendationRequest { liked, disliked })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                service: "recommendations",
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let parsed: RecommendationResponse =
            serde_json::from_slice(&body).map_err(|e| Error::InvalidFormat {
                message: format!("unexpected recommendation response: {}", e).into(),
            })?;

        let books = parsed.into_books();
        debug!("Recommendation API returned {} books", books.len());
        Ok(books)
    }
}
