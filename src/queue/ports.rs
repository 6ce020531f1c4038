//! Collaborator ports the queue engine depends on.
//!
//! Each port is a boundary to something slow or durable: the recommendation
//! API, the cover lookup, the image host and the library store. Timeouts are
//! the implementation's responsibility; the engine treats a timeout like any
//! other failure.

use async_trait::async_trait;

use super::item::{Book, DecisionTag};
use crate::error::Result;

/// Remote source of recommendation batches
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn fetch_recommendations(&self, liked: &[Book], disliked: &[Book]) -> Result<Vec<Book>>;
}

/// Finds a cover image locator for a title. `Ok(None)` means no cover exists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoverResolver: Send + Sync {
    async fn resolve_cover(&self, title: &str) -> Result<Option<String>>;
}

/// Downloads cover image bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Durable set of titles already shown in the current epoch
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShownHistory: Send + Sync {
    async fn contains(&self, title: &str) -> Result<bool>;
    async fn add(&self, title: &str) -> Result<()>;
    /// Start a new epoch
    async fn clear(&self) -> Result<()>;
}

/// Persistence hook for like/skip decisions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn persist_decision(&self, book: &Book, tag: DecisionTag) -> Result<()>;
}

/// Liked books kept by the library store
#[async_trait]
pub trait FavoritesStore: Send + Sync {
    /// Liked books, newest first
    async fn favorites(&self) -> Result<Vec<Book>>;
    /// Remove a liked book; returns false if it was not stored
    async fn remove_favorite(&self, title: &str) -> Result<bool>;
}
