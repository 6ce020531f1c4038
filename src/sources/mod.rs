//! HTTP implementations of the engine's collaborator ports.

pub mod covers;
pub mod images;
pub mod recommendations;

pub use covers::OpenLibraryCovers;
pub use images::HttpImageFetcher;
pub use recommendations::HttpRecommendationSource;

use crate::error::{Error, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("shelfie-engine/", env!("CARGO_PKG_VERSION"));

/// Shared reqwest client builder for the collaborators
fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Http {
            message: format!("Failed to build HTTP client: {}", e).into(),
            source: Some(e),
        })
}
