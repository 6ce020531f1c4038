//! Open Library cover lookup

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::build_client;
use crate::config::CoverConfig;
use crate::error::{Error, Result};
use crate::queue::CoverResolver;

const SEARCH_LIMIT: &str = "5";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Deserialize)]
struct SearchDoc {
    cover_i: Option<i64>,
}

/// Resolves a title to an Open Library cover image URL
#[derive(Clone)]
pub struct OpenLibraryCovers {
    client: Client,
    search_url: String,
    image_base_url: String,
    size: String,
}

impl OpenLibraryCovers {
    pub fn new(config: &CoverConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            search_url: config.search_url.clone(),
            image_base_url: config.image_base_url.clone(),
            size: config.size.clone(),
        })
    }

    fn cover_url(&self, cover_id: i64) -> String {
        format!("{}/b/id/{}-{}.jpg", self.image_base_url, cover_id, self.size)
    }
}

#[async_trait]
impl CoverResolver for OpenLibraryCovers {
    #[instrument(skip(self))]
    async fn resolve_cover(&self, title: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("title", title), ("limit", SEARCH_LIMIT), ("fields", "cover_i")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                service: "covers",
                status: status.as_u16(),
            });
        }

        let search: SearchResponse = response.json().await?;
        let cover = search
            .docs
            .iter()
            .find_map(|doc| doc.cover_i)
            .map(|id| self.cover_url(id));

        debug!("Cover for \"{}\": {:?}", title, cover);
        Ok(cover)
    }
}
