//! Cover image downloads

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::instrument;

use super::build_client;
use crate::config::ImageConfig;
use crate::error::{Error, Result};
use crate::queue::ImageFetcher;

#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[instrument(skip(self))]
    async fn fetch_image(&self, locator: &str) -> Result<Vec<u8>> {
        let fail = |message: String| Error::image_fetch(locator, message);

        let mut response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("status {}", status.as_u16())));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with("image/") {
                return Err(fail(format!("unexpected content type '{}'", content_type)));
            }
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_bytes {
                return Err(fail(format!("{} bytes exceeds limit", length)));
            }
        }

        // Chunked responses carry no length, so the limit is enforced while reading
        let mut body = Vec::with_capacity(
            response
                .content_length()
                .map_or(0, |length| length as usize),
        );
        while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(fail(format!(
                    "more than {} bytes, limit exceeded",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(fail("empty image body".to_string()));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    fn fetcher(max_bytes: usize) -> HttpImageFetcher {
        HttpImageFetcher::new(&ImageConfig {
            timeout: Duration::from_secs(2),
            max_bytes,
        })
        .unwrap()
    }

    async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_downloads_image_bytes() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/ok.jpg",
            ResponseTemplate::new(200).set_body_raw(JPEG.to_vec(), "image/jpeg"),
        )
        .await;

        let bytes = fetcher(1024)
            .fetch_image(&format!("{}/ok.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, JPEG);
    }

    /// Serve one chunked response with no Content-Length and return its URL
    async fn serve_chunked(chunks: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let mut response = b"HTTP/1.1 200 OK\r\n\
                Content-Type: image/jpeg\r\n\
                Transfer-Encoding: chunked\r\n\
                Connection: close\r\n\r\n"
                .to_vec();
            for chunk in chunks {
                response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                response.extend_from_slice(&chunk);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/cover.jpg", addr)
    }

    #[tokio::test]
    async fn test_chunked_body_within_limit() {
        let url = serve_chunked(vec![JPEG[..3].to_vec(), JPEG[3..].to_vec()]).await;
        let bytes = fetcher(1024).fetch_image(&url).await.unwrap();
        assert_eq!(bytes, JPEG);
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit_is_rejected() {
        let url = serve_chunked(vec![vec![0xFF; 24], vec![0xFF; 24], vec![0xFF; 24]]).await;
        let err = fetcher(32).fetch_image(&url).await.unwrap_err();
        match err {
            Error::ImageFetchFailed { message, .. } => {
                assert!(message.contains("limit"), "unexpected message {message}")
            }
            other => panic!("expected ImageFetchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_unusable_responses() {
        let server = MockServer::start().await;
        serve(&server, "/missing.jpg", ResponseTemplate::new(404)).await;
        serve(
            &server,
            "/page.jpg",
            ResponseTemplate::new(200).set_body_raw(b"<html>".to_vec(), "text/html"),
        )
        .await;
        serve(
            &server,
            "/empty.jpg",
            ResponseTemplate::new(200).set_body_raw(Vec::new(), "image/jpeg"),
        )
        .await;
        serve(
            &server,
            "/huge.jpg",
            ResponseTemplate::new(200).set_body_raw(vec![0xFF; 64], "image/jpeg"),
        )
        .await;

        let fetcher = fetcher(32);
        for route in ["missing", "page", "empty", "huge"] {
            let err = fetcher
                .fetch_image(&format!("{}/{}.jpg", server.uri(), route))
                .await
                .unwrap_err();
            assert!(
                matches!(err, Error::ImageFetchFailed { .. }),
                "{route}: unexpected {err:?}"
            );
        }
    }
}
