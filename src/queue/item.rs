//! Books, covers and decisions
//!
//! A [`Book`] is identified by its title. Once a cover has been resolved and
//! downloaded it becomes an [`IllustratedBook`], the only form the ready queue
//! accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A recommended book
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl Book {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            cover_url: None,
        }
    }

    /// Returns a copy carrying the resolved cover locator
    pub fn with_cover(self, locator: impl Into<String>) -> Self {
        Self {
            cover_url: Some(locator.into()),
            ..self
        }
    }
}

/// Downloaded cover image bytes, cheap to clone
#[derive(Clone, PartialEq, Eq)]
pub struct CoverImage(Arc<[u8]>);

impl CoverImage {
    /// Wrap downloaded bytes; an empty body is not a usable cover.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            None
        } else {
            Some(Self(Arc::from(bytes)))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best-effort MIME type from the leading magic bytes
    pub fn content_type(&self) -> &'static str {
        match self.as_bytes() {
            [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
            [0x89, b'P', b'N', b'G', ..] => "image/png",
            [b'G', b'I', b'F', b'8', ..] => "image/gif",
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Debug for CoverImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverImage")
            .field("len", &self.len())
            .field("content_type", &self.content_type())
            .finish()
    }
}

/// A book paired with its downloaded cover, ready to display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllustratedBook {
    book: Book,
    cover: CoverImage,
}

impl IllustratedBook {
    /// Attach a cover to a book. The locator is recorded on the book.
    pub fn new(book: Book, locator: impl Into<String>, cover: CoverImage) -> Self {
        Self {
            book: book.with_cover(locator),
            cover,
        }
    }

    /// Build from raw downloaded bytes, rejecting empty bodies
    pub fn from_bytes(book: Book, locator: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let locator = locator.into();
        match CoverImage::new(bytes) {
            Some(cover) => Ok(Self::new(book, locator, cover)),
            None => Err(Error::image_fetch(locator, "empty image body")),
        }
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn title(&self) -> &str {
        &self.book.title
    }

    pub fn cover(&self) -> &CoverImage {
        &self.cover
    }

    pub fn into_book(self) -> Book {
        self.book
    }
}

/// Like/skip tag for a decided book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTag {
    Liked,
    Skipped,
}

impl fmt::Display for DecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionTag::Liked => write!(f, "liked"),
            DecisionTag::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for DecisionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liked" | "like" => Ok(DecisionTag::Liked),
            "skipped" | "skip" => Ok(DecisionTag::Skipped),
            other => Err(Error::bad_request(format!("unknown decision tag '{}'", other))),
        }
    }
}

/// A recorded decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub book: Book,
    pub tag: DecisionTag,
    /// Ready-queue index the decision was made at
    pub position: usize,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cover_rejected() {
        assert!(CoverImage::new(Vec::new()).is_none());

        let err = IllustratedBook::from_bytes(Book::new("Dune", ""), "http://c/1.jpg", vec![])
            .unwrap_err();
        assert!(matches!(err, Error::ImageFetchFailed { .. }));
    }

    #[test]
    fn test_illustration_attaches_locator() {
        let ready = IllustratedBook::from_bytes(
            Book::new("Dune", "Spice"),
            "http://c/1.jpg",
            vec![0xFF, 0xD8, 0xFF, 0xE0],
        )
        .expect("non-empty cover");

        assert_eq!(ready.book().cover_url.as_deref(), Some("http://c/1.jpg"));
        assert_eq!(ready.cover().content_type(), "image/jpeg");
        assert_eq!(ready.title(), "Dune");
    }

    #[test]
    fn test_content_type_sniffing() {
        let png = CoverImage::new(vec![0x89, b'P', b'N', b'G', 0x0D]).unwrap();
        assert_eq!(png.content_type(), "image/png");

        let webp = CoverImage::new(b"RIFF\0\0\0\0WEBPVP8 ".to_vec()).unwrap();
        assert_eq!(webp.content_type(), "image/webp");

        let unknown = CoverImage::new(vec![1, 2, 3]).unwrap();
        assert_eq!(unknown.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_decision_tag_parsing() {
        assert_eq!("liked".parse::<DecisionTag>().unwrap(), DecisionTag::Liked);
        assert_eq!(" Skip ".parse::<DecisionTag>().unwrap(), DecisionTag::Skipped);
        assert!("maybe".parse::<DecisionTag>().is_err());
        assert_eq!(DecisionTag::Liked.to_string(), "liked");
    }

    #[test]
    fn test_book_deserializes_without_optional_fields() {
        let book: Book = serde_json::from_str(r#"{"title":"Dune"}"#).unwrap();
        assert_eq!(book, Book::new("Dune", ""));
    }
}
