//! Library store: shown history and liked books
//!
//! [`SqliteLibrary`] is the durable store used by the binary.
//! [`InMemoryLibrary`] has the same behavior without a database, for embedding
//! the engine and for tests.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::queue::{Book, DecisionSink, DecisionTag, FavoritesStore, ShownHistory};

/// Row in `liked_books`
#[derive(Debug, sqlx::FromRow)]
struct FavoriteRow {
    title: String,
    description: String,
    cover_url: Option<String>,
}

impl From<FavoriteRow> for Book {
    fn from(row: FavoriteRow) -> Self {
        Book {
            title: row.title,
            description: row.description,
            cover_url: row.cover_url,
        }
    }
}

/// SQLite-backed library
#[derive(Clone)]
pub struct SqliteLibrary {
    pool: SqlitePool,
}

impl SqliteLibrary {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ShownHistory for SqliteLibrary {
    async fn contains(&self, title: &str) -> Result<bool> {
        let shown: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shown_books WHERE title = ?)")
                .bind(title)
                .fetch_one(&self.pool)
                .await?;
        Ok(shown)
    }

    async fn add(&self, title: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO shown_books (title, shown_at) VALUES (?, ?) \
             ON CONFLICT(title) DO UPDATE SET shown_at = excluded.shown_at",
        )
        .bind(title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM shown_books")
            .execute(&self.pool)
            .await?;
        debug!("Cleared {} shown titles", result.rows_affected());
        Ok(())
    }
}

#[async_trait]
impl DecisionSink for SqliteLibrary {
    async fn persist_decision(&self, book: &Book, tag: DecisionTag) -> Result<()> {
        if tag != DecisionTag::Liked {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO liked_books (title, description, cover_url, liked_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(title) DO UPDATE SET \
                 description = excluded.description, \
                 cover_url = COALESCE(excluded.cover_url, liked_books.cover_url), \
                 liked_at = excluded.liked_at",
        )
        .bind(&book.title)
        .bind(&book.description)
        .bind(book.cover_url.as_deref())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FavoritesStore for SqliteLibrary {
    async fn favorites(&self) -> Result<Vec<Book>> {
        let rows: Vec<FavoriteRow> = sqlx::query_as(
            "SELECT title, description, cover_url FROM liked_books \
             ORDER BY liked_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Book::from).collect())
    }

    async fn remove_favorite(&self, title: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM liked_books WHERE title = ?")
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    shown: HashSet<String>,
    /// Oldest first
    liked: Vec<Book>,
}

/// Library kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryLibrary {
    state: Mutex<MemoryState>,
}

impl InMemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with these titles already marked as shown
    pub fn with_shown<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let library = Self::new();
        library.lock().shown.extend(titles.into_iter().map(Into::into));
        library
    }

    pub fn shown_titles(&self) -> HashSet<String> {
        self.lock().shown.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ShownHistory for InMemoryLibrary {
    async fn contains(&self, title: &str) -> Result<bool> {
        Ok(self.lock().shown.contains(title))
    }

    async fn add(&self, title: &str) -> Result<()> {
        self.lock().shown.insert(title.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().shown.clear();
        Ok(())
    }
}

#[async_trait]
impl DecisionSink for InMemoryLibrary {
    async fn persist_decision(&self, book: &Book, tag: DecisionTag) -> Result<()> {
        if tag == DecisionTag::Liked {
            let mut state = self.lock();
            state.liked.retain(|liked| liked.title != book.title);
            state.liked.push(book.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl FavoritesStore for InMemoryLibrary {
    async fn favorites(&self) -> Result<Vec<Book>> {
        Ok(self.lock().liked.iter().rev().cloned().collect())
    }

    async fn remove_favorite(&self, title: &str) -> Result<bool> {
        let mut state = self.lock();
        let before = state.liked.len();
        state.liked.retain(|liked| liked.title != title);
        Ok(state.liked.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::{create_pool, run_migrations};
    use std::time::Duration;

    async fn sqlite_library(dir: &tempfile::TempDir) -> SqliteLibrary {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("library.db").display()),
            max_connections: 2,
            connect_timeout: Duration::from_secs(5),
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteLibrary::new(pool)
    }

    #[tokio::test]
    async fn test_sqlite_shown_history_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let library = sqlite_library(&dir).await;

        assert!(!library.contains("Dune").await.unwrap());
        tokio_test::assert_ok!(library.add("Dune").await);
        // Re-adding an existing title is an upsert
        tokio_test::assert_ok!(library.add("Dune").await);
        assert!(library.contains("Dune").await.unwrap());

        tokio_test::assert_ok!(library.clear().await);
        assert!(!library.contains("Dune").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_only_likes_become_favorites() {
        let dir = tempfile::tempdir().unwrap();
        let library = sqlite_library(&dir).await;

        let dune = Book::new("Dune", "Spice").with_cover("http://covers/dune.jpg");
        library.persist_decision(&dune, DecisionTag::Liked).await.unwrap();
        library
            .persist_decision(&Book::new("Emma", ""), DecisionTag::Skipped)
            .await
            .unwrap();
        library
            .persist_decision(&Book::new("Ubik", ""), DecisionTag::Liked)
            .await
            .unwrap();

        let favorites = library.favorites().await.unwrap();
        let titles: Vec<_> = favorites.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Ubik", "Dune"]);
        assert_eq!(favorites[1].cover_url.as_deref(), Some("http://covers/dune.jpg"));

        assert!(library.remove_favorite("Dune").await.unwrap());
        assert!(!library.remove_favorite("Dune").await.unwrap());
        assert_eq!(library.favorites().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let library = sqlite_library(&dir).await;
            library.add("Dune").await.unwrap();
            library.pool().close().await;
        }
        let reopened = sqlite_library(&dir).await;
        assert!(reopened.contains("Dune").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_library_matches_sqlite_behavior() {
        let library = InMemoryLibrary::with_shown(["Dune"]);
        assert!(library.contains("Dune").await.unwrap());

        let emma = Book::new("Emma", "");
        library.persist_decision(&emma, DecisionTag::Liked).await.unwrap();
        library
            .persist_decision(&Book::new("Ubik", ""), DecisionTag::Liked)
            .await
            .unwrap();
        // Liking again moves it to the front
        library.persist_decision(&emma, DecisionTag::Liked).await.unwrap();

        let titles: Vec<_> = library
            .favorites()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["Emma", "Ubik"]);

        library.clear().await.unwrap();
        assert!(library.shown_titles().is_empty());
        assert!(library.remove_favorite("Ubik").await.unwrap());
    }
}
