//! Ready queue: illustrated books in display order plus a cursor.
//!
//! Entries before the cursor have been decided; entries at or after it are
//! waiting to be shown. Entries are only ever appended, never reordered, and
//! the cursor only moves forward.

use std::collections::HashSet;

use super::item::IllustratedBook;

#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Vec<IllustratedBook>,
    cursor: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, book: IllustratedBook) {
        self.entries.push(book);
    }

    /// The book at the cursor, if any
    pub fn current(&self) -> Option<&IllustratedBook> {
        self.entries.get(self.cursor)
    }

    /// Move past the current book and return it. `None` if nothing is current.
    pub fn advance(&mut self) -> Option<&IllustratedBook> {
        let decided = self.entries.get(self.cursor)?;
        self.cursor += 1;
        Some(decided)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Undecided books left, including the current one
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Decided books in display order
    pub fn history(&self) -> &[IllustratedBook] {
        &self.entries[..self.cursor]
    }

    /// Undecided books in display order
    pub fn upcoming(&self) -> &[IllustratedBook] {
        &self.entries[self.cursor..]
    }

    pub fn upcoming_titles(&self) -> HashSet<String> {
        self.upcoming()
            .iter()
            .map(|entry| entry.title().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::Book;

    fn illustrated(title: &str) -> IllustratedBook {
        IllustratedBook::from_bytes(
            Book::new(title, ""),
            format!("http://covers/{title}.jpg"),
            vec![1, 2, 3],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_queue_has_no_current() {
        let mut queue = ReadyQueue::new();
        assert!(queue.current().is_none());
        assert!(queue.advance().is_none());
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_cursor_advances_to_tail_and_stops() {
        let mut queue = ReadyQueue::new();
        queue.push(illustrated("A"));
        queue.push(illustrated("B"));

        assert_eq!(queue.advance().map(|b| b.title().to_string()), Some("A".into()));
        assert_eq!(queue.current().map(|b| b.title()), Some("B"));
        assert_eq!(queue.remaining(), 1);

        assert!(queue.advance().is_some());
        assert!(queue.advance().is_none());
        assert_eq!(queue.cursor(), 2);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_history_and_upcoming_split_at_cursor() {
        let mut queue = ReadyQueue::new();
        for title in ["A", "B", "C"] {
            queue.push(illustrated(title));
        }
        queue.advance();

        let history: Vec<_> = queue.history().iter().map(|b| b.title()).collect();
        let upcoming: Vec<_> = queue.upcoming().iter().map(|b| b.title()).collect();
        assert_eq!(history, vec!["A"]);
        assert_eq!(upcoming, vec!["B", "C"]);
        assert!(queue.upcoming_titles().contains("C"));
        assert!(!queue.upcoming_titles().contains("A"));
    }

    #[test]
    fn test_appending_after_exhaustion_resumes_at_new_entry() {
        let mut queue = ReadyQueue::new();
        queue.push(illustrated("A"));
        queue.advance();
        assert!(queue.current().is_none());

        queue.push(illustrated("B"));
        assert_eq!(queue.current().map(|b| b.title()), Some("B"));
        assert_eq!(queue.cursor(), 1);
    }
}
