//! Splitting replies into platform-sized messages.

use std::borrow::Cow;

/// Consecutive slices of at most `limit` characters. Splits at fixed offsets, ignoring words.
#[derive(Debug, Clone)]
pub struct CharChunks<'a> {
    rest: &'a str,
    limit: usize,
}

impl<'a> CharChunks<'a> {
    pub fn new(text: &'a str, limit: usize) -> Self {
        Self {
            rest: text,
            limit: limit.max(1),
        }
    }
}

impl<'a> Iterator for CharChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .char_indices()
            .nth(self.limit)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}

/// Lazy sequence of outbound messages for one reply.
#[derive(Debug, Clone)]
pub enum Fragments<'a> {
    Chunks(CharChunks<'a>),
    Notice(Option<String>),
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Cow<'a, str>> {
        match self {
            Fragments::Chunks(chunks) => chunks.next().map(Cow::Borrowed),
            Fragments::Notice(notice) => notice.take().map(Cow::Owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks: Vec<&str> = CharChunks::new("hello", 2000).collect();
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn exact_limit_is_one_chunk() {
        let text = "a".repeat(2000);
        assert_eq!(CharChunks::new(&text, 2000).count(), 1);
    }

    #[test]
    fn long_text_splits_at_fixed_offsets() {
        let text: String = (0..4500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks: Vec<&str> = CharChunks::new(&text, 2000).collect();
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![2000, 2000, 500]
        );
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(5);
        let chunks: Vec<&str> = CharChunks::new(&text, 2).collect();
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert_eq!(CharChunks::new("", 2000).next(), None);
    }

    #[test]
    fn notice_yields_once() {
        let mut f = Fragments::Notice(Some("boom".to_string()));
        assert_eq!(f.next().as_deref(), Some("boom"));
        assert_eq!(f.next(), None);
    }
}
