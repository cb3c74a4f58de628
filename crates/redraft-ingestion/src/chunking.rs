//! Text Chunking Module
//!
//! Splits extracted text into chunks no longer than a character budget,
//! preferring paragraph boundaries, then sentence boundaries. Content is
//! never truncated: a single sentence longer than the budget becomes its
//! own oversized chunk.

use redraft_core::{ChunkingConfig, TextChunk};
use regex::Regex;
use tracing::debug;

use crate::{IngestionError, Result};

/// Separator placed between paragraphs inside one chunk
const PARAGRAPH_JOIN: &str = "\n\n";
/// Separator placed between sentences of a split paragraph
const SENTENCE_JOIN: &str = " ";

/// Paragraph-first text chunker
#[derive(Debug, Clone)]
pub struct TextChunker {
    max_chars: usize,
    paragraph_break: Regex,
    sentence_end: Regex,
}

impl TextChunker {
    pub fn new(max_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(IngestionError::ChunkingFailed(
                "max chunk size must be greater than 0".to_string(),
            ));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| IngestionError::ChunkingFailed(e.to_string()))
        };

        Ok(Self {
            max_chars,
            paragraph_break: compile(r"\n\s*\n")?,
            sentence_end: compile(r#"[.!?]["')\]]*\s+"#)?,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.max_chunk_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Chunk `text` into dense, 0-based ordinals. Blank text is an error.
    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        let mut acc = Accumulator::new(self.max_chars);

        for paragraph in self
            .paragraph_break
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            if char_len(paragraph) <= self.max_chars {
                acc.push(paragraph, PARAGRAPH_JOIN);
                continue;
            }

            acc.flush();
            for sentence in self.sentences(paragraph) {
                acc.push(sentence, SENTENCE_JOIN);
            }
        }
        acc.flush();

        if acc.chunks.is_empty() {
            return Err(IngestionError::EmptyContent);
        }

        let chunks: Vec<TextChunk> = acc
            .chunks
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| TextChunk::new(ordinal, text))
            .collect();

        debug!(
            chunks = chunks.len(),
            max_chars = self.max_chars,
            oversized = chunks.iter().filter(|c| c.char_len > self.max_chars).count(),
            "Text chunked"
        );

        Ok(chunks)
    }

    /// Sentences of one paragraph, terminal punctuation kept
    fn sentences<'a>(&self, paragraph: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.sentence_end.find_iter(paragraph) {
            let sentence = paragraph[start..boundary.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = boundary.end();
        }

        let rest = paragraph[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
        sentences
    }
}

/// Greedy packer shared by the paragraph and sentence passes
struct Accumulator {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Accumulator {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let piece_len = char_len(piece);

        if self.current.is_empty() {
            self.current.push_str(piece);
            self.current_len = piece_len;
            return;
        }

        let joined = self.current_len + separator.len() + piece_len;
        if joined <= self.max_chars {
            self.current.push_str(separator);
            self.current.push_str(piece);
            self.current_len = joined;
        } else {
            self.flush();
            self.current.push_str(piece);
            self.current_len = piece_len;
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
        }
        self.current_len = 0;
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(text: &str) -> Vec<&str> {
        text.split_whitespace().collect()
    }

    fn rejoin(chunks: &[TextChunk]) -> String {
        chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(
            TextChunker::new(0),
            Err(IngestionError::ChunkingFailed(_))
        ));
    }

    #[test]
    fn test_blank_text_is_empty_content() {
        let chunker = TextChunker::new(100).unwrap();
        assert!(matches!(
            chunker.chunk("  \n\n\t \n"),
            Err(IngestionError::EmptyContent)
        ));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = TextChunker::new(100).unwrap();
        let chunks = chunker.chunk("One paragraph.\n\nAnother one.").unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "One paragraph.\n\nAnother one.");
    }

    #[test]
    fn test_five_kilobyte_document_five_chunks() {
        let paragraph = format!("{}.", "a".repeat(479));
        let text = vec![paragraph.as_str(); 10].join("\n\n");
        assert_eq!(text.len(), 10 * 480 + 9 * 2);

        let chunks = TextChunker::new(1000).unwrap().chunk(&text).unwrap();

        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.char_len, 962);
        }
        assert_eq!(rejoin(&chunks), text);
    }

    #[test]
    fn test_paragraph_breaks_with_whitespace_lines() {
        let chunker = TextChunker::new(10).unwrap();
        let chunks = chunker.chunk("first\n   \nsecond\n\n\n\nthird").unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_oversized_paragraph_split_on_sentences() {
        let chunker = TextChunker::new(40).unwrap();
        let text = "Intro.\n\nThe first sentence is here. The second one follows! \
                    Is there a third? Yes.";
        let chunks = chunker.chunk(text).unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Intro.",
                "The first sentence is here.",
                "The second one follows!",
                "Is there a third? Yes.",
            ]
        );
        assert!(chunks.iter().all(|c| c.char_len <= 40));
    }

    #[test]
    fn test_sentence_tail_carries_into_next_paragraph() {
        let chunker = TextChunker::new(30).unwrap();
        let text = "Alpha beta gamma delta. Epsilon zeta.\n\nEta.";
        let chunks = chunker.chunk(text).unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha beta gamma delta.", "Epsilon zeta.\n\nEta."]);
    }

    #[test]
    fn test_oversized_sentence_kept_whole() {
        let long = "x".repeat(120);
        let text = format!("Short one. {} Tail.", long);
        let chunks = TextChunker::new(50).unwrap().chunk(&text).unwrap();

        let tail = format!("{} Tail.", long);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Short one.", tail.as_str()]);
        assert_eq!(chunks[1].char_len, 126);
    }

    #[test]
    fn test_quoted_sentence_endings() {
        let chunker = TextChunker::new(20).unwrap();
        let chunks = chunker
            .chunk("He said \"stop.\" Then (quietly.) she left.")
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["He said \"stop.\"", "Then (quietly.)", "she left."]);
    }

    #[test]
    fn test_lengths_are_characters() {
        let chunker = TextChunker::new(5).unwrap();
        let chunks = chunker.chunk("äöüäö\n\nß").unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].char_len, 5);
    }

    #[test]
    fn test_tokens_preserved_in_order() {
        let text = "Lorem ipsum dolor sit amet. Consectetur adipiscing elit!\n\n\
                    Sed do eiusmod tempor? Incididunt ut labore.\n\n\
                    Ut enim ad minim veniam, quis nostrud exercitation.\n\n\
                    Duis aute irure dolor in reprehenderit.";

        for max in [1, 7, 16, 33, 64, 500] {
            let chunks = TextChunker::new(max).unwrap().chunk(text).unwrap();

            assert_eq!(tokens(&rejoin(&chunks)), tokens(text), "max = {max}");
            assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.ordinal, i);
            }
        }
    }
}
