//! Extraction of flashcards from tagged model output.
//!
//! Generated text marks each card as
//! `<flashcard><question>..</question><answer>..</answer></flashcard>`.
//! Spans are matched lazily: an opening tag pairs with the nearest closing
//! tag after it, spans never overlap, and line breaks inside a span are
//! ordinary content. Within a card only the first question and first answer
//! count. A card missing either one is dropped without error.

use crate::model::FlashcardContent;

const FLASHCARD: &str = "flashcard";
const QUESTION: &str = "question";
const ANSWER: &str = "answer";

/// Parse every complete flashcard out of `text`, in order of appearance
pub fn parse_flashcards(text: &str) -> Vec<FlashcardContent> {
    TagSpans::new(text, FLASHCARD)
        .filter_map(|body| {
            let question = first_span(body, QUESTION)?;
            let answer = first_span(body, ANSWER)?;
            Some(FlashcardContent::new(question.trim(), answer.trim()))
        })
        .collect()
}

/// Content of the first `<tag>..</tag>` span in `text`
pub fn first_span<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    TagSpans::new(text, tag).next()
}

/// Iterator over the contents of non-overlapping `<tag>..</tag>` spans
struct TagSpans<'a> {
    rest: &'a str,
    open: String,
    close: String,
}

impl<'a> TagSpans<'a> {
    fn new(text: &'a str, tag: &str) -> Self {
        Self {
            rest: text,
            open: format!("<{tag}>"),
            close: format!("</{tag}>"),
        }
    }
}

impl<'a> Iterator for TagSpans<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let start = self.rest.find(&self.open)? + self.open.len();
        let after_open = &self.rest[start..];

        // No closing tag after this opening means none after any later one.
        let Some(len) = after_open.find(&self.close) else {
            self.rest = "";
            return None;
        };

        let body = &after_open[..len];
        self.rest = &after_open[len + self.close.len()..];
        Some(body)
    }
}
