use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named collection of flashcards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FlashcardSet {
    /// Unique set name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// When the set was created
    pub created_at: DateTime<Utc>,
    /// `<bucket>/<key>` of the grounding file, if one was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
}

impl FlashcardSet {
    /// Split `content_path` into `(bucket, key)`, ignoring blank or
    /// malformed paths
    pub fn grounding_location(&self) -> Option<(&str, &str)> {
        let path = self.content_path.as_deref()?.trim();
        match path.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Some((bucket, key)),
            _ => None,
        }
    }
}

/// A question/answer pair stored under a set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Flashcard {
    /// Owning set name (partition key)
    #[sqlx(rename = "set_name")]
    pub set: String,
    /// Identifier, unique within the set (sort key)
    pub id: i64,
    pub question: String,
    /// Answer text, usually markdown
    pub answer: String,
}

impl Flashcard {
    pub fn new(set: impl Into<String>, id: i64, card: FlashcardContent) -> Self {
        Self {
            set: set.into(),
            id,
            question: card.question,
            answer: card.answer,
        }
    }

    pub fn content(&self) -> FlashcardContent {
        FlashcardContent {
            question: self.question.clone(),
            answer: self.answer.clone(),
        }
    }
}

/// Question and answer without a key, as parsed from generated text or CSV
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlashcardContent {
    pub question: String,
    pub answer: String,
}

impl FlashcardContent {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}
