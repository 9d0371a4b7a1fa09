//! Fixed instructions and prompt builders for the generation service.

use crate::model::Flashcard;

/// Instruction for single-answer suggestions
pub const ANSWER_INSTRUCTION: &str = "You are helping to answer the question in a flashcard. \
The answer should be detailed, if possible also with code examples. \
All your answers must be in MD (markdown) format.";

/// Instruction for generating cards from an uploaded file
pub const FILE_FLASHCARDS_INSTRUCTION: &str = "You are helping to prepare a set of flashcards based on given text. \
The flashcards should be put in tag <flashcard> and </flashcard>. \
Each flashcard should have a question and answer. \
The question should be put in tag <question> and </question>. \
The answer should be put in tag <answer> and </answer>. \
The answer should be detailed, if possible also with code examples. \
All your answers must be in MD (markdown) format.";

/// Instruction for extending an existing set
pub const SUGGEST_FLASHCARDS_INSTRUCTION: &str = "You are helping to prepare a set of flashcards. \
The flashcards should be put in tag <flashcard> and </flashcard>. \
Each flashcard should have a question and answer. \
The question should be put in tag <question> and </question>. \
The answer should be put in tag <answer> and </answer>. \
The answer should be detailed, if possible also with code examples. \
All your answers must be in MD (markdown) format. \
Create flashcards that are different from the existing ones but related to the same topics.";

pub fn file_flashcards_prompt(filename: &str) -> String {
    format!("Can you prepare flashcards based on this file: {filename}?")
}

/// Prompt asking for cards that extend `existing`, optionally grounded in
/// the set's source text
pub fn suggest_flashcards_prompt(existing: &[Flashcard], grounding: Option<&str>) -> String {
    let questions = existing
        .iter()
        .map(|card| format!("Question: {}", card.question))
        .collect::<Vec<_>>()
        .join(" ");

    match grounding {
        Some(text) if !text.is_empty() => format!(
            "Can you suggest more flashcards based on these existing flashcards: {questions} \
             and this additional text: {text}?"
        ),
        _ => format!(
            "Can you suggest more flashcards based on these existing flashcards: {questions}? \
             Create new flashcards that expand on the topics covered in the existing ones."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlashcardContent;

    fn cards() -> Vec<Flashcard> {
        vec![
            Flashcard::new("rust", 1, FlashcardContent::new("What is a borrow?", "a")),
            Flashcard::new("rust", 2, FlashcardContent::new("What is a lifetime?", "b")),
        ]
    }

    #[test]
    fn test_suggest_prompt_without_grounding() {
        assert_eq!(
            suggest_flashcards_prompt(&cards(), None),
            "Can you suggest more flashcards based on these existing flashcards: \
             Question: What is a borrow? Question: What is a lifetime?? \
             Create new flashcards that expand on the topics covered in the existing ones."
        );
        assert_eq!(
            suggest_flashcards_prompt(&cards(), Some("")),
            suggest_flashcards_prompt(&cards(), None)
        );
    }

    #[test]
    fn test_suggest_prompt_with_grounding() {
        let prompt = suggest_flashcards_prompt(&cards(), Some("Chapter 4: Ownership"));
        assert!(prompt.ends_with("and this additional text: Chapter 4: Ownership?"));
        assert!(prompt.contains("Question: What is a borrow? Question: What is a lifetime?"));
    }

    #[test]
    fn test_instructions_request_tags() {
        for instruction in [FILE_FLASHCARDS_INSTRUCTION, SUGGEST_FLASHCARDS_INSTRUCTION] {
            assert!(instruction.contains("<flashcard>"));
            assert!(instruction.contains("<question>"));
            assert!(instruction.contains("<answer>"));
        }
        assert_eq!(
            file_flashcards_prompt("upload_1.txt"),
            "Can you prepare flashcards based on this file: upload_1.txt?"
        );
    }
}
