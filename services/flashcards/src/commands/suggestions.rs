use super::{failed, CommandError, CommandResult, Dispatcher};
use crate::generation::GenerationRequest;
use crate::object_store::content_type_for_filename;
use crate::parser::parse_flashcards;
use crate::prompts::{
    file_flashcards_prompt, suggest_flashcards_prompt, ANSWER_INSTRUCTION,
    FILE_FLASHCARDS_INSTRUCTION, SUGGEST_FLASHCARDS_INSTRUCTION,
};
use anyhow::Context;
use tracing::{debug, info, instrument, warn};

impl Dispatcher {
    #[instrument(skip(self, question), fields(question_len = question.len()))]
    pub(crate) async fn suggest_flashcard_answer(
        &self,
        question: &str,
    ) -> Result<CommandResult, CommandError> {
        let answer = self
            .generator
            .generate(&GenerationRequest::new(ANSWER_INSTRUCTION, question))
            .await
            .map_err(failed("Error suggesting answer"))?;

        Ok(CommandResult::message(answer))
    }

    /// Generate more cards for a set from its existing questions and, when
    /// present, its grounding file. Persisting stops at the first failure;
    /// cards already written stay.
    #[instrument(skip(self))]
    pub(crate) async fn suggest_flashcards(
        &self,
        set_name: &str,
    ) -> Result<CommandResult, CommandError> {
        let existing = self
            .store
            .query_flashcards(set_name)
            .await
            .map_err(failed("Error loading existing flashcards"))?;

        if existing.is_empty() {
            return Ok(CommandResult::message(
                "No existing flashcards found to base suggestions on.",
            ));
        }

        let set = self
            .store
            .get_set(set_name)
            .await
            .map_err(failed("Error loading set"))?;

        let grounding = match set.as_ref().and_then(|s| s.grounding_location()) {
            Some((bucket, key)) => self.load_grounding_text(bucket, key).await,
            None => None,
        };

        let prompt = suggest_flashcards_prompt(&existing, grounding.as_deref());
        debug!(prompt_len = prompt.len(), grounded = grounding.is_some(), "Requesting suggestions");

        let response = self
            .generator
            .generate(&GenerationRequest::new(SUGGEST_FLASHCARDS_INSTRUCTION, prompt))
            .await
            .map_err(failed("Error generating flashcards"))?;

        let suggested = parse_flashcards(&response);
        info!(set = %set_name, count = suggested.len(), "Parsed suggested flashcards");

        let added = self
            .persist_cards(set_name, suggested)
            .await
            .map_err(failed("Error persisting flashcards"))?;

        Ok(CommandResult::message(format!(
            "Successfully added {added} new flashcards"
        )))
    }

    /// Grounding text for suggestions; unreadable files are skipped
    async fn load_grounding_text(&self, bucket: &str, key: &str) -> Option<String> {
        let bytes = match self.objects.get_object(bucket, key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(bucket, key, error = %format!("{e:#}"), "Could not load grounding file");
                return None;
            }
        };

        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                warn!(bucket, key, "Grounding file is not UTF-8 text, ignoring it");
                None
            }
        }
    }

    /// Generate flashcards for a new set from an uploaded file: download it,
    /// stage it in scratch storage, hand it to the generation service and
    /// persist the parsed cards.
    #[instrument(skip(self))]
    pub(crate) async fn generate_from_file(
        &self,
        set_name: &str,
        filename: &str,
    ) -> anyhow::Result<usize> {
        let bytes = self
            .objects
            .get_object(&self.settings.upload_bucket, filename)
            .await
            .context("Error loading grounding file")?;

        let scratch = tempfile::Builder::new()
            .prefix("grounding-")
            .suffix(&format!("-{}", scratch_suffix(filename)))
            .tempfile_in(&self.settings.scratch_dir)
            .context("Failed to create scratch file")?;
        tokio::fs::write(scratch.path(), &bytes)
            .await
            .context("Failed to write scratch file")?;
        debug!(path = %scratch.path().display(), size_bytes = bytes.len(), "Grounding file staged");

        let remote = self
            .generator
            .upload_file(scratch.path(), content_type_for_filename(filename))
            .await?;

        let request = GenerationRequest::new(FILE_FLASHCARDS_INSTRUCTION, file_flashcards_prompt(filename))
            .with_file(remote);
        let response = self.generator.generate(&request).await?;

        let cards = parse_flashcards(&response);
        info!(set = %set_name, count = cards.len(), "Parsed flashcards from file");

        self.persist_cards(set_name, cards).await
    }
}

/// File-name-safe tail for a scratch file, keeping the extension
fn scratch_suffix(filename: &str) -> String {
    filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
