use super::{failed, CommandError, CommandResult, Dispatcher};
use crate::model::{Flashcard, FlashcardContent};
use anyhow::Context;
use tracing::{debug, instrument};

impl Dispatcher {
    #[instrument(skip(self, question, answer))]
    pub(crate) async fn add_flashcard(
        &self,
        set_name: &str,
        question: String,
        answer: String,
    ) -> Result<CommandResult, CommandError> {
        let card = Flashcard::new(set_name, self.ids.next_id(), FlashcardContent { question, answer });

        self.store
            .put_flashcard(&card)
            .await
            .map_err(failed("Error adding flashcard"))?;

        metrics::counter!("flashcards.cards.persisted").increment(1);
        debug!(id = card.id, "Flashcard added");

        Ok(CommandResult::message(format!(
            "Successfully added flashcard to set {set_name}"
        ))
        .with("id", card.id))
    }

    /// Overwrite question and answer; no existence check
    #[instrument(skip(self, question, answer))]
    pub(crate) async fn update_flashcard(
        &self,
        set_name: &str,
        id: i64,
        question: String,
        answer: String,
    ) -> Result<CommandResult, CommandError> {
        let card = Flashcard::new(set_name, id, FlashcardContent { question, answer });

        self.store
            .update_flashcard(&card)
            .await
            .map_err(failed("Error updating flashcard"))?;

        Ok(CommandResult::message(format!(
            "Successfully updated flashcard {id} in set {set_name}"
        )))
    }

    #[instrument(skip(self))]
    pub(crate) async fn delete_flashcard(
        &self,
        set_name: &str,
        id: i64,
    ) -> Result<CommandResult, CommandError> {
        self.store
            .delete_flashcard(set_name, id)
            .await
            .map_err(failed("Error deleting flashcard"))?;

        Ok(CommandResult::message(format!(
            "Successfully deleted flashcard {id} in set {set_name}"
        )))
    }

    pub(crate) async fn get_flashcards(&self, set_name: &str) -> Result<CommandResult, CommandError> {
        let cards = self
            .store
            .query_flashcards(set_name)
            .await
            .map_err(failed("Error getting flashcards"))?;

        debug!(set = %set_name, count = cards.len(), "Flashcards loaded");

        Ok(CommandResult::message(
            serde_json::to_value(cards).context("Failed to serialize flashcards")?,
        ))
    }

    /// Persist generated or imported cards under fresh ids, stopping at the
    /// first failed write. Returns how many were written.
    pub(crate) async fn persist_cards(
        &self,
        set_name: &str,
        cards: Vec<FlashcardContent>,
    ) -> anyhow::Result<usize> {
        let total = cards.len();

        for (persisted, content) in cards.into_iter().enumerate() {
            let card = Flashcard::new(set_name, self.ids.next_id(), content);
            self.store
                .put_flashcard(&card)
                .await
                .with_context(|| format!("persisted {persisted} of {total} flashcards before failure"))?;
            metrics::counter!("flashcards.cards.persisted").increment(1);
        }

        Ok(total)
    }
}
