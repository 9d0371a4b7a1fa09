use super::{failed, CommandError, CommandResult, Dispatcher};
use crate::model::FlashcardSet;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

impl Dispatcher {
    /// Create a set. With a filename, the set records the grounding file and
    /// flashcards are generated from it; generation failures are logged and
    /// do not undo the set.
    #[instrument(skip(self, description))]
    pub(crate) async fn create_set(
        &self,
        name: String,
        description: String,
        filename: Option<String>,
    ) -> Result<CommandResult, CommandError> {
        let set = FlashcardSet {
            name: name.clone(),
            description: description.clone(),
            created_at: Utc::now(),
            content_path: filename
                .as_ref()
                .map(|f| format!("{}/{}", self.settings.upload_bucket, f)),
        };

        let inserted = self
            .store
            .insert_set(&set)
            .await
            .map_err(failed("Error creating set"))?;

        if !inserted {
            warn!(set = %name, "Set already exists");
            return Ok(CommandResult::failure(format!(
                "Error creating set: set {name} already exists"
            )));
        }

        info!(set = %name, grounded = filename.is_some(), "Set created");

        if let Some(ref filename) = filename {
            match self.generate_from_file(&name, filename).await {
                Ok(count) => info!(set = %name, count, "Generated flashcards from file"),
                Err(e) => error!(
                    set = %name,
                    filename = %filename,
                    error = %format!("{e:#}"),
                    "Flashcard generation from file failed"
                ),
            }
        }

        Ok(CommandResult::message(format!(
            "Successfully created set {name} with description {description}"
        )))
    }

    pub(crate) async fn get_sets(&self) -> Result<CommandResult, CommandError> {
        let sets = self
            .store
            .scan_sets()
            .await
            .map_err(failed("Error getting sets"))?;

        Ok(CommandResult::message(
            serde_json::to_value(sets).map_err(anyhow::Error::from)?,
        ))
    }

    /// Delete every flashcard of the set, then the set itself. Stops at the
    /// first failed delete; rows already removed stay removed.
    #[instrument(skip(self))]
    pub(crate) async fn delete_set_with_flashcards(
        &self,
        set_name: &str,
    ) -> Result<CommandResult, CommandError> {
        let cards = self
            .store
            .query_flashcards(set_name)
            .await
            .map_err(failed("Error deleting set"))?;

        for card in &cards {
            self.store
                .delete_flashcard(set_name, card.id)
                .await
                .map_err(failed("Error deleting set flashcards"))?;
        }

        self.store
            .delete_set(set_name)
            .await
            .map_err(failed("Error deleting set"))?;

        info!(set = %set_name, deleted_cards = cards.len(), "Set deleted");

        Ok(CommandResult::message(format!(
            "Successfully deleted set {set_name} and all its flashcards"
        )))
    }
}
