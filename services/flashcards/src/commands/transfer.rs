//! CSV import and export of flashcards.

use super::{failed, CommandError, CommandResult, Dispatcher};
use crate::model::{Flashcard, FlashcardContent};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

const CSV_HEADER: [&str; 2] = ["Question", "Answer"];

impl Dispatcher {
    /// Write a set's cards to a two-column CSV in the export bucket
    #[instrument(skip(self))]
    pub(crate) async fn export_flashcards_to_csv(
        &self,
        set_name: &str,
    ) -> Result<CommandResult, CommandError> {
        // Filtered after the read, not as a key condition.
        let mut cards: Vec<Flashcard> = self
            .store
            .scan_flashcards()
            .await
            .map_err(failed("Error reading flashcards"))?
            .into_iter()
            .filter(|card| card.set == set_name)
            .collect();

        if cards.is_empty() {
            return Ok(CommandResult::message(format!(
                "No flashcards found for set {set_name}"
            )));
        }
        cards.sort_by_key(|card| card.id);

        let filename = format!(
            "{set_name}_flashcards_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let key = format!("{}{}", self.settings.export_prefix, filename);
        let body = write_flashcards_csv(&cards)?;

        self.objects
            .put_object(&self.settings.export_bucket, &key, body, "text/csv")
            .await
            .map_err(failed("Error uploading file to object store"))?;

        let file_url = self.objects.public_url(&self.settings.export_bucket, &key);
        info!(set = %set_name, count = cards.len(), key = %key, "Flashcards exported");

        Ok(CommandResult::message(format!(
            "Successfully exported flashcards to {filename}"
        ))
        .with("filename", filename)
        .with("file_url", file_url))
    }

    /// Read a two-column CSV from the upload bucket into a set. The header
    /// row is skipped unconditionally; rows with fewer than two columns are
    /// skipped and logged. Blank lines are not rows and are not counted as
    /// skipped. Writing stops at the first failure.
    #[instrument(skip(self))]
    pub(crate) async fn import_flashcards_from_csv(
        &self,
        set_name: &str,
        filename: &str,
    ) -> Result<CommandResult, CommandError> {
        let bytes = self
            .objects
            .get_object(&self.settings.upload_bucket, filename)
            .await
            .map_err(failed("Error downloading file from object store"))?;

        let parsed = read_flashcards_csv(&bytes).map_err(failed("Error parsing CSV file"))?;
        let skipped = parsed.skipped;

        let imported = self
            .persist_cards(set_name, parsed.cards)
            .await
            .map_err(failed("Error importing flashcards"))?;

        info!(set = %set_name, imported, skipped, "Flashcards imported");

        Ok(CommandResult::message(format!(
            "Successfully imported flashcards from {filename} to set {set_name}"
        ))
        .with("imported", imported)
        .with("skipped", skipped))
    }
}

/// Cards read from an import file
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ParsedCsv {
    pub cards: Vec<FlashcardContent>,
    pub skipped: usize,
}

pub(crate) fn write_flashcards_csv(cards: &[Flashcard]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .context("Failed to write CSV header")?;
    for card in cards {
        writer
            .write_record([&card.question, &card.answer])
            .context("Failed to write CSV row")?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to finish CSV export: {}", e.error()))
}

/// Parse import rows. The reader drops blank lines before they become
/// records, so `skipped` only counts rows that had one column.
pub(crate) fn read_flashcards_csv(bytes: &[u8]) -> Result<ParsedCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut parsed = ParsedCsv::default();
    for (index, record) in reader.records().enumerate() {
        // Row numbers count the header as row 1.
        let row = index + 2;
        let record = record.with_context(|| format!("Failed to read CSV row {row}"))?;

        if record.len() < 2 {
            warn!(row, columns = record.len(), "Skipping CSV row with fewer than two columns");
            parsed.skipped += 1;
            continue;
        }

        parsed
            .cards
            .push(FlashcardContent::new(&record[0], &record[1]));
    }

    Ok(parsed)
}
