//! Command dispatch: maps a command name plus content payload onto one of
//! the set, flashcard, suggestion and CSV operations.

mod flashcards;
mod sets;
mod suggestions;
mod transfer;

use crate::config::Config;
use crate::generation::TextGenerator;
use crate::ids::IdGenerator;
use crate::object_store::ObjectStore;
use crate::store::FlashcardStore;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Errors produced while dispatching a command
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command name is not one of the known commands
    #[error("Invalid command: {0}")]
    UnknownCommand(String),

    #[error("Invalid content for {command}: {source}")]
    InvalidContent {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// An operation failed in a way reported back in the result envelope
    #[error("{context}: {cause:#}")]
    Failed {
        context: &'static str,
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    /// Whether the failure is the caller's fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CommandError::UnknownCommand(_) | CommandError::InvalidContent { .. }
        )
    }
}

/// Build a `map_err` adapter that reports a failure in the envelope
pub(crate) fn failed(context: &'static str) -> impl FnOnce(anyhow::Error) -> CommandError {
    move |cause| CommandError::Failed { context, cause }
}

/// Result envelope: `msg` on success, `error` on failure, plus any extra keys
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandResult {
    pub fn message(msg: impl Into<Value>) -> Self {
        Self {
            msg: Some(msg.into()),
            error: None,
            extra: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            msg: None,
            error: Some(error.into()),
            extra: Map::new(),
        }
    }

    /// Attach an extra top-level key
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.msg.is_some()
    }

    /// `msg` when it is a plain string
    pub fn msg_str(&self) -> Option<&str> {
        self.msg.as_ref().and_then(Value::as_str)
    }
}

/// A parsed command with its required content
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateSet {
        name: String,
        description: String,
        filename: Option<String>,
    },
    GetSets,
    AddFlashcard {
        set_name: String,
        question: String,
        answer: String,
    },
    UpdateFlashcard {
        set_name: String,
        id: i64,
        question: String,
        answer: String,
    },
    DeleteFlashcard {
        set_name: String,
        id: i64,
    },
    DeleteSetWithFlashcards {
        set_name: String,
    },
    GetFlashcards {
        set_name: String,
    },
    SuggestFlashcardAnswer {
        question: String,
    },
    SuggestFlashcards {
        set_name: String,
    },
    ImportFlashcardsFromCsv {
        set_name: String,
        filename: String,
    },
    ExportFlashcardsToCsv {
        set_name: String,
    },
}

#[derive(Deserialize)]
struct CreateSetArgs {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Deserialize)]
struct SetArgs {
    set_name: String,
}

#[derive(Deserialize)]
struct CardArgs {
    set_name: String,
    question: String,
    answer: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    set_name: String,
    #[serde(deserialize_with = "deserialize_id")]
    id: i64,
    question: String,
    answer: String,
}

#[derive(Deserialize)]
struct KeyArgs {
    set_name: String,
    #[serde(deserialize_with = "deserialize_id")]
    id: i64,
}

#[derive(Deserialize)]
struct QuestionArgs {
    question: String,
}

#[derive(Deserialize)]
struct ImportArgs {
    set_name: String,
    filename: String,
}

/// Flashcard ids arrive as JSON integers or numeric strings
fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid flashcard id {text:?}"))),
    }
}

fn args<T: DeserializeOwned>(command: &'static str, content: &Value) -> Result<T, CommandError> {
    T::deserialize(content).map_err(|source| CommandError::InvalidContent { command, source })
}

impl Command {
    /// Every command name the dispatcher accepts
    pub const NAMES: [&'static str; 11] = [
        "create_set",
        "get_sets",
        "add_flashcard",
        "update_flashcard",
        "delete_flashcard",
        "delete_set_with_flashcards",
        "get_flashcards",
        "suggest_flashcard_answer",
        "suggest_flashcards",
        "import_flashcards_from_csv",
        "export_flashcards_to_csv",
    ];

    /// Parse a command name and its content. `null` content counts as empty.
    pub fn parse(name: &str, content: &Value) -> Result<Self, CommandError> {
        let empty = Value::Object(Map::new());
        let content = if content.is_null() { &empty } else { content };

        let command = match name {
            "create_set" => {
                let a: CreateSetArgs = args("create_set", content)?;
                Command::CreateSet {
                    name: a.name,
                    description: a.description.unwrap_or_default(),
                    filename: a.filename.filter(|f| !f.trim().is_empty()),
                }
            }
            "get_sets" => Command::GetSets,
            "add_flashcard" => {
                let a: CardArgs = args("add_flashcard", content)?;
                Command::AddFlashcard {
                    set_name: a.set_name,
                    question: a.question,
                    answer: a.answer,
                }
            }
            "update_flashcard" => {
                let a: UpdateArgs = args("update_flashcard", content)?;
                Command::UpdateFlashcard {
                    set_name: a.set_name,
                    id: a.id,
                    question: a.question,
                    answer: a.answer,
                }
            }
            "delete_flashcard" => {
                let a: KeyArgs = args("delete_flashcard", content)?;
                Command::DeleteFlashcard {
                    set_name: a.set_name,
                    id: a.id,
                }
            }
            "delete_set_with_flashcards" => {
                let a: SetArgs = args("delete_set_with_flashcards", content)?;
                Command::DeleteSetWithFlashcards {
                    set_name: a.set_name,
                }
            }
            "get_flashcards" => {
                let a: SetArgs = args("get_flashcards", content)?;
                Command::GetFlashcards {
                    set_name: a.set_name,
                }
            }
            "suggest_flashcard_answer" => {
                let a: QuestionArgs = args("suggest_flashcard_answer", content)?;
                Command::SuggestFlashcardAnswer {
                    question: a.question,
                }
            }
            "suggest_flashcards" => {
                let a: SetArgs = args("suggest_flashcards", content)?;
                Command::SuggestFlashcards {
                    set_name: a.set_name,
                }
            }
            "import_flashcards_from_csv" => {
                let a: ImportArgs = args("import_flashcards_from_csv", content)?;
                Command::ImportFlashcardsFromCsv {
                    set_name: a.set_name,
                    filename: a.filename,
                }
            }
            "export_flashcards_to_csv" => {
                let a: SetArgs = args("export_flashcards_to_csv", content)?;
                Command::ExportFlashcardsToCsv {
                    set_name: a.set_name,
                }
            }
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }

    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateSet { .. } => "create_set",
            Command::GetSets => "get_sets",
            Command::AddFlashcard { .. } => "add_flashcard",
            Command::UpdateFlashcard { .. } => "update_flashcard",
            Command::DeleteFlashcard { .. } => "delete_flashcard",
            Command::DeleteSetWithFlashcards { .. } => "delete_set_with_flashcards",
            Command::GetFlashcards { .. } => "get_flashcards",
            Command::SuggestFlashcardAnswer { .. } => "suggest_flashcard_answer",
            Command::SuggestFlashcards { .. } => "suggest_flashcards",
            Command::ImportFlashcardsFromCsv { .. } => "import_flashcards_from_csv",
            Command::ExportFlashcardsToCsv { .. } => "export_flashcards_to_csv",
        }
    }
}

/// Bucket names and scratch location used by the operations
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub upload_bucket: String,
    pub export_bucket: String,
    pub export_prefix: String,
    pub scratch_dir: PathBuf,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            upload_bucket: config.s3.upload_bucket.clone(),
            export_bucket: config.s3.export_bucket.clone(),
            export_prefix: config.s3.export_prefix.clone(),
            scratch_dir: config.scratch_dir(),
        }
    }
}

/// Runs commands against the store, object store and text generator
pub struct Dispatcher {
    store: Arc<dyn FlashcardStore>,
    objects: Arc<dyn ObjectStore>,
    generator: Arc<dyn TextGenerator>,
    ids: IdGenerator,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn FlashcardStore>,
        objects: Arc<dyn ObjectStore>,
        generator: Arc<dyn TextGenerator>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            objects,
            generator,
            ids: IdGenerator::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn FlashcardStore> {
        &self.store
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Parse and run a command.
    ///
    /// Operation failures come back as an `error` envelope inside `Ok`.
    /// `Err` is reserved for unknown commands, bad content and unexpected
    /// internal failures.
    #[instrument(skip(self, content))]
    pub async fn dispatch(&self, command: &str, content: &Value) -> Result<CommandResult, CommandError> {
        let parsed = Command::parse(command, content).map_err(|e| {
            if matches!(e, CommandError::UnknownCommand(_)) {
                metrics::counter!("flashcards.commands.unknown").increment(1);
            }
            warn!(error = %e, "Rejected command");
            e
        })?;

        self.execute(parsed).await
    }

    /// Run an already parsed command
    pub async fn execute(&self, command: Command) -> Result<CommandResult, CommandError> {
        let name = command.name();
        info!(command = name, "Executing command");

        let outcome = match command {
            Command::CreateSet {
                name,
                description,
                filename,
            } => self.create_set(name, description, filename).await,
            Command::GetSets => self.get_sets().await,
            Command::AddFlashcard {
                set_name,
                question,
                answer,
            } => self.add_flashcard(&set_name, question, answer).await,
            Command::UpdateFlashcard {
                set_name,
                id,
                question,
                answer,
            } => self.update_flashcard(&set_name, id, question, answer).await,
            Command::DeleteFlashcard { set_name, id } => self.delete_flashcard(&set_name, id).await,
            Command::DeleteSetWithFlashcards { set_name } => {
                self.delete_set_with_flashcards(&set_name).await
            }
            Command::GetFlashcards { set_name } => self.get_flashcards(&set_name).await,
            Command::SuggestFlashcardAnswer { question } => {
                self.suggest_flashcard_answer(&question).await
            }
            Command::SuggestFlashcards { set_name } => self.suggest_flashcards(&set_name).await,
            Command::ImportFlashcardsFromCsv { set_name, filename } => {
                self.import_flashcards_from_csv(&set_name, &filename).await
            }
            Command::ExportFlashcardsToCsv { set_name } => {
                self.export_flashcards_to_csv(&set_name).await
            }
        };

        match outcome {
            Ok(result) => {
                let counter = if result.is_success() {
                    "flashcards.commands.processed"
                } else {
                    "flashcards.commands.failed"
                };
                metrics::counter!(counter, "command" => name).increment(1);
                Ok(result)
            }
            Err(CommandError::Failed { context, cause }) => {
                error!(command = name, error = %format!("{cause:#}"), "{context}");
                metrics::counter!("flashcards.commands.failed", "command" => name).increment(1);
                Ok(CommandResult::failure(format!("{context}: {cause:#}")))
            }
            Err(e) => {
                error!(command = name, error = %e, "Command failed unexpectedly");
                metrics::counter!("flashcards.commands.failed", "command" => name).increment(1);
                Err(e)
            }
        }
    }
}
