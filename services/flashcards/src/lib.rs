//! Flashcards Service
//!
//! Study-set service: named sets of question/answer flashcards with CRUD,
//! model-generated answers and cards, and CSV import/export.
//!
//! ## Features
//!
//! - **Command Dispatch**: one endpoint taking a base64 JSON envelope
//!   `{"command": .., "content": {..}}` and answering with `msg` or `error`
//! - **Generated Flashcards**: cards generated from an uploaded grounding
//!   file when a set is created, and suggested from a set's existing cards
//! - **CSV Transfer**: two-column import from the upload bucket and export
//!   to the export bucket
//! - **File Uploads**: multipart uploads stored under generated names
//!
//! ## Architecture
//!
//! ```text
//!  POST /command          POST /upload
//!        │                      │
//!        ▼                      ▼
//! ┌──────────────┐       ┌──────────────┐
//! │ Request      │       │ Upload       │
//! │ Adapter      │       │ Adapter      │
//! └──────────────┘       └──────────────┘
//!        │                      │
//!        ▼                      │
//! ┌──────────────┐              │
//! │ Dispatcher   │──────┐       │
//! └──────────────┘      │       │
//!    │         │        ▼       ▼
//!    ▼         ▼     ┌──────────────┐
//! ┌────────┐ ┌──────┐│ Object Store │
//! │ Store  │ │Gemini││ (S3)         │
//! │ (PG)   │ │      │└──────────────┘
//! └────────┘ └──────┘
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod generation;
pub mod ids;
pub mod model;
pub mod object_store;
pub mod parser;
pub mod prompts;
pub mod store;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use commands::{Command, CommandError, CommandResult, Dispatcher, DispatcherSettings};
pub use config::Config;
pub use generation::{GeminiClient, GenerationRequest, TextGenerator};
pub use model::{Flashcard, FlashcardContent, FlashcardSet};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use parser::parse_flashcards;
pub use store::{FlashcardStore, PgFlashcardStore};
