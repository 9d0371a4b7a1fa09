//! In-memory fakes and a dispatcher harness for unit tests.

use crate::commands::{Dispatcher, DispatcherSettings};
use crate::generation::{GenerationRequest, RemoteFile, TextGenerator};
use crate::model::{Flashcard, FlashcardContent, FlashcardSet};
use crate::object_store::{content_type_for_filename, ObjectStore};
use crate::store::FlashcardStore;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Flashcard store backed by maps. Writes can be made to fail after a
/// number of successes to exercise partial-failure paths.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<BTreeMap<String, FlashcardSet>>,
    cards: Mutex<BTreeMap<(String, i64), Flashcard>>,
    writes: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    next_seed_id: AtomicUsize,
}

impl MemoryStore {
    pub fn set(&self, name: &str) -> Option<FlashcardSet> {
        self.sets.lock().unwrap().get(name).cloned()
    }

    /// Cards of a set ordered by id
    pub fn cards(&self, set: &str) -> Vec<Flashcard> {
        self.cards
            .lock()
            .unwrap()
            .values()
            .filter(|card| card.set == set)
            .cloned()
            .collect()
    }

    pub fn contents(&self, set: &str) -> Vec<FlashcardContent> {
        self.cards(set).iter().map(Flashcard::content).collect()
    }

    /// Insert a card directly, bypassing write accounting
    pub fn seed(&self, set: &str, content: FlashcardContent) {
        let id = self.next_seed_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let card = Flashcard::new(set, id, content);
        self.cards
            .lock()
            .unwrap()
            .insert((card.set.clone(), card.id), card);
    }

    pub fn fail_writes_after(&self, successes: usize) {
        *self.fail_after.lock().unwrap() = Some(successes);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) -> Result<()> {
        let limit = *self.fail_after.lock().unwrap();
        if let Some(limit) = limit {
            if self.writes.load(Ordering::SeqCst) >= limit {
                bail!("simulated write failure");
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl FlashcardStore for MemoryStore {
    async fn insert_set(&self, set: &FlashcardSet) -> Result<bool> {
        self.record_write()?;
        let mut sets = self.sets.lock().unwrap();
        if sets.contains_key(&set.name) {
            return Ok(false);
        }
        sets.insert(set.name.clone(), set.clone());
        Ok(true)
    }

    async fn get_set(&self, name: &str) -> Result<Option<FlashcardSet>> {
        Ok(self.set(name))
    }

    async fn scan_sets(&self) -> Result<Vec<FlashcardSet>> {
        Ok(self.sets.lock().unwrap().values().cloned().collect())
    }

    async fn delete_set(&self, name: &str) -> Result<()> {
        self.record_write()?;
        self.sets.lock().unwrap().remove(name);
        Ok(())
    }

    async fn put_flashcard(&self, card: &Flashcard) -> Result<()> {
        self.record_write()?;
        self.cards
            .lock()
            .unwrap()
            .insert((card.set.clone(), card.id), card.clone());
        Ok(())
    }

    async fn update_flashcard(&self, card: &Flashcard) -> Result<()> {
        self.record_write()?;
        if let Some(existing) = self
            .cards
            .lock()
            .unwrap()
            .get_mut(&(card.set.clone(), card.id))
        {
            existing.question = card.question.clone();
            existing.answer = card.answer.clone();
        }
        Ok(())
    }

    async fn delete_flashcard(&self, set: &str, id: i64) -> Result<()> {
        self.record_write()?;
        self.cards.lock().unwrap().remove(&(set.to_string(), id));
        Ok(())
    }

    async fn query_flashcards(&self, set: &str) -> Result<Vec<Flashcard>> {
        Ok(self.cards(set))
    }

    async fn scan_flashcards(&self) -> Result<Vec<Flashcard>> {
        // Unordered, like a table scan.
        let mut cards: Vec<_> = self.cards.lock().unwrap().values().cloned().collect();
        cards.reverse();
        Ok(cards)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Object store backed by a map keyed on (bucket, key)
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (body, content_type_for_filename(key).to_string()),
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, _)| body.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (body, content_type.to_string()),
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.get(bucket, key)
            .ok_or_else(|| anyhow!("NoSuchKey: {bucket}/{key}"))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{bucket}.s3.amazonaws.com/{key}")
    }
}

/// Generator that answers every request with the same text and records
/// what it was asked
pub struct RecordingGenerator {
    text: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.text.clone())
    }

    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(RemoteFile {
            uri: format!("files/{name}"),
            mime_type: mime_type.to_string(),
        })
    }
}

/// A dispatcher wired to in-memory fakes. Swap in a mock for one seam with
/// the `with_*` constructors.
pub struct TestHarness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<MemoryStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub generator: Arc<RecordingGenerator>,
    _scratch: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_generated_text("")
    }

    pub fn with_generated_text(text: &str) -> Self {
        let generator = Arc::new(RecordingGenerator::new(text));
        Self::assemble(
            Arc::new(MemoryStore::default()),
            None,
            Arc::new(MemoryObjectStore::default()),
            None,
            generator.clone(),
            generator,
        )
    }

    pub fn with_generator(generator: impl TextGenerator + 'static) -> Self {
        Self::build(Arc::new(MemoryStore::default()), Arc::new(generator))
    }

    pub fn with_store(store: impl FlashcardStore + 'static) -> Self {
        let generator = Arc::new(RecordingGenerator::new(""));
        Self::assemble(
            Arc::new(MemoryStore::default()),
            Some(Arc::new(store)),
            Arc::new(MemoryObjectStore::default()),
            None,
            generator.clone(),
            generator,
        )
    }

    pub fn with_objects(objects: impl ObjectStore + 'static) -> Self {
        let generator = Arc::new(RecordingGenerator::new(""));
        Self::assemble(
            Arc::new(MemoryStore::default()),
            None,
            Arc::new(MemoryObjectStore::default()),
            Some(Arc::new(objects)),
            generator.clone(),
            generator,
        )
    }

    pub fn build(store: Arc<MemoryStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self::assemble(
            store,
            None,
            Arc::new(MemoryObjectStore::default()),
            None,
            Arc::new(RecordingGenerator::new("")),
            generator,
        )
    }

    fn assemble(
        store: Arc<MemoryStore>,
        store_override: Option<Arc<dyn FlashcardStore>>,
        objects: Arc<MemoryObjectStore>,
        objects_override: Option<Arc<dyn ObjectStore>>,
        recorder: Arc<RecordingGenerator>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let scratch = TempDir::new().expect("create scratch dir");
        let settings = DispatcherSettings {
            upload_bucket: "flashcards-files".to_string(),
            export_bucket: "flashcards-ai".to_string(),
            export_prefix: "exports/".to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        };

        let dispatcher = Arc::new(Dispatcher::new(
            store_override.unwrap_or_else(|| store.clone() as Arc<dyn FlashcardStore>),
            objects_override.unwrap_or_else(|| objects.clone() as Arc<dyn ObjectStore>),
            generator,
            settings,
        ));

        Self {
            dispatcher,
            store,
            objects,
            generator: recorder,
            _scratch: scratch,
        }
    }
}
