//! Fakes shared by the pipeline and session tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::agent::{interpret_response, AgentError, AgentRequest, AgentResponse, AgentService};
use crate::conversation::Conversation;
use crate::store::{EntryFilter, EntryStore, InMemoryEntryStore, StoreError};
use crate::types::Entry;
use crate::transcriber::{Transcriber, TranscriberError, Transcript};

/// Provider body with one assistant message carrying `calls`
pub fn tool_call_body(calls: &[(&str, &str, Value)], text: Option<&str>) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": args.to_string() }
            })
        })
        .collect();
    let mut message = json!({ "role": "assistant", "content": text });
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    json!({
        "choices": [{ "message": message }],
        "usage": { "prompt_tokens": 1000, "completion_tokens": 1000 }
    })
}

pub fn create_body(call_id: &str, contents: &[&str]) -> Value {
    let entries: Vec<Value> = contents
        .iter()
        .map(|c| json!({ "content": c, "category": "todo", "source_text": c, "summary": c }))
        .collect();
    tool_call_body(&[(call_id, "create_entries", json!({ "entries": entries }))], None)
}

/// Agent that replays canned provider bodies through the real parser
#[derive(Default)]
pub struct ScriptedAgent {
    responses: Mutex<VecDeque<Result<Value, AgentError>>>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    memories: Mutex<Vec<Option<String>>>,
    context_sizes: Mutex<Vec<usize>>,
    block_next: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl ScriptedAgent {
    pub fn new(responses: Vec<Result<Value, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<Value, AgentError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Make the next call wait for `release`
    pub fn block_next_call(&self) {
        self.block_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn memories(&self) -> Vec<Option<String>> {
        self.memories.lock().unwrap().clone()
    }

    pub fn context_sizes(&self) -> Vec<usize> {
        self.context_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentService for ScriptedAgent {
    async fn send(
        &self,
        conversation: &mut Conversation,
        request: AgentRequest<'_>,
    ) -> Result<AgentResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(request.input.to_string());
        self.memories.lock().unwrap().push(request.memory.map(str::to_string));
        self.context_sizes.lock().unwrap().push(request.entries.len());
        self.entered.notify_one();

        if self.block_next.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }

        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AgentError::NoActionableOutput));
        let body = next?;
        let (assistant, parsed) = interpret_response(&body)?;
        let messages = conversation.request_messages(request.input, || "system".to_string());
        conversation.record_turn(messages, assistant);
        Ok(parsed)
    }
}

/// Transcriber returning a fixed transcript
pub struct FakeTranscriber {
    available: bool,
    recording: AtomicBool,
    transcript: Mutex<Transcript>,
    pub cancels: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            available: true,
            recording: AtomicBool::new(false),
            transcript: Mutex::new(Transcript::new(text, vec![])),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new("")
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    async fn start_recording(&self) -> Result<(), TranscriberError> {
        if !self.available {
            return Err(TranscriberError::Unavailable);
        }
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<Transcript, TranscriberError> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Err(TranscriberError::NotRecording);
        }
        Ok(self.transcript.lock().unwrap().clone())
    }

    async fn cancel_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn current_transcript(&self) -> String {
        if self.is_recording() {
            self.transcript.lock().unwrap().text.clone()
        } else {
            String::new()
        }
    }
}

/// In-memory store whose saves can be made to fail from outside
pub struct SwitchableStore {
    inner: InMemoryEntryStore,
    fail_saves: Arc<AtomicBool>,
}

impl SwitchableStore {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let fail_saves = Arc::new(AtomicBool::new(false));
        let store = Self {
            inner: InMemoryEntryStore::new(),
            fail_saves: fail_saves.clone(),
        };
        (store, fail_saves)
    }
}

impl EntryStore for SwitchableStore {
    fn fetch(&self, filter: &EntryFilter) -> Result<Vec<Entry>, StoreError> {
        self.inner.fetch(filter)
    }

    fn insert(&mut self, entry: Entry) {
        self.inner.insert(entry);
    }

    fn update(&mut self, entry: Entry) {
        self.inner.update(entry);
    }

    fn delete(&mut self, id: Uuid) {
        self.inner.delete(id);
    }

    fn save(&mut self) -> Result<usize, StoreError> {
        self.inner.set_fail_saves(self.fail_saves.load(Ordering::SeqCst));
        self.inner.save()
    }

    fn discard(&mut self) {
        self.inner.discard();
    }

    fn has_changes(&self) -> bool {
        self.inner.has_changes()
    }
}
