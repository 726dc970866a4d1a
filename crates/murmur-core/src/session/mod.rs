//! ============================================================================
//! Session Controller - Turns, generations, cancellation and undo
//! ============================================================================
//! One turn may be in flight at a time. Each turn gets a fresh generation
//! and cancellation token; after every await the turn re-checks both and
//! drops its result if it has been superseded. The conversation and the
//! thread are only written by the turn that still owns the session.
//!
//! Lock order is store, then state.
//! ============================================================================

mod thread;

pub use thread::{ActionReport, InputState, StatusKind, ThreadItem, ThreadItemKind, STATUS_ITEM_ID};

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::conversation::Conversation;
use crate::credits::CreditReceipt;
use crate::executor::{AgentActionExecutor, ExecutionContext, UndoSummary};
use crate::notify::NotificationScheduler;
use crate::pipeline::{Pipeline, PipelineError, TurnResult};
use crate::store::{EntryFilter, EntryStore, StoreError};
use crate::tool_results::ToolResultBuilder;
use crate::types::{Entry, EntrySource};
use thread::Thread;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A turn is already in progress")]
    Busy,

    #[error("Input is empty")]
    EmptyInput,

    #[error("Not currently recording")]
    NotRecording,

    #[error("No thread item with id {0}")]
    UnknownItem(u64),

    #[error("Item {0} has nothing to retry")]
    NotRetryable(u64),

    #[error("Recording failed")]
    Recording(#[source] PipelineError),

    #[error("Turn failed: {error}")]
    TurnFailed {
        #[source]
        error: PipelineError,
        retry_text: Option<String>,
    },

    #[error("Storage failed")]
    Storage(#[source] StoreError),
}

impl SessionError {
    /// Short text safe to show the user
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Busy => "Still working on the last one.",
            SessionError::EmptyInput => "Nothing to process.",
            SessionError::TurnFailed { error, .. } | SessionError::Recording(error) => {
                error.user_message()
            }
            _ => "Couldn't process. Try again.",
        }
    }
}

/// What a settled turn produced
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub generation: u64,
    pub input: String,
    pub agent_text: Option<String>,
    pub report: ActionReport,
    pub confirmations: Vec<String>,
    pub receipt: Option<CreditReceipt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnReport {
    Completed(TurnSummary),
    /// A newer turn, cancel or reset took over; nothing was recorded
    Superseded { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    Reverted(UndoSummary),
    /// The item belongs to an earlier generation
    Stale,
    /// The turn made no reversible changes
    NothingToUndo,
}

enum TurnInput {
    Text(String),
    Recording,
}

struct ActiveTurn {
    generation: u64,
    token: CancellationToken,
}

struct SessionState {
    thread: Thread,
    input: InputState,
    conversation: Conversation,
    active: Option<ActiveTurn>,
}

pub struct SessionController {
    pipeline: Pipeline,
    executor: AgentActionExecutor,
    store: Mutex<Box<dyn EntryStore>>,
    notifier: Arc<dyn NotificationScheduler>,
    config: SessionConfig,
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(
        pipeline: Pipeline,
        store: Box<dyn EntryStore>,
        notifier: Arc<dyn NotificationScheduler>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            executor: AgentActionExecutor::new(),
            store: Mutex::new(store),
            notifier,
            config,
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                thread: Thread::default(),
                input: InputState::Idle,
                conversation: Conversation::new(),
                active: None,
            }),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn items(&self) -> Vec<ThreadItem> {
        self.state.lock().await.thread.items().to_vec()
    }

    pub async fn input_state(&self) -> InputState {
        self.state.lock().await.input
    }

    pub async fn conversation_len(&self) -> usize {
        self.state.lock().await.conversation.len()
    }

    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    pub async fn entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>, SessionError> {
        self.store.lock().await.fetch(filter).map_err(SessionError::Storage)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn is_current(&self, generation: u64, token: &CancellationToken) -> bool {
        !token.is_cancelled() && self.generation() == generation
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Run one turn for typed text
    pub async fn submit_text(&self, text: &str) -> Result<TurnReport, SessionError> {
        let text = self.prepare_input(text)?;
        let (generation, token) = {
            let mut state = self.state.lock().await;
            if state.input != InputState::Idle {
                return Err(SessionError::Busy);
            }
            let turn = self.begin_turn(&mut state);
            state.thread.push(ThreadItemKind::UserInput {
                text: text.clone(),
                source: EntrySource::Text,
            });
            state.thread.set_status(StatusKind::Processing);
            turn
        };

        self.run_turn(generation, token, TurnInput::Text(text)).await
    }

    pub async fn start_recording(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.input != InputState::Idle {
            return Err(SessionError::Busy);
        }
        self.pipeline
            .start_recording()
            .await
            .map_err(SessionError::Recording)?;

        self.begin_turn(&mut state);
        state.input = InputState::Recording;
        state.thread.set_status(StatusKind::Recording {
            live_transcript: String::new(),
        });
        Ok(())
    }

    /// Show partial speech in the recording status item
    pub async fn update_live_transcript(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.input == InputState::Recording {
            state.thread.set_status(StatusKind::Recording {
                live_transcript: text.to_string(),
            });
        }
    }

    /// Finish the recording and run a turn on its transcript
    pub async fn stop_recording(&self) -> Result<TurnReport, SessionError> {
        let (generation, token) = {
            let mut state = self.state.lock().await;
            match state.input {
                InputState::Recording => {}
                InputState::Processing => return Err(SessionError::Busy),
                InputState::Idle => return Err(SessionError::NotRecording),
            }
            let Some(active) = state.active.as_ref() else {
                return Err(SessionError::NotRecording);
            };
            let turn = (active.generation, active.token.clone());
            state.input = InputState::Processing;
            state.thread.set_status(StatusKind::Processing);
            turn
        };

        self.run_turn(generation, token, TurnInput::Recording).await
    }

    pub async fn cancel_recording(&self) {
        let mut state = self.state.lock().await;
        if state.input != InputState::Recording {
            return;
        }
        self.pipeline.cancel_recording().await;
        Self::settle(&mut state);
        info!("Recording cancelled");
    }

    /// Cancel the turn in flight. Returns whether there was one.
    pub async fn cancel_processing(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.input != InputState::Processing {
            return false;
        }
        if let Some(active) = &state.active {
            info!("Cancelling turn {}", active.generation);
        }
        self.pipeline.cancel_recording().await;
        Self::settle(&mut state);
        true
    }

    /// Resubmit the input of a failed turn
    pub async fn retry(&self, item_id: u64) -> Result<TurnReport, SessionError> {
        let (text, generation, token) = {
            let mut state = self.state.lock().await;
            if state.input != InputState::Idle {
                return Err(SessionError::Busy);
            }
            let item = state
                .thread
                .items()
                .iter()
                .find(|item| item.id == item_id)
                .ok_or(SessionError::UnknownItem(item_id))?;
            let ThreadItemKind::Error {
                retry_text: Some(text),
                ..
            } = &item.kind
            else {
                return Err(SessionError::NotRetryable(item_id));
            };
            let text = text.clone();
            state.thread.remove(item_id);
            let (generation, token) = self.begin_turn(&mut state);
            state.thread.set_status(StatusKind::Processing);
            (text, generation, token)
        };
        info!("Retrying failed input as turn {}", generation);

        self.run_turn(generation, token, TurnInput::Text(text)).await
    }

    /// Revert the changes recorded on an action result item
    pub async fn undo(&self, item_id: u64) -> Result<UndoOutcome, SessionError> {
        let mut store = self.store.lock().await;
        let mut state = self.state.lock().await;

        let item = state
            .thread
            .items()
            .iter()
            .find(|item| item.id == item_id)
            .ok_or(SessionError::UnknownItem(item_id))?;
        let ThreadItemKind::ActionResult { generation, undo, .. } = &item.kind else {
            return Err(SessionError::UnknownItem(item_id));
        };
        if *generation != self.generation() {
            debug!("Undo for generation {} is stale", generation);
            return Ok(UndoOutcome::Stale);
        }
        let Some(transaction) = undo.as_ref().filter(|u| !u.is_empty()).cloned() else {
            return Ok(UndoOutcome::NothingToUndo);
        };

        let mut entries = store.fetch(&EntryFilter::all()).map_err(SessionError::Storage)?;
        let memory = self.pipeline.memory().map(|m| m.as_ref());
        let mut ctx = ExecutionContext {
            entries: &mut entries,
            store: &mut **store,
            notifier: self.notifier.as_ref(),
            memory,
            source: EntrySource::Text,
            now: Utc::now(),
        };
        // The item stays in the thread until the revert is committed
        let summary = transaction.execute(&mut ctx).map_err(SessionError::Storage)?;
        state.thread.remove(item_id);
        Ok(UndoOutcome::Reverted(summary))
    }

    /// Drop the thread and start a new conversation
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if state.input == InputState::Recording {
            self.pipeline.cancel_recording().await;
        }
        Self::settle(&mut state);
        self.generation.fetch_add(1, Ordering::SeqCst);
        state.thread.clear();
        state.conversation = Conversation::new();
        info!("Session reset at generation {}", self.generation());
    }

    // ========================================================================
    // Turn machinery
    // ========================================================================

    fn prepare_input(&self, text: &str) -> Result<String, SessionError> {
        let text: String = text.trim().chars().take(self.config.max_input_chars).collect();
        let text = text.trim_end().to_string();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        Ok(text)
    }

    fn begin_turn(&self, state: &mut SessionState) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        state.active = Some(ActiveTurn {
            generation,
            token: token.clone(),
        });
        state.input = InputState::Processing;
        debug!("Minted generation {}", generation);
        (generation, token)
    }

    /// Back to idle, cancelling whatever turn was active
    fn settle(state: &mut SessionState) {
        if let Some(active) = state.active.take() {
            active.token.cancel();
        }
        state.thread.clear_status();
        state.input = InputState::Idle;
    }

    async fn run_turn(
        &self,
        generation: u64,
        token: CancellationToken,
        input: TurnInput,
    ) -> Result<TurnReport, SessionError> {
        let superseded = TurnReport::Superseded { generation };

        let mut conversation = {
            let state = self.state.lock().await;
            let mut conversation = state.conversation.clone();
            conversation.truncate(self.config.max_history_messages);
            conversation
        };
        if !self.is_current(generation, &token) {
            return Ok(superseded);
        }

        let entries = {
            let store = self.store.lock().await;
            store.fetch(&EntryFilter::all())
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                return self
                    .fail_turn(generation, &token, PipelineError::StorageFailed(e), None)
                    .await
            }
        };
        if !self.is_current(generation, &token) {
            return Ok(superseded);
        }

        info!("Turn {} started", generation);
        let work = async {
            match input {
                TurnInput::Text(text) => {
                    let result = if conversation.is_empty() {
                        self.pipeline
                            .run_from_text(&mut conversation, &text, &entries)
                            .await
                    } else {
                        self.pipeline
                            .refine_from_text(&mut conversation, &text, &entries)
                            .await
                    };
                    (Some(text), result)
                }
                TurnInput::Recording => {
                    let transcript = match self.pipeline.stop_recording().await {
                        Ok(transcript) => transcript,
                        Err(e) => return (None, Err(e)),
                    };
                    let text = Some(transcript.text.trim().to_string()).filter(|t| !t.is_empty());
                    let result = self
                        .pipeline
                        .process_transcript(&mut conversation, transcript, &entries)
                        .await;
                    (text, result)
                }
            }
        };

        let (text, result) = tokio::select! {
            _ = token.cancelled() => {
                debug!("Turn {} cancelled while in flight", generation);
                return Ok(superseded);
            }
            settled = work => settled,
        };

        match result {
            Ok(turn) => self.commit_turn(generation, &token, turn, conversation, entries).await,
            Err(error) => self.fail_turn(generation, &token, error, text).await,
        }
    }

    async fn commit_turn(
        &self,
        generation: u64,
        token: &CancellationToken,
        turn: TurnResult,
        mut conversation: Conversation,
        mut entries: Vec<Entry>,
    ) -> Result<TurnReport, SessionError> {
        let mut store = self.store.lock().await;
        let mut state = self.state.lock().await;
        if !self.is_current(generation, token) {
            debug!("Discarding result of superseded turn {}", generation);
            return Ok(TurnReport::Superseded { generation });
        }

        let response = &turn.response;
        let memory = self.pipeline.memory().map(|m| m.as_ref());
        let mut ctx = ExecutionContext {
            entries: &mut entries,
            store: &mut **store,
            notifier: self.notifier.as_ref(),
            memory,
            source: turn.source,
            now: Utc::now(),
        };
        let execution = match self.executor.execute(&response.actions, &mut ctx) {
            Ok(execution) => execution,
            Err(e) => {
                let error = PipelineError::StorageFailed(e);
                return Self::record_failure(&mut state, error, Some(turn.input));
            }
        };

        let results = ToolResultBuilder::build(
            &response.tool_call_groups,
            &execution.outcomes,
            &response.parse_failures,
        );
        conversation.replace_tool_results(&results);

        let report = ActionReport::from_execution(
            &execution,
            response.parse_failures.len(),
            turn.receipt.as_ref(),
        );
        let confirmations: Vec<String> = execution.confirmations().map(str::to_string).collect();

        Self::settle(&mut state);
        if turn.source == EntrySource::Voice {
            state.thread.push(ThreadItemKind::UserInput {
                text: turn.input.clone(),
                source: EntrySource::Voice,
            });
        }
        if let Some(text) = &response.text {
            state.thread.push(ThreadItemKind::AgentText { text: text.clone() });
        }
        if !response.actions.is_empty() || !response.parse_failures.is_empty() {
            let undo = Some(execution.undo).filter(|u| !u.is_empty());
            state.thread.push(ThreadItemKind::ActionResult {
                generation,
                report: report.clone(),
                undo,
            });
        }
        for message in &confirmations {
            state.thread.push(ThreadItemKind::Confirmation {
                message: message.clone(),
            });
        }
        state.conversation = conversation;

        info!("Turn {} finished: {}", generation, report.summary);
        Ok(TurnReport::Completed(TurnSummary {
            generation,
            input: turn.input,
            agent_text: response.text.clone(),
            report,
            confirmations,
            receipt: turn.receipt,
        }))
    }

    async fn fail_turn(
        &self,
        generation: u64,
        token: &CancellationToken,
        error: PipelineError,
        retry_text: Option<String>,
    ) -> Result<TurnReport, SessionError> {
        let mut state = self.state.lock().await;
        if !self.is_current(generation, token) {
            debug!("Dropping error of superseded turn {}: {}", generation, error);
            return Ok(TurnReport::Superseded { generation });
        }
        Self::record_failure(&mut state, error, retry_text)
    }

    fn record_failure(
        state: &mut SessionState,
        error: PipelineError,
        retry_text: Option<String>,
    ) -> Result<TurnReport, SessionError> {
        warn!("Turn failed: {}", error);
        Self::settle(state);
        state.thread.push(ThreadItemKind::Error {
            message: error.user_message().to_string(),
            retry_text: retry_text.clone(),
        });
        Err(SessionError::TurnFailed { error, retry_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::notify::NoopScheduler;
    use crate::store::InMemoryEntryStore;
    use crate::test_support::{
        create_body, tool_call_body, FakeTranscriber, ScriptedAgent, SwitchableStore,
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn controller_with(agent: &Arc<ScriptedAgent>, config: SessionConfig) -> Arc<SessionController> {
        let pipeline = Pipeline::new(agent.clone())
            .with_transcriber(Arc::new(FakeTranscriber::new("call mom tonight")));
        SessionController::new(
            pipeline,
            Box::new(InMemoryEntryStore::new()),
            Arc::new(NoopScheduler),
            config,
        )
    }

    fn controller(agent: &Arc<ScriptedAgent>) -> Arc<SessionController> {
        controller_with(agent, SessionConfig::default())
    }

    fn action_item_ids(items: &[ThreadItem]) -> Vec<u64> {
        items
            .iter()
            .filter(|i| matches!(i.kind, ThreadItemKind::ActionResult { .. }))
            .map(|i| i.id)
            .collect()
    }

    #[tokio::test]
    async fn test_turn_records_items_and_tool_results() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(create_body("call_1", &["Buy milk"]))]));
        let session = controller(&agent);

        let report = session.submit_text("buy milk").await.unwrap();
        let TurnReport::Completed(summary) = report else {
            panic!("turn should complete");
        };
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.report.summary, "Created 1 entry");

        let items = session.items().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0].kind, ThreadItemKind::UserInput { .. }));
        assert!(items[1].can_undo());
        assert!(!items.iter().any(|i| i.is_status()));
        assert_eq!(session.input_state().await, InputState::Idle);

        let conversation = session.conversation().await;
        let tool = conversation.messages().last().unwrap();
        assert_eq!(tool.tool_call_id(), Some("call_1"));
        assert!(tool.content().unwrap().starts_with("Created ["));
        assert_eq!(session.entries(&EntryFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_turn_continues_conversation() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(create_body("call_1", &["Buy milk"])),
            Ok(tool_call_body(&[], Some("Got it."))),
        ]));
        let session = controller(&agent);

        session.submit_text("buy milk").await.unwrap();
        assert_eq!(session.conversation_len().await, 4);
        session.submit_text("actually oat milk").await.unwrap();
        assert_eq!(session.conversation_len().await, 6);
        assert_eq!(agent.context_sizes(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_history_is_truncated_before_each_call() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(tool_call_body(&[], Some("one"))),
            Ok(tool_call_body(&[], Some("two"))),
            Ok(tool_call_body(&[], Some("three"))),
        ]));
        let config = SessionConfig {
            max_history_messages: 4,
            ..SessionConfig::default()
        };
        let session = controller_with(&agent, config);

        session.submit_text("a").await.unwrap();
        session.submit_text("b").await.unwrap();
        assert_eq!(session.conversation_len().await, 5);

        session.submit_text("c").await.unwrap();
        let conversation = session.conversation().await;
        assert_eq!(conversation.len(), 6);
        assert_eq!(conversation.messages()[0].content(), Some("system"));
        assert_eq!(conversation.messages()[1].content(), Some("one"));
    }

    #[tokio::test]
    async fn test_busy_while_in_flight() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(create_body("call_1", &["Buy milk"]))]));
        agent.block_next_call();
        let session = controller(&agent);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit_text("buy milk").await })
        };
        agent.entered.notified().await;

        assert!(matches!(session.submit_text("call mom").await, Err(SessionError::Busy)));
        assert!(matches!(session.start_recording().await, Err(SessionError::Busy)));
        assert_eq!(session.input_state().await, InputState::Processing);

        agent.release.notify_one();
        assert!(matches!(first.await.unwrap(), Ok(TurnReport::Completed(_))));
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test]
    async fn test_superseded_turn_is_discarded() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(create_body("call_1", &["Second"])),
            Ok(create_body("call_2", &["Late"])),
        ]));
        agent.block_next_call();
        let session = controller(&agent);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit_text("first").await })
        };
        agent.entered.notified().await;

        assert!(session.cancel_processing().await);
        let second = session.submit_text("second").await.unwrap();
        assert!(matches!(second, TurnReport::Completed(TurnSummary { generation: 2, .. })));

        agent.release.notify_one();
        assert_eq!(
            first.await.unwrap().unwrap(),
            TurnReport::Superseded { generation: 1 }
        );

        let items = session.items().await;
        assert_eq!(action_item_ids(&items).len(), 1);
        assert!(!items.iter().any(|i| i.is_status()));
        assert_eq!(session.generation(), 2);
        assert_eq!(session.entries(&EntryFilter::all()).await.unwrap().len(), 1);
        assert_eq!(session.conversation_len().await, 4);
    }

    #[tokio::test]
    async fn test_failure_keeps_input_for_retry() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Err(AgentError::Http {
                status: 500,
                body: "oops".into(),
            }),
            Ok(create_body("call_1", &["Buy milk"])),
        ]));
        let session = controller(&agent);

        let err = session.submit_text("buy milk").await.unwrap_err();
        let SessionError::TurnFailed { retry_text, .. } = &err else {
            panic!("expected a failed turn");
        };
        assert_eq!(retry_text.as_deref(), Some("buy milk"));
        assert_eq!(err.user_message(), "Couldn't process: network error.");

        let items = session.items().await;
        let error_item = items.last().unwrap();
        assert!(matches!(
            &error_item.kind,
            ThreadItemKind::Error { message, .. } if message == "Couldn't process: network error."
        ));
        assert_eq!(session.conversation_len().await, 0);

        let retried = session.retry(error_item.id).await.unwrap();
        assert!(matches!(retried, TurnReport::Completed(_)));
        assert_eq!(agent.inputs(), vec!["buy milk", "buy milk"]);
        assert!(!session
            .items()
            .await
            .iter()
            .any(|i| matches!(i.kind, ThreadItemKind::Error { .. })));
        assert!(matches!(
            session.retry(error_item.id).await,
            Err(SessionError::UnknownItem(_))
        ));
    }

    #[tokio::test]
    async fn test_undo_only_for_current_generation() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(create_body("call_1", &["Buy milk"])),
            Ok(create_body("call_2", &["Call mom"])),
        ]));
        let session = controller(&agent);

        session.submit_text("buy milk").await.unwrap();
        session.submit_text("call mom").await.unwrap();
        let ids = action_item_ids(&session.items().await);
        assert_eq!(ids.len(), 2);

        assert_eq!(session.undo(ids[0]).await.unwrap(), UndoOutcome::Stale);
        assert_eq!(session.entries(&EntryFilter::all()).await.unwrap().len(), 2);

        let outcome = session.undo(ids[1]).await.unwrap();
        assert_eq!(
            outcome,
            UndoOutcome::Reverted(UndoSummary {
                reverted: 1,
                missing: 0
            })
        );
        let remaining = session.entries(&EntryFilter::all()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "Buy milk");
        assert!(matches!(session.undo(ids[1]).await, Err(SessionError::UnknownItem(_))));
    }

    #[tokio::test]
    async fn test_failed_undo_can_be_repeated() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(create_body("call_1", &["Buy milk"]))]));
        let (store, fail_saves) = SwitchableStore::new();
        let session = SessionController::new(
            Pipeline::new(agent.clone()),
            Box::new(store),
            Arc::new(NoopScheduler),
            SessionConfig::default(),
        );

        session.submit_text("buy milk").await.unwrap();
        let id = action_item_ids(&session.items().await)[0];

        fail_saves.store(true, Ordering::SeqCst);
        assert!(matches!(session.undo(id).await, Err(SessionError::Storage(_))));
        assert_eq!(action_item_ids(&session.items().await), vec![id]);
        assert_eq!(session.entries(&EntryFilter::all()).await.unwrap().len(), 1);

        fail_saves.store(false, Ordering::SeqCst);
        assert!(matches!(session.undo(id).await, Ok(UndoOutcome::Reverted(_))));
        assert!(action_item_ids(&session.items().await).is_empty());
        assert!(session.entries(&EntryFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_far_future_due_phrase_does_not_wedge_session() {
        let body = tool_call_body(
            &[(
                "call_1",
                "create_entries",
                json!({ "entries": [{
                    "content": "Renew passport",
                    "category": "todo",
                    "due_date": "in 100000000 days"
                }] }),
            )],
            None,
        );
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(body),
            Ok(create_body("call_2", &["Buy milk"])),
        ]));
        let session = controller(&agent);

        assert!(matches!(session.submit_text("renew passport").await, Ok(TurnReport::Completed(_))));
        let entries = session.entries(&EntryFilter::all()).await.unwrap();
        assert_eq!(entries[0].due_date, None);
        assert_eq!(entries[0].due_date_description.as_deref(), Some("in 100000000 days"));
        assert_eq!(session.input_state().await, InputState::Idle);

        assert!(matches!(session.submit_text("buy milk").await, Ok(TurnReport::Completed(_))));
    }

    #[tokio::test]
    async fn test_input_is_trimmed_and_capped() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(tool_call_body(&[], Some("ok")))]));
        let config = SessionConfig {
            max_input_chars: 10,
            ..SessionConfig::default()
        };
        let session = controller_with(&agent, config);

        assert!(matches!(session.submit_text("   ").await, Err(SessionError::EmptyInput)));
        session.submit_text("  abcdefghijklmnop ").await.unwrap();
        assert_eq!(agent.inputs(), vec!["abcdefghij"]);
    }

    #[tokio::test]
    async fn test_recording_status_is_replaced_in_place() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(create_body("call_1", &["Call mom"]))]));
        agent.block_next_call();
        let session = controller(&agent);

        assert!(matches!(session.stop_recording().await, Err(SessionError::NotRecording)));
        session.start_recording().await.unwrap();
        session.update_live_transcript("call").await;
        session.update_live_transcript("call mom").await;

        let items = session.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, STATUS_ITEM_ID);
        assert_eq!(
            items[0].kind,
            ThreadItemKind::Status(StatusKind::Recording {
                live_transcript: "call mom".into()
            })
        );

        let stop = {
            let session = session.clone();
            tokio::spawn(async move { session.stop_recording().await })
        };
        agent.entered.notified().await;
        let items = session.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ThreadItemKind::Status(StatusKind::Processing));

        agent.release.notify_one();
        assert!(matches!(stop.await.unwrap(), Ok(TurnReport::Completed(_))));
        let items = session.items().await;
        assert!(matches!(
            &items[0].kind,
            ThreadItemKind::UserInput { text, source: EntrySource::Voice } if text == "call mom tonight"
        ));
        assert!(!items.iter().any(|i| i.is_status()));
    }

    #[tokio::test]
    async fn test_cancel_recording_returns_to_idle() {
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let session = controller(&agent);

        session.start_recording().await.unwrap();
        assert_eq!(session.input_state().await, InputState::Recording);
        session.cancel_recording().await;

        assert_eq!(session.input_state().await, InputState::Idle);
        assert!(session.items().await.is_empty());
        assert!(!session.pipeline().is_recording());
        assert_eq!(agent.calls(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_item() {
        let body = tool_call_body(
            &[(
                "call_1",
                "request_confirmation",
                json!({ "message": "Archive all 12 entries?" }),
            )],
            None,
        );
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(body)]));
        let session = controller(&agent);

        session.submit_text("clear everything").await.unwrap();
        let items = session.items().await;
        assert!(items.iter().any(|i| matches!(
            &i.kind,
            ThreadItemKind::Confirmation { message } if message == "Archive all 12 entries?"
        )));
        assert!(!items.iter().any(|i| i.can_undo()));
    }

    #[tokio::test]
    async fn test_reset_clears_thread_and_keeps_counting() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(create_body("call_1", &["Buy milk"])),
            Ok(create_body("call_2", &["Call mom"])),
        ]));
        let session = controller(&agent);

        session.submit_text("buy milk").await.unwrap();
        session.reset().await;
        assert!(session.items().await.is_empty());
        assert_eq!(session.conversation_len().await, 0);
        assert_eq!(session.generation(), 2);

        let report = session.submit_text("call mom").await.unwrap();
        assert!(matches!(report, TurnReport::Completed(TurnSummary { generation: 3, .. })));
    }
}
