//! ============================================================================
//! Pipeline - One agent turn from text or recorded speech
//! ============================================================================
//! idle -> capturing -> agent turn -> settled
//!
//! Credits are authorized before the agent is called and charged with the
//! usage it reports. Anything that fails before a successful agent response
//! releases the authorization, so failed turns are never billed.
//! ============================================================================

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, AgentRequest, AgentResponse, AgentService};
use crate::conversation::Conversation;
use crate::credits::{CreditError, CreditGate, CreditReceipt, ServicePricing};
use crate::store::{MemoryStore, StoreError};
use crate::transcriber::{Transcriber, TranscriberError, Transcript};
use crate::types::{agent_context, Entry, EntrySource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Speech recognition is not available")]
    TranscriberUnavailable,

    #[error("Not currently recording")]
    NotRecording,

    #[error("Transcription failed")]
    TranscriptionFailed(#[source] TranscriberError),

    #[error("Transcript was empty")]
    EmptyTranscript,

    #[error("Agent call failed")]
    ExtractionFailed(#[source] AgentError),

    #[error("Agent returned no actionable output")]
    NoActionableOutput,

    #[error("Storage failed")]
    StorageFailed(#[source] StoreError),

    #[error("Insufficient credits (balance {balance})")]
    InsufficientCredits { balance: i64 },

    #[error("Credit ledger error")]
    CreditsFailed(#[source] CreditError),

    #[error("No active session to refine")]
    NoActiveSession,
}

impl PipelineError {
    /// Short text safe to show the user
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::InsufficientCredits { .. } => "Out of credits.",
            PipelineError::EmptyTranscript => "Nothing to process.",
            PipelineError::NoActionableOutput => "No entries found in your input.",
            PipelineError::ExtractionFailed(e) if e.is_transport() => {
                "Couldn't process: network error."
            }
            PipelineError::TranscriberUnavailable => "Voice input isn't available.",
            PipelineError::NoActiveSession => "Nothing to refine yet.",
            _ => "Couldn't process. Try again.",
        }
    }
}

impl From<CreditError> for PipelineError {
    fn from(e: CreditError) -> Self {
        match e {
            CreditError::InsufficientBalance { current } => {
                PipelineError::InsufficientCredits { balance: current }
            }
            CreditError::Persistence(store) => PipelineError::StorageFailed(store),
            other => PipelineError::CreditsFailed(other),
        }
    }
}

impl From<AgentError> for PipelineError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::NoActionableOutput => PipelineError::NoActionableOutput,
            other => PipelineError::ExtractionFailed(other),
        }
    }
}

fn transcriber_error(e: TranscriberError) -> PipelineError {
    match e {
        TranscriberError::Unavailable => PipelineError::TranscriberUnavailable,
        TranscriberError::NotRecording => PipelineError::NotRecording,
        other => PipelineError::TranscriptionFailed(other),
    }
}

/// Outcome of one successful agent turn
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub response: AgentResponse,
    /// Text the agent was given
    pub input: String,
    pub source: EntrySource,
    pub transcript: Option<Transcript>,
    /// Present when a credit gate is configured
    pub receipt: Option<CreditReceipt>,
}

pub struct Pipeline {
    agent: Arc<dyn AgentService>,
    transcriber: Option<Arc<dyn Transcriber>>,
    credits: Option<Arc<dyn CreditGate>>,
    pricing: ServicePricing,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl Pipeline {
    pub fn new(agent: Arc<dyn AgentService>) -> Self {
        Self {
            agent,
            transcriber: None,
            credits: None,
            pricing: ServicePricing::default(),
            memory: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_credits(mut self, gate: Arc<dyn CreditGate>, pricing: ServicePricing) -> Self {
        self.credits = Some(gate);
        self.pricing = pricing;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.memory.as_ref()
    }

    pub fn credits(&self) -> Option<&Arc<dyn CreditGate>> {
        self.credits.as_ref()
    }

    fn transcriber(&self) -> Result<&Arc<dyn Transcriber>, PipelineError> {
        self.transcriber
            .as_ref()
            .filter(|t| t.is_available())
            .ok_or(PipelineError::TranscriberUnavailable)
    }

    pub fn is_recording(&self) -> bool {
        self.transcriber.as_ref().is_some_and(|t| t.is_recording())
    }

    /// Live partial transcript of the recording in progress
    pub fn live_transcript(&self) -> String {
        self.transcriber
            .as_ref()
            .map(|t| t.current_transcript())
            .unwrap_or_default()
    }

    // ========================================================================
    // Capture
    // ========================================================================

    pub async fn start_recording(&self) -> Result<(), PipelineError> {
        let transcriber = self.transcriber()?;
        transcriber.start_recording().await.map_err(transcriber_error)?;
        info!("Recording started");
        Ok(())
    }

    pub async fn stop_recording(&self) -> Result<Transcript, PipelineError> {
        let transcriber = self.transcriber()?;
        if !transcriber.is_recording() {
            return Err(PipelineError::NotRecording);
        }
        let transcript = transcriber.stop_recording().await.map_err(transcriber_error)?;
        info!(
            "Recording stopped: {} chars, {:?}s",
            transcript.text.len(),
            transcript.duration()
        );
        Ok(transcript)
    }

    pub async fn cancel_recording(&self) {
        if let Some(transcriber) = self.transcriber.as_ref().filter(|t| t.is_recording()) {
            transcriber.cancel_recording().await;
            info!("Recording cancelled");
        }
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Start a new thread from typed text
    pub async fn run_from_text(
        &self,
        conversation: &mut Conversation,
        text: &str,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        conversation.reset();
        self.run_turn(conversation, text, EntrySource::Text, None, entries)
            .await
    }

    /// Stop the active recording and start a new thread from it
    pub async fn run_from_recording(
        &self,
        conversation: &mut Conversation,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        let transcript = self.stop_recording().await?;
        conversation.reset();
        self.process_transcript(conversation, transcript, entries).await
    }

    /// Run a turn for a finished transcript, continuing `conversation`
    pub async fn process_transcript(
        &self,
        conversation: &mut Conversation,
        transcript: Transcript,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        if transcript.is_blank() {
            return Err(PipelineError::EmptyTranscript);
        }
        let text = transcript.text.clone();
        self.run_turn(conversation, &text, EntrySource::Voice, Some(transcript), entries)
            .await
    }

    /// Follow-up text in the existing thread
    pub async fn refine_from_text(
        &self,
        conversation: &mut Conversation,
        text: &str,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        if conversation.is_empty() {
            return Err(PipelineError::NoActiveSession);
        }
        self.run_turn(conversation, text, EntrySource::Text, None, entries)
            .await
    }

    /// Follow-up speech in the existing thread
    pub async fn refine_from_recording(
        &self,
        conversation: &mut Conversation,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        if conversation.is_empty() {
            self.cancel_recording().await;
            return Err(PipelineError::NoActiveSession);
        }
        let transcript = self.stop_recording().await?;
        self.process_transcript(conversation, transcript, entries).await
    }

    async fn run_turn(
        &self,
        conversation: &mut Conversation,
        input: &str,
        source: EntrySource,
        transcript: Option<Transcript>,
        entries: &[Entry],
    ) -> Result<TurnResult, PipelineError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PipelineError::EmptyTranscript);
        }

        let memory = match &self.memory {
            Some(store) => match store.load() {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Continuing without agent memory: {}", e);
                    None
                }
            },
            None => None,
        };

        let authorization = match &self.credits {
            Some(gate) => Some(gate.authorize().await?),
            None => None,
        };

        let context = agent_context(entries);
        let request = AgentRequest {
            input,
            entries: &context,
            memory: memory.as_deref(),
        };
        debug!("Agent turn with {} context entries", context.len());

        let response = match self.agent.send(conversation, request).await {
            Ok(response) => response,
            Err(e) => {
                if let (Some(gate), Some(auth)) = (&self.credits, &authorization) {
                    gate.release(auth).await;
                }
                warn!("Agent turn failed: {}", e);
                return Err(e.into());
            }
        };

        let receipt = match (&self.credits, &authorization) {
            (Some(gate), Some(auth)) => {
                let receipt = gate.charge(auth, response.usage, &self.pricing).await?;
                info!(
                    "Charged {} credits, balance {}",
                    receipt.credits_charged, receipt.new_balance
                );
                Some(receipt)
            }
            _ => None,
        };

        Ok(TurnResult {
            response,
            input: input.to_string(),
            source,
            transcript,
            receipt,
        })
    }
}
