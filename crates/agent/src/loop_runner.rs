//! The agent orchestration loop.
//!
//! One user message drives a bounded sequence of rounds. Each round prunes
//! the history, streams a completion from the active provider and, if the
//! model asked for tools, dispatches them and goes again. The run ends on a
//! content-only reply, the round limit, a provider error or cancellation;
//! every ending leaves a readable assistant entry and one `done` chunk.

use kestrel_config::AppConfig;
use kestrel_core::confirmation::{ConfirmationGate, SessionFlags};
use kestrel_core::error::ProviderError;
use kestrel_core::event::{DomainEvent, EventBus};
use kestrel_core::message::{ChatEntry, ToolCall};
use kestrel_core::provider::{DeltaStream, Provider, ProviderRequest, ProviderResolver, ToolCallDelta};
use kestrel_core::tool::ToolRegistry;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::confirmation::SessionConfirmation;
use crate::conversation::ConversationStore;
use crate::dispatcher::Dispatcher;
use crate::prompt::{compose_system_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::stream_chunk::{ChunkSink, StopReason, StreamChunk};
use crate::token::estimate_tools_tokens;

/// Appended to partial content when the user aborts.
pub const CANCELLED_MARKER: &str = "[Operation cancelled by user]";

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 400;

const TOKEN_COUNT_INTERVAL: Duration = Duration::from_millis(250);
const STREAM_BUFFER: usize = 64;

/// Tunables for a [`CodingAgent`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_tool_rounds: u32,
    pub context_token_limit: usize,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            context_token_limit: 128_000,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Mutable working state, guarded for the whole of a run.
struct Session {
    store: ConversationStore,
    rounds: u32,
}

/// A tool call being assembled from stream fragments.
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Fold a fragment into the pending list. Fragments for one id concatenate
/// and the first non-empty name wins.
fn accumulate(pending: &mut Vec<PendingCall>, fragment: ToolCallDelta) {
    match pending.iter_mut().find(|p| p.id == fragment.id) {
        Some(call) => {
            if call.name.is_empty()
                && let Some(name) = fragment.name
            {
                call.name = name;
            }
            call.arguments.push_str(&fragment.arguments);
        }
        None => pending.push(PendingCall {
            id: fragment.id,
            name: fragment.name.unwrap_or_default(),
            arguments: fragment.arguments,
        }),
    }
}

enum RoundOutcome {
    Finished {
        calls: Vec<ToolCall>,
        streamed: Option<usize>,
    },
    Cancelled {
        streamed: Option<usize>,
    },
    Failed {
        error: ProviderError,
        streamed: Option<usize>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The coding agent: conversation, active provider, tools and the loop.
pub struct CodingAgent {
    session: tokio::sync::Mutex<Session>,
    provider: RwLock<Arc<dyn Provider>>,
    resolver: Option<Arc<dyn ProviderResolver>>,
    dispatcher: Dispatcher,
    /// Parent of every started operation's token. Replaced after an abort.
    operation: Mutex<CancellationToken>,
    model_cache: Mutex<Option<(String, Vec<String>)>>,
    events: Arc<EventBus>,
    settings: AgentSettings,
}

impl CodingAgent {
    pub fn builder(provider: Arc<dyn Provider>) -> AgentBuilder {
        AgentBuilder::new(provider)
    }

    // ── Messages ────────────────────────────────────────────────────────

    /// Run one user message to completion and return the entries it added.
    pub async fn process_user_message(&self, message: impl Into<String>) -> Vec<ChatEntry> {
        let cancel = self.begin_operation();
        self.run(message.into(), ChunkSink::discard(), cancel).await
    }

    /// Run one user message on a background task, streaming chunks.
    ///
    /// The last chunk is always `done`. Dropping the receiver cancels the
    /// operation.
    pub fn process_user_message_stream(self: &Arc<Self>, message: impl Into<String>) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = self.begin_operation();
        let agent = Arc::clone(self);
        let message = message.into();
        tokio::spawn(async move {
            agent.run(message, ChunkSink::channel(tx), cancel).await;
        });
        rx
    }

    /// Cancel every started operation, running or waiting for the session.
    /// Idempotent.
    pub fn abort_current_operation(&self) {
        let token = lock(&self.operation);
        if !token.is_cancelled() {
            info!("Aborting current operation");
            token.cancel();
        }
    }

    // ── Providers ───────────────────────────────────────────────────────

    fn active_provider(&self) -> Arc<dyn Provider> {
        match self.provider.read() {
            Ok(provider) => Arc::clone(&provider),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn provider_name(&self) -> String {
        self.active_provider().name().to_string()
    }

    /// Provider IDs the resolver can build.
    pub fn known_providers(&self) -> Vec<String> {
        self.resolver
            .as_ref()
            .map(|r| r.known_providers())
            .unwrap_or_default()
    }

    /// Swap the active provider. History is kept.
    ///
    /// On failure the previous provider and model stay active.
    pub fn set_provider(&self, provider_id: &str) -> Result<(), ProviderError> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("No provider resolver configured".into()))?;

        let next = resolver.resolve(provider_id)?;
        let model = next.current_model();

        let previous = {
            let mut slot = match self.provider.write() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *slot, next)
        };
        *lock(&self.model_cache) = None;

        info!(from = previous.name(), to = provider_id, model = %model, "Switched provider");
        self.events.publish(DomainEvent::ProviderSwitched {
            from: previous.name().to_string(),
            to: provider_id.to_string(),
            model,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub fn set_model(&self, model: &str) {
        let provider = self.active_provider();
        provider.set_model(model);
        info!(provider = provider.name(), model, "Switched model");
    }

    pub fn current_model(&self) -> String {
        self.active_provider().current_model()
    }

    /// Models offered by the active provider, cached until the provider
    /// changes or `force_refresh` is set.
    pub async fn fetch_available_models(&self, force_refresh: bool) -> Result<Vec<String>, ProviderError> {
        let provider = self.active_provider();

        if !force_refresh
            && let Some((owner, models)) = lock(&self.model_cache).as_ref()
            && owner == provider.name()
        {
            return Ok(models.clone());
        }

        let models = provider.list_models().await?;
        debug!(provider = provider.name(), count = models.len(), "Fetched models");
        *lock(&self.model_cache) = Some((provider.name().to_string(), models.clone()));
        Ok(models)
    }

    // ── History ─────────────────────────────────────────────────────────

    /// A snapshot of the transcript. Waits for a running operation.
    pub async fn chat_history(&self) -> Vec<ChatEntry> {
        self.session.lock().await.store.entries().to_vec()
    }

    /// Drop the transcript. The system preamble stays.
    pub async fn clear_history(&self) {
        let mut session = self.session.lock().await;
        session.store.clear();
        session.rounds = 0;
        debug!("Cleared conversation history");
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    pub fn confirmation(&self) -> &Arc<dyn ConfirmationGate> {
        self.dispatcher.gate()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    // ── The loop ────────────────────────────────────────────────────────

    /// Hand out the token for an operation at the moment it starts, before
    /// it waits for the session. An abort issued earlier does not carry over.
    fn begin_operation(&self) -> CancellationToken {
        let mut parent = lock(&self.operation);
        if parent.is_cancelled() {
            *parent = CancellationToken::new();
        }
        parent.child_token()
    }

    async fn run(&self, message: String, sink: ChunkSink, cancel: CancellationToken) -> Vec<ChatEntry> {
        let mut guard = self.session.lock().await;
        let session = &mut *guard;

        session.rounds = 0;
        session.store.append(ChatEntry::user(message));
        info!(
            provider = %self.provider_name(),
            model = %self.current_model(),
            history = session.store.len(),
            "Processing user message"
        );

        let reason = self.drive(session, &sink, &cancel).await;

        info!(reason = %reason, rounds = session.rounds, "Operation finished");
        self.events.publish(DomainEvent::OperationFinished {
            reason: reason.to_string(),
            rounds: session.rounds,
            timestamp: chrono::Utc::now(),
        });
        sink.emit(StreamChunk::Done { reason }).await;

        session.store.current_turn().to_vec()
    }

    async fn drive(&self, session: &mut Session, sink: &ChunkSink, cancel: &CancellationToken) -> StopReason {
        let tools = self.dispatcher.tools().definitions();
        let schema_tokens = estimate_tools_tokens(&tools);

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(&mut session.store, None, sink).await;
            }

            let budget = self.settings.context_token_limit.saturating_sub(schema_tokens);
            let report = session.store.prune(budget);
            if !report.within_budget {
                warn!(
                    estimated_tokens = report.estimated_tokens + schema_tokens,
                    limit = self.settings.context_token_limit,
                    "Conversation exceeds the context budget after pruning"
                );
            }

            let estimated = session.store.estimated_tokens() + schema_tokens;
            if !sink.emit(StreamChunk::TokenCount { token_count: estimated }).await {
                cancel.cancel();
                continue;
            }

            let provider = self.active_provider();
            let request = ProviderRequest {
                messages: session.store.to_messages(),
                tools: tools.clone(),
                model: None,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            };
            let round = session.rounds + 1;
            debug!(round, messages = request.messages.len(), estimated, "Requesting completion");

            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish_cancelled(&mut session.store, None, sink).await,
                _ = sink.closed() => {
                    cancel.cancel();
                    return self.finish_cancelled(&mut session.store, None, sink).await;
                }
                stream = provider.chat_stream(request) => stream,
            };
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(error) => return self.finish_failed(&mut session.store, None, error, sink).await,
            };

            let consumed = self
                .consume(&mut session.store, &mut stream, schema_tokens, sink, cancel)
                .await;
            let (calls, streamed) = match consumed {
                RoundOutcome::Finished { calls, streamed } => (calls, streamed),
                RoundOutcome::Cancelled { streamed } => {
                    return self.finish_cancelled(&mut session.store, streamed, sink).await;
                }
                RoundOutcome::Failed { error, streamed } => {
                    return self.finish_failed(&mut session.store, streamed, error, sink).await;
                }
            };
            drop(stream);

            self.events.publish(DomainEvent::ResponseGenerated {
                provider: provider.name().to_string(),
                model: provider.current_model(),
                round,
                estimated_tokens: session.store.estimated_tokens() + schema_tokens,
                timestamp: chrono::Utc::now(),
            });

            if calls.is_empty() {
                if let Some(index) = streamed
                    && let Some(entry) = session.store.get_mut(index)
                {
                    entry.freeze();
                } else {
                    session.store.append(ChatEntry::assistant(""));
                }
                return StopReason::Completed;
            }

            if let Some(index) = streamed
                && let Some(entry) = session.store.get_mut(index)
            {
                entry.tool_calls = Some(calls.clone());
                entry.freeze();
            }
            for call in &calls {
                session.store.append(ChatEntry::tool_call(call.clone()));
            }
            debug!(round, count = calls.len(), "Dispatching tool calls");
            if !sink.emit(StreamChunk::ToolCalls { tool_calls: calls.clone() }).await {
                cancel.cancel();
            }

            self.dispatcher.dispatch(&calls, &mut session.store, sink, cancel).await;
            session.rounds = round;

            if cancel.is_cancelled() {
                return self.finish_cancelled(&mut session.store, None, sink).await;
            }

            if session.rounds >= self.settings.max_tool_rounds {
                warn!(rounds = session.rounds, "Tool round limit reached");
                let text = format!(
                    "I've reached the maximum of {} tool rounds for this request. Send another message to let me continue.",
                    self.settings.max_tool_rounds
                );
                session.store.append(ChatEntry::assistant(text.clone()));
                sink.emit(StreamChunk::Content { content: text }).await;
                return StopReason::RoundLimitReached;
            }
        }
    }

    /// Read one provider stream into the store. `schema_tokens` is added to
    /// every `token_count` report.
    async fn consume(
        &self,
        store: &mut ConversationStore,
        stream: &mut DeltaStream,
        schema_tokens: usize,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> RoundOutcome {
        let mut streamed: Option<usize> = None;
        let mut pending: Vec<PendingCall> = Vec::new();
        let mut last_count = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RoundOutcome::Cancelled { streamed },
                _ = sink.closed() => {
                    cancel.cancel();
                    return RoundOutcome::Cancelled { streamed };
                }
                next = stream.recv() => next,
            };

            let delta = match next {
                None => break,
                Some(Err(error)) => return RoundOutcome::Failed { error, streamed },
                Some(Ok(delta)) => delta,
            };

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                let index = *streamed.get_or_insert_with(|| store.append(ChatEntry::streaming_assistant()));
                if let Some(entry) = store.get_mut(index) {
                    entry.push_content(&text);
                }
                if !sink.emit(StreamChunk::Content { content: text }).await {
                    cancel.cancel();
                    continue;
                }
                if last_count.elapsed() >= TOKEN_COUNT_INTERVAL {
                    let token_count = store.estimated_tokens() + schema_tokens;
                    sink.emit(StreamChunk::TokenCount { token_count }).await;
                    last_count = Instant::now();
                }
            }

            for fragment in delta.tool_calls {
                accumulate(&mut pending, fragment);
            }

            if delta.done {
                break;
            }
        }

        let calls = pending
            .into_iter()
            .map(|p| ToolCall::new(p.id, p.name, p.arguments))
            .collect();
        RoundOutcome::Finished { calls, streamed }
    }

    async fn finish_cancelled(
        &self,
        store: &mut ConversationStore,
        streamed: Option<usize>,
        sink: &ChunkSink,
    ) -> StopReason {
        let marker = if let Some(index) = streamed
            && let Some(entry) = store.get_mut(index)
        {
            let marker = format!("\n\n{CANCELLED_MARKER}");
            entry.push_content(&marker);
            entry.freeze();
            marker
        } else {
            store.append(ChatEntry::assistant(CANCELLED_MARKER));
            CANCELLED_MARKER.to_string()
        };
        sink.emit(StreamChunk::Content { content: marker }).await;
        StopReason::Cancelled
    }

    async fn finish_failed(
        &self,
        store: &mut ConversationStore,
        streamed: Option<usize>,
        error: ProviderError,
        sink: &ChunkSink,
    ) -> StopReason {
        warn!(provider = %self.provider_name(), error = %error, "Provider request failed");
        if let Some(index) = streamed
            && let Some(entry) = store.get_mut(index)
        {
            entry.freeze();
        }
        let text = format!("Sorry, I encountered an error: {error}");
        store.append(ChatEntry::assistant(text.clone()));
        sink.emit(StreamChunk::Content { content: text }).await;
        StopReason::Error
    }
}

/// Assembles a [`CodingAgent`] from explicit dependencies.
pub struct AgentBuilder {
    provider: Arc<dyn Provider>,
    resolver: Option<Arc<dyn ProviderResolver>>,
    tools: Arc<ToolRegistry>,
    gate: Option<Arc<dyn ConfirmationGate>>,
    events: Option<Arc<EventBus>>,
    system_prompt: Option<String>,
    settings: AgentSettings,
}

impl AgentBuilder {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            resolver: None,
            tools: Arc::new(ToolRegistry::new()),
            gate: None,
            events: None,
            system_prompt: None,
            settings: AgentSettings::default(),
        }
    }

    /// Take limits, sampling and the system prompt from the app config.
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.settings = AgentSettings {
            max_tool_rounds: config.agent.max_tool_rounds.max(1),
            context_token_limit: config.agent.context_token_limit,
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        };
        self.system_prompt = Some(compose_system_prompt(&config.agent));
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ProviderResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn confirmation(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.settings.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn context_token_limit(mut self, limit: usize) -> Self {
        self.settings.context_token_limit = limit;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = Some(max_tokens);
        self
    }

    pub fn build(self) -> Arc<CodingAgent> {
        let events = self.events.unwrap_or_default();
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(SessionConfirmation::headless(SessionFlags::default())));
        let preamble = self.system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Arc::new(CodingAgent {
            session: tokio::sync::Mutex::new(Session {
                store: ConversationStore::with_preamble(preamble),
                rounds: 0,
            }),
            provider: RwLock::new(self.provider),
            resolver: self.resolver,
            dispatcher: Dispatcher::new(self.tools, gate, Arc::clone(&events)),
            operation: Mutex::new(CancellationToken::new()),
            model_cache: Mutex::new(None),
            events,
            settings: self.settings,
        })
    }
}
