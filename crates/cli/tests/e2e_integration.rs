//! End-to-end integration tests for the Kestrel coding agent.
//!
//! These tests exercise the full pipeline from user input to agent output:
//! the orchestration loop, the stream protocol, the real built-in tools,
//! confirmation gating, pruning and provider switching.

use std::sync::{Arc, Mutex};

use kestrel_agent::{
    AgentBuilder, CodingAgent, ConversationStore, SessionConfirmation, StopReason, StreamChunk,
    CANCELLED_MARKER,
};
use kestrel_config::{AppConfig, ToolsConfig};
use kestrel_core::confirmation::{ConfirmationGate, ConfirmationResult, SessionFlags};
use kestrel_core::error::ProviderError;
use kestrel_core::message::{ChatEntry, ChatEntryKind, Message, ToolCall};
use kestrel_core::provider::{
    DeltaStream, ModelSlot, Provider, ProviderRequest, ProviderResponse, StreamDelta, ToolCallDelta,
};
use kestrel_core::tool::ToolResult;
use kestrel_providers::ProviderFactory;
use kestrel_tools::default_registry;
use tokio::sync::mpsc;

// ── Mock Provider ────────────────────────────────────────────────────────

#[derive(Clone)]
enum Round {
    /// Stream these deltas, then end the turn
    Reply(Vec<StreamDelta>),
    /// Stream these deltas, then stall until the receiver goes away
    Stall(Vec<StreamDelta>),
}

/// A streaming provider that plays scripted rounds; the last one repeats.
struct ScriptedProvider {
    model: ModelSlot,
    rounds: Vec<Round>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            model: ModelSlot::new("e2e-model"),
            rounds,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    fn current_model(&self) -> String {
        self.model.get()
    }

    fn set_model(&self, model: &str) {
        self.model.set(model);
    }

    async fn chat(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let round = {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len().min(self.rounds.len() - 1);
            requests.push(request);
            self.rounds[index].clone()
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let (deltas, stall) = match round {
                Round::Reply(deltas) => (deltas, false),
                Round::Stall(deltas) => (deltas, true),
            };
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

fn text(content: &str) -> Round {
    Round::Reply(vec![StreamDelta::text(content), StreamDelta::finished()])
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Round {
    raw_tool_call(id, name, &arguments.to_string())
}

fn raw_tool_call(id: &str, name: &str, arguments: &str) -> Round {
    Round::Reply(vec![
        StreamDelta {
            tool_calls: vec![ToolCallDelta::from(ToolCall::new(id, name, arguments))],
            ..Default::default()
        },
        StreamDelta::finished(),
    ])
}

fn agent(provider: Arc<ScriptedProvider>, gate: Arc<dyn ConfirmationGate>) -> Arc<CodingAgent> {
    let (tools, _) = default_registry(&ToolsConfig::default());
    AgentBuilder::new(provider).tools(tools).confirmation(gate).build()
}

async fn collect(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn kinds(entries: &[ChatEntry]) -> Vec<ChatEntryKind> {
    entries.iter().map(|e| e.kind).collect()
}

fn results(entries: &[ChatEntry]) -> Vec<ToolResult> {
    entries.iter().filter_map(|e| e.tool_result.clone()).collect()
}

// ── Scenario A: shell command with pre-approval ─────────────────────────

#[tokio::test]
async fn e2e_list_files_with_preapproved_bash() {
    let provider = ScriptedProvider::new(vec![
        tool_call("call_ls", "bash", serde_json::json!({ "command": "ls -la" })),
        text("Here are the files."),
    ]);
    let gate = Arc::new(SessionConfirmation::headless(SessionFlags {
        bash_commands: true,
        ..Default::default()
    }));
    let agent = agent(Arc::clone(&provider), gate);

    let chunks = collect(agent.process_user_message_stream("List files")).await;
    assert_eq!(chunks.last(), Some(&StreamChunk::Done { reason: StopReason::Completed }));

    let history = agent.chat_history().await;
    assert_eq!(
        kinds(&history),
        vec![
            ChatEntryKind::User,
            ChatEntryKind::ToolCall,
            ChatEntryKind::ToolResult,
            ChatEntryKind::Assistant
        ]
    );
    let result = history[2].tool_result.clone().unwrap();
    assert!(result.success, "ls failed: {result:?}");
    assert!(result.output.unwrap().contains("total"));
    assert_eq!(history[3].content, "Here are the files.");
}

// ── Scenario B: empty message ───────────────────────────────────────────

#[tokio::test]
async fn e2e_empty_message_gets_a_reply() {
    let provider = ScriptedProvider::new(vec![text("What would you like to do?")]);
    let agent = agent(provider, Arc::new(SessionConfirmation::auto_approve()));

    let entries = agent.process_user_message("").await;
    assert!(entries.len() >= 2);
    assert_eq!(entries[0].kind, ChatEntryKind::User);
    assert!(entries.iter().any(|e| e.kind == ChatEntryKind::Assistant));
}

// ── Scenario C: abort mid-stream ────────────────────────────────────────

#[tokio::test]
async fn e2e_abort_mid_stream() {
    let provider = ScriptedProvider::new(vec![Round::Stall(vec![StreamDelta::text("Reading the ")])]);
    let agent = agent(Arc::clone(&provider), Arc::new(SessionConfirmation::auto_approve()));

    let mut rx = agent.process_user_message_stream("Refactor everything");
    let mut chunks = Vec::new();
    let mut aborted = false;
    while let Some(chunk) = rx.recv().await {
        if !aborted && matches!(chunk, StreamChunk::Content { .. }) {
            agent.abort_current_operation();
            aborted = true;
        }
        chunks.push(chunk);
    }

    assert_eq!(chunks.last(), Some(&StreamChunk::Done { reason: StopReason::Cancelled }));
    let content: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(content.contains(CANCELLED_MARKER));
    assert_eq!(provider.calls(), 1);
}

// ── Scenario D: round limit ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_round_limit_with_tool_happy_provider() {
    let provider = ScriptedProvider::new(vec![tool_call(
        "call_todo",
        "todo_list",
        serde_json::json!({ "action": "view" }),
    )]);
    let (tools, _) = default_registry(&ToolsConfig::default());
    let agent = AgentBuilder::new(Arc::clone(&provider) as Arc<dyn Provider>)
        .tools(tools)
        .max_tool_rounds(2)
        .build();

    let chunks = collect(agent.process_user_message_stream("Plan forever")).await;

    assert_eq!(provider.calls(), 2);
    let history = agent.chat_history().await;
    let executed = results(&history);
    assert_eq!(executed.len(), 2);
    assert!(executed.iter().all(|r| r.success));
    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Done { reason: StopReason::RoundLimitReached })
    );
}

// ── Scenario E: malformed arguments ─────────────────────────────────────

#[tokio::test]
async fn e2e_malformed_arguments_recover() {
    let provider = ScriptedProvider::new(vec![
        raw_tool_call("call_bad", "view_file", "not json"),
        text("Sorry, let me try again."),
    ]);
    let agent = agent(Arc::clone(&provider), Arc::new(SessionConfirmation::auto_approve()));

    let entries = agent.process_user_message("Show main.rs").await;
    let executed = results(&entries);
    assert_eq!(executed, vec![ToolResult::failure("invalid arguments")]);
    assert_eq!(provider.calls(), 2);
    assert_eq!(entries.last().unwrap().content, "Sorry, let me try again.");
}

// ── Properties ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_tool_results_match_tool_calls() {
    let provider = ScriptedProvider::new(vec![
        Round::Reply(vec![
            StreamDelta::text("Checking three things."),
            StreamDelta {
                tool_calls: vec![
                    ToolCallDelta::from(ToolCall::new("a", "todo_list", r#"{"action":"view"}"#)),
                    ToolCallDelta::from(ToolCall::new("b", "no_such_tool", "{}")),
                    ToolCallDelta {
                        id: "c".into(),
                        name: Some("todo_list".into()),
                        arguments: r#"{"action":"#.into(),
                    },
                ],
                ..Default::default()
            },
            StreamDelta {
                tool_calls: vec![ToolCallDelta {
                    id: "c".into(),
                    name: None,
                    arguments: r#""view"}"#.into(),
                }],
                ..Default::default()
            },
            StreamDelta::finished(),
        ]),
        text("All done."),
    ]);
    let agent = agent(provider, Arc::new(SessionConfirmation::auto_approve()));

    let chunks = collect(agent.process_user_message_stream("check")).await;

    let requested: Vec<String> = chunks
        .iter()
        .find_map(|c| match c {
            StreamChunk::ToolCalls { tool_calls } => Some(tool_calls.iter().map(|t| t.id.clone()).collect()),
            _ => None,
        })
        .unwrap();
    let answered: Vec<String> = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::ToolResult { tool_call, .. } => Some(tool_call.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(requested, vec!["a", "b", "c"]);
    assert_eq!(answered, requested);

    let done = chunks.iter().filter(|c| matches!(c, StreamChunk::Done { .. })).count();
    assert_eq!(done, 1);

    // The streamed assistant entry carries the call list
    let history = agent.chat_history().await;
    assert_eq!(history[1].content, "Checking three things.");
    assert_eq!(history[1].tool_calls.as_ref().map(Vec::len), Some(3));
}

#[tokio::test]
async fn e2e_abort_is_idempotent() {
    let provider = ScriptedProvider::new(vec![Round::Stall(vec![StreamDelta::text("...")])]);
    let agent = agent(Arc::clone(&provider), Arc::new(SessionConfirmation::auto_approve()));

    let mut rx = agent.process_user_message_stream("go");
    while let Some(chunk) = rx.recv().await {
        if matches!(chunk, StreamChunk::Content { .. }) {
            agent.abort_current_operation();
            agent.abort_current_operation();
            break;
        }
    }
    let rest = collect(rx).await;
    assert_eq!(rest.last(), Some(&StreamChunk::Done { reason: StopReason::Cancelled }));

    let history = agent.chat_history().await;
    let markers = history
        .iter()
        .filter(|e| e.content.contains(CANCELLED_MARKER))
        .count();
    assert_eq!(markers, 1);
}

#[tokio::test]
async fn e2e_set_provider_without_credential_keeps_state() {
    let provider = ScriptedProvider::new(vec![text("hi")]);
    let agent = AgentBuilder::new(Arc::clone(&provider) as Arc<dyn Provider>)
        .resolver(Arc::new(ProviderFactory::new(AppConfig::default())))
        .build();
    agent.set_model("e2e-large");

    let err = agent.set_provider("anthropic").unwrap_err();
    assert!(matches!(err, ProviderError::MissingCredential { .. }));
    assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    assert_eq!(agent.provider_name(), "e2e_mock");
    assert_eq!(agent.current_model(), "e2e-large");

    // A credential-less provider switches and keeps history
    agent.process_user_message("remember me").await;
    agent.set_provider("ollama").unwrap();
    assert_eq!(agent.provider_name(), "ollama");
    assert_eq!(agent.chat_history().await.len(), 2);
}

#[tokio::test]
async fn e2e_pruning_keeps_exchanges_whole() {
    let mut store = ConversationStore::with_preamble("You are a coding agent.");
    for n in 0..20 {
        let call = ToolCall::new(format!("call_{n}"), "bash", r#"{"command":"cat big.log"}"#);
        store.append(ChatEntry::user(format!("step {n}")));
        let mut assistant = ChatEntry::assistant("Reading the log.");
        assistant.tool_calls = Some(vec![call.clone()]);
        store.append(assistant);
        store.append(ChatEntry::tool_call(call.clone()));
        store.append(ChatEntry::tool_result(call, ToolResult::ok("log line\n".repeat(50))));
        store.append(ChatEntry::assistant(format!("Step {n} looks fine.")));
    }

    let report = store.prune(2_000);
    assert!(report.within_budget);
    assert!(report.removed > 0);

    let entries = store.entries();
    for (i, entry) in entries.iter().enumerate() {
        if entry.kind == ChatEntryKind::ToolCall {
            let id = entry.call_id().unwrap();
            assert!(
                entries[i + 1..]
                    .iter()
                    .any(|e| e.kind == ChatEntryKind::ToolResult && e.call_id() == Some(id)),
                "call {id} lost its result"
            );
        }
        if entry.kind == ChatEntryKind::ToolResult {
            let id = entry.call_id().unwrap();
            assert!(
                entries[..i]
                    .iter()
                    .any(|e| e.kind == ChatEntryKind::ToolCall && e.call_id() == Some(id)),
                "result {id} lost its call"
            );
        }
    }
    assert_eq!(entries.last().unwrap().content, "Step 19 looks fine.");

    let messages: Vec<Message> = store.to_messages();
    assert_eq!(messages[0].content, "You are a coding agent.");
}

// ── Confirmation flows with real file tools ─────────────────────────────

#[tokio::test]
async fn e2e_rejected_edit_carries_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("notes.txt");

    let provider = ScriptedProvider::new(vec![
        tool_call(
            "call_create",
            "create_file",
            serde_json::json!({ "path": target.to_str().unwrap(), "content": "hello\n" }),
        ),
        text("Understood, I won't create it."),
    ]);

    let (gate, mut pending) = SessionConfirmation::new(SessionFlags::default());
    tokio::spawn(async move {
        while let Some(request) = pending.recv().await {
            request.respond(ConfirmationResult::rejected(Some("put it in docs/ instead".into())));
        }
    });
    let agent = agent(provider, Arc::new(gate));

    let entries = agent.process_user_message("Create notes.txt").await;
    assert_eq!(
        results(&entries),
        vec![ToolResult::failure("put it in docs/ instead")]
    );
    assert!(!target.exists());
}

#[tokio::test]
async fn e2e_always_approve_then_edit_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("lib.rs");
    let path = target.to_str().unwrap().to_string();

    let provider = ScriptedProvider::new(vec![
        tool_call(
            "call_create",
            "create_file",
            serde_json::json!({ "path": path, "content": "fn answer() -> u32 { 41 }\n" }),
        ),
        tool_call(
            "call_edit",
            "str_replace_editor",
            serde_json::json!({ "path": path, "old_str": "41", "new_str": "42" }),
        ),
        tool_call("call_view", "view_file", serde_json::json!({ "path": path })),
        text("Fixed the answer."),
    ]);

    let (gate, mut pending) = SessionConfirmation::new(SessionFlags::default());
    let asked = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&asked);
    tokio::spawn(async move {
        while let Some(request) = pending.recv().await {
            *counter.lock().unwrap() += 1;
            request.respond(ConfirmationResult {
                confirmed: true,
                feedback: None,
                dont_ask_again: true,
            });
        }
    });
    let gate: Arc<dyn ConfirmationGate> = Arc::new(gate);
    let agent = agent(provider, Arc::clone(&gate));

    let entries = agent.process_user_message("Fix the answer").await;

    assert!(results(&entries).iter().all(|r| r.success));
    assert_eq!(*asked.lock().unwrap(), 1);
    assert!(gate.session_flags().file_operations);
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "fn answer() -> u32 { 42 }\n"
    );
}
