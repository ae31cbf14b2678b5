//! `kestrel chat`: Interactive or single-message chat mode.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use kestrel_agent::{CodingAgent, PendingConfirmation, StopReason, StreamChunk};
use kestrel_core::confirmation::{ConfirmationRequest, ConfirmationResult};
use kestrel_core::event::EventBus;
use kestrel_tools::render_checklist;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{build_session, load_config, ChatOptions, Session};

type Input = Lines<BufReader<Stdin>>;

pub async fn run(message: Option<String>, options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&options)?;
    let Session {
        agent,
        mut confirmations,
        todos,
    } = build_session(&config, &options)?;

    spawn_event_logger(agent.events());
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if let Some(message) = message {
        // Single message mode
        run_turn(&agent, message, &mut confirmations, &mut input).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Kestrel: Interactive Mode");
    println!();
    println!("  Provider:  {}", agent.provider_name());
    println!("  Model:     {}", agent.current_model());
    println!("  Tools:     {}", agent.tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!("  Ctrl+C aborts the current operation. Type 'exit' to quit.");
    println!();

    loop {
        prompt("  You > ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        if let Some(command) = SlashCommand::parse(line) {
            match command {
                SlashCommand::Exit => break,
                SlashCommand::Help => print_help(),
                SlashCommand::Clear => {
                    agent.clear_history().await;
                    println!("  History cleared.");
                }
                SlashCommand::ShowProvider => {
                    println!("  Provider:  {}", agent.provider_name());
                    println!("  Model:     {}", agent.current_model());
                    println!("  Available: {}", agent.known_providers().join(", "));
                }
                SlashCommand::Provider(id) => match agent.set_provider(&id) {
                    Ok(()) => println!("  Switched to {} ({})", agent.provider_name(), agent.current_model()),
                    Err(e) => eprintln!("  [Error] {e}"),
                },
                SlashCommand::Model(model) => {
                    agent.set_model(&model);
                    println!("  Model set to {model}");
                }
                SlashCommand::Models { refresh } => match agent.fetch_available_models(refresh).await {
                    Ok(models) => {
                        let current = agent.current_model();
                        for model in models {
                            let marker = if model == current { "*" } else { " " };
                            println!("  {marker} {model}");
                        }
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                },
                SlashCommand::Todos => println!("{}", indent(&render_checklist(&todos.read().await))),
                SlashCommand::Unknown(name) => eprintln!("  Unknown command /{name}. Type /help."),
            }
            continue;
        }

        println!();
        run_turn(&agent, line.to_string(), &mut confirmations, &mut input).await?;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Stream one message, answering confirmation requests and relaying Ctrl+C
/// as an abort.
async fn run_turn(
    agent: &Arc<CodingAgent>,
    message: String,
    confirmations: &mut mpsc::Receiver<PendingConfirmation>,
    input: &mut Input,
) -> std::io::Result<()> {
    let mut chunks = agent.process_user_message_stream(message);
    let mut renderer = Renderer::default();

    loop {
        tokio::select! {
            chunk = chunks.recv() => match chunk {
                Some(chunk) => renderer.render(&chunk)?,
                None => break,
            },
            Some(pending) = confirmations.recv() => {
                renderer.finish_line()?;
                let answer = answer_or_interrupt(ask(&pending.request, input), tokio::signal::ctrl_c()).await;
                match answer {
                    Some(answer) => pending.respond(answer?),
                    None => {
                        // Dropping the request rejects it
                        println!();
                        eprintln!("  Aborting...");
                        agent.abort_current_operation();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                renderer.finish_line()?;
                eprintln!("  Aborting...");
                agent.abort_current_operation();
            }
        }
    }

    Ok(())
}

/// Wait for an answer unless `interrupt` fires first, in which case `None`.
async fn answer_or_interrupt<A, I>(answer: A, interrupt: I) -> Option<std::io::Result<ConfirmationResult>>
where
    A: Future<Output = std::io::Result<ConfirmationResult>>,
    I: Future,
{
    tokio::select! {
        answer = answer => Some(answer),
        _ = interrupt => None,
    }
}

async fn ask(request: &ConfirmationRequest, input: &mut Input) -> std::io::Result<ConfirmationResult> {
    println!("  Allow {} ({}): {}", request.operation, request.category, request.description);
    prompt("  [y]es / [n]o / [a]lways / or type feedback > ")?;
    let answer = input.next_line().await?.unwrap_or_default();
    Ok(parse_answer(&answer))
}

/// Map a typed answer to a decision. Anything that is not a yes/no/always
/// keyword is rejection feedback for the model.
fn parse_answer(answer: &str) -> ConfirmationResult {
    let answer = answer.trim();
    match answer.to_lowercase().as_str() {
        "y" | "yes" => ConfirmationResult::approved(),
        "a" | "always" => ConfirmationResult {
            confirmed: true,
            feedback: None,
            dont_ask_again: true,
        },
        "" | "n" | "no" => ConfirmationResult::rejected(None),
        _ => ConfirmationResult::rejected(Some(answer.to_string())),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Provider(String),
    ShowProvider,
    Model(String),
    Models { refresh: bool },
    Clear,
    Todos,
    Help,
    Exit,
    Unknown(String),
}

impl SlashCommand {
    fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        Some(match (name, arg) {
            ("provider", Some(id)) => Self::Provider(id.to_string()),
            ("provider", None) | ("model", None) => Self::ShowProvider,
            ("model", Some(model)) => Self::Model(model.to_string()),
            ("models", arg) => Self::Models {
                refresh: arg == Some("refresh"),
            },
            ("clear", _) => Self::Clear,
            ("todos", _) => Self::Todos,
            ("help", _) => Self::Help,
            ("exit" | "quit", _) => Self::Exit,
            (other, _) => Self::Unknown(other.to_string()),
        })
    }
}

fn print_help() {
    println!("  /provider [id]     Show or switch the provider (history is kept)");
    println!("  /model [name]      Show or switch the model");
    println!("  /models [refresh]  List models for the current provider");
    println!("  /todos             Show the agent's task list");
    println!("  /clear             Forget the conversation");
    println!("  /exit              Quit");
}

/// Writes chunks to the terminal.
#[derive(Default)]
struct Renderer {
    mid_line: bool,
}

impl Renderer {
    fn render(&mut self, chunk: &StreamChunk) -> std::io::Result<()> {
        match chunk {
            StreamChunk::Content { content } => {
                let mut stdout = std::io::stdout();
                write!(stdout, "{content}")?;
                stdout.flush()?;
                self.mid_line = !content.ends_with('\n');
            }
            StreamChunk::TokenCount { token_count } => debug!(token_count, "Context size"),
            StreamChunk::ToolCalls { tool_calls } => {
                self.finish_line()?;
                for call in tool_calls {
                    println!("  -> {} {}", call.name, summarize(&call.arguments, 100));
                }
            }
            StreamChunk::ToolResult { tool_call, tool_result } => {
                let mark = if tool_result.success { "ok" } else { "failed" };
                println!(
                    "  <- {} {mark}: {}",
                    tool_call.name,
                    summarize(&tool_result.display_text(), 100)
                );
            }
            StreamChunk::Done { reason } => {
                self.finish_line()?;
                match reason {
                    StopReason::Cancelled => println!("  [cancelled]"),
                    StopReason::RoundLimitReached => println!("  [stopped at the tool round limit]"),
                    StopReason::Completed | StopReason::Error => {}
                }
            }
        }
        Ok(())
    }

    fn finish_line(&mut self) -> std::io::Result<()> {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
        Ok(())
    }
}

/// First line of `text`, cut to `max` characters.
fn summarize(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    let more = text.lines().nth(1).is_some();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}...")
    } else if more {
        format!("{line} ...")
    } else {
        line.to_string()
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n")
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{text}")?;
    stdout.flush()
}

fn spawn_event_logger(events: &Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(event = ?event, "Domain event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => debug!(skipped, "Event logger lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_map_to_decisions() {
        assert!(parse_answer("y").confirmed);
        assert!(parse_answer(" YES ").confirmed);
        assert!(!parse_answer("n").confirmed);
        assert!(!parse_answer("").confirmed);

        let always = parse_answer("a");
        assert!(always.confirmed && always.dont_ask_again);

        let feedback = parse_answer("use git mv instead");
        assert!(!feedback.confirmed);
        assert_eq!(feedback.feedback.as_deref(), Some("use git mv instead"));
    }

    #[tokio::test]
    async fn interrupt_preempts_pending_answer() {
        let answer = std::future::pending::<std::io::Result<ConfirmationResult>>();
        assert!(answer_or_interrupt(answer, std::future::ready(())).await.is_none());
    }

    #[tokio::test]
    async fn answer_wins_without_interrupt() {
        let answer = std::future::ready(Ok(parse_answer("yes")));
        let result = answer_or_interrupt(answer, std::future::pending::<()>()).await;
        assert!(result.unwrap().unwrap().confirmed);
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(SlashCommand::parse("hello"), None);
        assert_eq!(
            SlashCommand::parse("/provider anthropic"),
            Some(SlashCommand::Provider("anthropic".into()))
        );
        assert_eq!(SlashCommand::parse("/provider"), Some(SlashCommand::ShowProvider));
        assert_eq!(
            SlashCommand::parse("/model  gpt-4o-mini "),
            Some(SlashCommand::Model("gpt-4o-mini".into()))
        );
        assert_eq!(
            SlashCommand::parse("/models refresh"),
            Some(SlashCommand::Models { refresh: true })
        );
        assert_eq!(SlashCommand::parse("/clear"), Some(SlashCommand::Clear));
        assert_eq!(SlashCommand::parse("/frobnicate"), Some(SlashCommand::Unknown("frobnicate".into())));
    }

    #[test]
    fn summarize_truncates() {
        assert_eq!(summarize("short", 10), "short");
        assert_eq!(summarize("abcdefghij", 4), "abcd...");
        assert_eq!(summarize("first\nsecond", 20), "first ...");
        assert_eq!(summarize("", 5), "");
    }
}
