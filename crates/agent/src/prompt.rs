//! System preamble assembly.

use kestrel_config::AgentConfig;
use tracing::warn;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Kestrel, a coding assistant working in the user's terminal.

You can run shell commands with `bash`, read files and directories with \
`view_file`, create files with `create_file`, edit files with \
`str_replace_editor`, and track multi-step work with `todo_list`.

Read before you edit. Prefer small, targeted edits over rewriting files. \
When a tool fails, read the error and adjust instead of repeating the same \
call. Keep answers short and say what you changed.";

/// The configured system prompt, with project instructions appended when
/// an instructions file is set and readable.
pub fn compose_system_prompt(config: &AgentConfig) -> String {
    let mut prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    if let Some(path) = &config.instructions_file {
        match std::fs::read_to_string(path) {
            Ok(instructions) if !instructions.trim().is_empty() => {
                prompt.push_str("\n\n## Project Instructions\n\n");
                prompt.push_str(instructions.trim());
            }
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not read instructions file"),
        }
    }

    prompt
}
