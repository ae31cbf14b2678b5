//! Built-in tool implementations for Kestrel.
//!
//! Tools give the agent the ability to work in a codebase:
//! run shell commands, view files, create and edit them, and keep a
//! task list. File mutations and shell commands report a confirmation
//! category so the agent can gate them.

pub mod bash;
pub mod create_file;
pub mod path;
pub mod str_replace;
pub mod todo;
pub mod view_file;

use kestrel_config::ToolsConfig;
use kestrel_core::tool::ToolRegistry;

pub use bash::BashTool;
pub use create_file::CreateFileTool;
pub use path::{PathError, PathPolicy};
pub use str_replace::StrReplaceEditorTool;
pub use todo::{render_checklist, TodoItem, TodoListTool, TodoState, TodoStatus};
pub use view_file::ViewFileTool;

/// Create a registry with all built-in tools configured from `config`.
///
/// The todo list state is returned so a UI can render it.
pub fn default_registry(config: &ToolsConfig) -> (ToolRegistry, TodoState) {
    let policy = PathPolicy::new(&config.allowed_roots, &config.forbidden_paths);
    let todos = TodoState::default();

    let mut registry = ToolRegistry::new();
    registry.register(BashTool::new(config.allowed_commands.clone(), config.bash_timeout_secs));
    registry.register(ViewFileTool::new(policy.clone()));
    registry.register(CreateFileTool::new(policy.clone()));
    registry.register(StrReplaceEditorTool::new(policy));
    registry.register(TodoListTool::new(std::sync::Arc::clone(&todos)));
    (registry, todos)
}
