//! Terminal output for conversations and the tool catalogue.

use colored::{ColoredString, Colorize};

use switchboard_common::{
    Conversation, InvocationStatus, LogEntry, LogLevel, ModelResponse, Role, ToolInvocation, ToolSpec, Turn,
};

/// Longest result preview printed before truncating.
const PREVIEW_CHARS: usize = 200;

pub fn print_conversation_header(conversation: &Conversation) {
    let title = conversation.title.as_deref().unwrap_or("(untitled)");
    println!("{} {}", "Conversation".bold(), conversation.id.to_string().dimmed());
    println!("  {}", title.cyan());
    println!();
}

pub fn print_turn(turn: &Turn) {
    let state = if turn.error {
        "errored".red()
    } else if turn.processed {
        "processed".green()
    } else {
        "waiting".yellow()
    };
    println!("{} [{}]", role_label(turn.role), state);
    println!("  {}", turn.content.text());
    if let Some(message) = turn.error_message.as_deref().filter(|_| turn.error) {
        println!("  {}", message.red());
    }
}

pub fn print_response(response: &ModelResponse) {
    let text = response.text();
    if !text.trim().is_empty() {
        println!("{}", role_label(response.role));
        println!("  {}", text.trim());
    }
}

pub fn print_invocation(invocation: &ToolInvocation, logs: &[LogEntry]) {
    println!(
        "  {} {} [{}]",
        "⚙".blue(),
        invocation.tool_name.bold(),
        status_label(invocation.status)
    );
    println!("    args: {}", invocation.arguments);
    if let Some(result) = &invocation.result {
        println!("    result: {}", preview(&result.to_string()));
    }
    if let Some(error) = &invocation.error {
        println!("    error: {}", error.red());
    }
    for entry in logs {
        println!("    {} {}", level_label(entry.level), entry.message);
    }
}

pub fn print_catalogue(tools: &[ToolSpec]) {
    if tools.is_empty() {
        println!("{}", "No tools configured".yellow());
        return;
    }
    for tool in tools {
        println!("{}", tool.name.bold());
        println!("  {}", tool.description);
    }
}

/// Final assistant text of a turn.
pub fn print_reply(text: &str) {
    println!("{}", "Assistant".green().bold());
    println!("{}", text.trim());
}

fn role_label(role: Role) -> ColoredString {
    match role {
        Role::User => "User".blue().bold(),
        Role::Assistant => "Assistant".green().bold(),
        Role::System => "System".magenta().bold(),
    }
}

fn status_label(status: InvocationStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        InvocationStatus::Completed => label.green(),
        InvocationStatus::Failed => label.red(),
        InvocationStatus::Processing => label.cyan(),
        InvocationStatus::Pending | InvocationStatus::Queued => label.yellow(),
    }
}

fn level_label(level: LogLevel) -> ColoredString {
    let label = level.as_str();
    match level {
        LogLevel::Error => label.red(),
        LogLevel::Warning => label.yellow(),
        LogLevel::Success => label.green(),
        LogLevel::Info | LogLevel::Progress => label.dimmed(),
    }
}

fn preview(text: &str) -> String {
    let count = text.chars().count();
    if count <= PREVIEW_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{truncated}... ({count} chars)")
}
