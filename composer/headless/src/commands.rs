//! Input line parsing
//!
//! Plain lines are sent as messages; lines starting with `/` are commands.

use std::path::PathBuf;

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Type and send a message
    Send(String),
    /// Send a suggested prompt
    Suggest(String),
    /// Re-issue the last exchange
    Reload,
    /// Stop the streaming reply
    Stop,
    /// Stage a file
    Attach(PathBuf),
    /// Unstage a file by name
    Detach(String),
    /// Change the selected model
    Model(String),
    /// Change the route's agent slug (`None` clears it)
    Agent(Option<String>),
    /// Start a new conversation
    New,
    /// Print the visible messages
    Messages,
    /// Print the available commands
    Help,
    /// Exit
    Quit,
}

/// Parse one line; `Ok(None)` for blank lines
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let required = |what: &str| {
        if arg.is_empty() {
            Err(format!("/{name} needs {what}"))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "suggest" => Command::Suggest(required("a prompt")?),
        "reload" => Command::Reload,
        "stop" => Command::Stop,
        "attach" => Command::Attach(PathBuf::from(required("a file path")?)),
        "detach" => Command::Detach(required("a file name")?),
        "model" => Command::Model(required("a model id")?),
        "agent" => match arg {
            "" | "none" => Command::Agent(None),
            slug => Command::Agent(Some(slug.to_string())),
        },
        "new" => Command::New,
        "messages" => Command::Messages,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command: /{other} (try /help)")),
    };
    Ok(Some(command))
}

/// Guess a MIME type from a file extension
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Command reference printed by `/help`
pub const HELP: &str = "\
Type a message and press enter to send it.

  /suggest <prompt>   send a suggested prompt
  /reload             answer the last message again
  /stop               stop the streaming reply
  /attach <path>      stage a file for the next message
  /detach <name>      unstage a file
  /model <id>         change the model
  /agent [slug]       use an agent (no slug clears it)
  /new                start a new conversation
  /messages           show the conversation
  /quit               exit";
