//! Slash command parsing for the chat REPL.
//!
//! Input starting with `/` controls the client (sessions, configuration,
//! login) and is never sent to the backend as a chat turn.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Log in with a username and password.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },

    /// Forget the stored credential.
    Logout,

    /// Show the logged-in user.
    Me,

    /// List available models.
    Models,

    /// Switch the model.
    Model(String),

    /// Toggle retrieval augmentation.
    Rag(bool),

    /// Set the retrieval corpora; an empty list clears them.
    Corpus(Vec<i64>),

    /// Toggle streamed answers.
    Stream(bool),

    /// Start a new session with the current configuration.
    New,

    /// List sessions.
    Sessions,

    /// Make a session active.
    Switch(String),

    /// Delete a session.
    Delete(String),

    /// Print the active session's messages.
    History,

    /// Show the current configuration.
    ShowConfig,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a chat turn.
///
/// # Examples
///
/// ```
/// # use parley::chat::{parse_command, ChatCommand};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/model qwen-plus").is_some());
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "login" => parse_login(argument),
        "logout" => ChatCommand::Logout,
        "me" | "whoami" => ChatCommand::Me,
        "models" => ChatCommand::Models,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model alias".to_string()),
        },
        "rag" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Rag(value),
            None => ChatCommand::Invalid("/rag expects 'on' or 'off'".to_string()),
        },
        "corpus" | "corpora" => parse_corpus(argument),
        "stream" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Stream(value),
            None => ChatCommand::Invalid("/stream expects 'on' or 'off'".to_string()),
        },
        "new" => ChatCommand::New,
        "sessions" | "ls" => ChatCommand::Sessions,
        "switch" => match argument {
            Some(id) => ChatCommand::Switch(id.to_string()),
            None => ChatCommand::Invalid("/switch requires a session id".to_string()),
        },
        "delete" | "rm" => match argument {
            Some(id) => ChatCommand::Delete(id.to_string()),
            None => ChatCommand::Invalid("/delete requires a session id".to_string()),
        },
        "history" => ChatCommand::History,
        "config" => ChatCommand::ShowConfig,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_login(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/login requires <username> <password>".to_string());
    };
    let mut parts = arg.splitn(2, ' ');
    match (parts.next(), parts.next().map(str::trim)) {
        (Some(username), Some(password)) if !password.is_empty() => ChatCommand::Login {
            username: username.to_string(),
            password: password.to_string(),
        },
        _ => ChatCommand::Invalid("/login requires <username> <password>".to_string()),
    }
}

fn parse_corpus(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/corpus requires ids or 'clear'".to_string());
    };
    if arg.eq_ignore_ascii_case("clear") {
        return ChatCommand::Corpus(Vec::new());
    }
    let ids: Result<Vec<i64>, _> = arg
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse::<i64>)
        .collect();
    match ids {
        Ok(ids) => ChatCommand::Corpus(ids),
        Err(_) => ChatCommand::Invalid("/corpus expects integer ids".to_string()),
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /login <user> <pass>   Log in and store the token
  /logout                Forget the stored token
  /me                    Show the logged-in user
  /models                List available models
  /model <alias>         Switch the model
  /rag on|off            Toggle retrieval augmentation
  /corpus <ids>|clear    Set retrieval corpora (e.g., /corpus 1,2)
  /stream on|off         Toggle streamed answers
  /new                   Start a new session
  /sessions              List sessions
  /switch <id>           Make a session active
  /delete <id>           Delete a session
  /history               Show the active session's messages
  /config                Show current configuration
  /help                  Show this help message
  /quit                  Exit the chat"#
}
