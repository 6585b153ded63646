//! Interactive chat against a parley backend.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage against a local backend
//! parley-chat
//!
//! # Point at another backend and keep the login across runs
//! parley-chat --base-url https://chat.example.com/ --token-file ~/.parley/token.json
//!
//! # Start with a specific model and retrieval enabled
//! parley-chat --model deepseek-chat --rag
//! ```
//!
//! Type `/help` for the slash commands.  Ctrl+C interrupts a streaming
//! answer; the partial answer is kept.  Set `PARLEY_LOG=debug` for request
//! logs on stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use parley::chat::{
    ChatArgs, ChatClient, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, SendOutcome,
    help_text, parse_command,
};
use parley::{
    CancelHandle, Client, ConfigOverride, CredentialStore, FileCredentials, MemoryCredentials,
    Reconciled, StreamOutcome, TracingLogger,
};

type Chat = ChatClient<Client>;

/// Main entry point for the parley-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("PARLEY_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    let config = ChatConfig::from_args(args)?;

    let credentials: Arc<dyn CredentialStore> = match &config.settings.token_file {
        Some(path) => Arc::new(FileCredentials::new(path)),
        None => Arc::new(MemoryCredentials::new()),
    };
    let auth_expired = Arc::new(AtomicBool::new(false));
    let expired = auth_expired.clone();
    let client = Client::from_settings(&config.settings, credentials)?
        .with_auth_observer(Arc::new(move || expired.store(true, Ordering::Relaxed)))
        .with_logger(Arc::new(TracingLogger));
    println!("parley chat ({})", client.base_url());

    let mut chat = ChatClient::new(client, &config.settings, config.initial.clone());
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // The answer currently streaming, if any; Ctrl+C cancels it.
    let streaming: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
    let slot = streaming.clone();
    ctrlc::set_handler(move || {
        if let Ok(slot) = slot.lock()
            && let Some(handle) = slot.as_ref()
        {
            handle.cancel();
        }
    })?;

    if chat.backend().is_authenticated() {
        bootstrap(&mut chat, &mut renderer).await;
    } else {
        renderer.print_info("Not logged in. Use /login <username> <password>.");
    }
    println!("Type /help for commands, /quit to exit\n");

    loop {
        if auth_expired.swap(false, Ordering::Relaxed) {
            renderer.print_error("Login expired. Use /login <username> <password>.");
        }

        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(cmd) = parse_command(line) {
                    // Passwords stay out of the history.
                    if !matches!(cmd, ChatCommand::Login { .. }) {
                        let _ = rl.add_history_entry(line);
                    }
                    if cmd == ChatCommand::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    run_command(&mut chat, &mut renderer, cmd).await;
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let cancel = CancelHandle::new();
                if let Ok(mut slot) = streaming.lock() {
                    *slot = Some(cancel.clone());
                }
                let outcome = chat.send(line, &mut renderer, &cancel).await;
                if let Ok(mut slot) = streaming.lock() {
                    *slot = None;
                }
                match outcome {
                    Ok(SendOutcome::Streamed(StreamOutcome::Cancelled)) => {
                        renderer.print_info("(answer interrupted; partial text kept)");
                    }
                    Ok(_) => {}
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

async fn bootstrap(chat: &mut Chat, renderer: &mut PlainTextRenderer) {
    match chat.bootstrap().await {
        Ok(()) => {
            let stats = chat.stats();
            renderer.print_info(&format!(
                "{} models, {} sessions",
                chat.models().len(),
                stats.session_count
            ));
            if let Some(active) = stats.active_session {
                renderer.print_info(&format!(
                    "Resumed session {active} ({} messages)",
                    stats.message_count
                ));
            }
        }
        Err(err) => renderer.print_error(&format!("Failed to load sessions: {err}")),
    }
}

async fn run_command(chat: &mut Chat, renderer: &mut PlainTextRenderer, cmd: ChatCommand) {
    match cmd {
        ChatCommand::Quit => {}
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Login { username, password } => {
            match chat.backend().login(&username, &password).await {
                Ok(_) => {
                    renderer.print_info(&format!("Logged in as {username}."));
                    bootstrap(chat, renderer).await;
                }
                Err(err) => renderer.print_error(&format!("Login failed: {err}")),
            }
        }
        ChatCommand::Logout => match chat.backend().logout() {
            Ok(()) => renderer.print_info("Logged out."),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Me => match chat.backend().me().await {
            Ok(user) => renderer.print_info(&format!(
                "{} (role: {}{})",
                user.username,
                user.role,
                if user.is_admin() { ", admin" } else { "" }
            )),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Models => {
            let current = chat.snapshot().model_alias.clone();
            for model in chat.models() {
                let marker = if model.alias == current { "*" } else { " " };
                let default = if model.is_default { " [default]" } else { "" };
                println!(
                    "{marker} {}  {} ({}){default}",
                    model.alias,
                    model.display_name(),
                    model.provider
                );
            }
        }
        ChatCommand::Model(alias) => {
            reconfigure(chat, renderer, ConfigOverride::model(alias)).await
        }
        ChatCommand::Rag(use_rag) => reconfigure(chat, renderer, ConfigOverride::rag(use_rag)).await,
        ChatCommand::Corpus(ids) => reconfigure(chat, renderer, ConfigOverride::corpora(ids)).await,
        ChatCommand::Stream(stream) => {
            reconfigure(chat, renderer, ConfigOverride::stream(stream)).await
        }
        ChatCommand::New => match chat.new_session().await {
            Ok(id) => renderer.print_info(&format!("Started session {id}.")),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Sessions => {
            if let Err(err) = chat.refresh_sessions().await {
                renderer.print_error(&format!("Showing cached sessions: {err}"));
            }
            let active = chat.active_id().map(str::to_string);
            for session in chat.sessions() {
                renderer.print_session(session, active.as_deref() == Some(session.id.as_str()));
            }
        }
        ChatCommand::Switch(id) => match chat.switch_active(&id).await {
            Ok(()) => renderer.print_info(&format!(
                "Switched to {id} ({} messages).",
                chat.messages().len()
            )),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Delete(id) => {
            if chat.delete_session(&id).await {
                renderer.print_info(&format!("Deleted {id}."));
            } else {
                renderer.print_info(&format!("Removed {id} locally; the backend did not confirm."));
            }
        }
        ChatCommand::History => {
            for message in chat.messages() {
                renderer.print_message(message);
            }
        }
        ChatCommand::ShowConfig => {
            let stats = chat.stats();
            println!("    Current Configuration:");
            println!("      Model: {}", stats.config.model_alias);
            println!("      RAG: {}", if stats.config.use_rag { "on" } else { "off" });
            println!("      Corpora: {:?}", stats.config.rag_corpus_ids);
            println!("      Stream: {}", if stats.config.stream { "on" } else { "off" });
            println!(
                "      Session: {}",
                stats.active_session.as_deref().unwrap_or("(none)")
            );
            println!("      Messages: {}", stats.message_count);
            println!("      Sessions: {}", stats.session_count);
        }
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
}

async fn reconfigure(chat: &mut Chat, renderer: &mut PlainTextRenderer, desired: ConfigOverride) {
    match chat.set_config(desired).await {
        Ok(Reconciled::Unchanged(_)) => renderer.print_info("Configuration unchanged."),
        Ok(Reconciled::Patched(id)) => renderer.print_info(&format!("Updated session {id}.")),
        Ok(Reconciled::Created(id)) => {
            renderer.print_info(&format!("Started session {id} with the new configuration."))
        }
        Err(err) => renderer.print_error(&err.to_string()),
    }
}
