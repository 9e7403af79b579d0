// Line-oriented terminal front-end over the chat core

use crate::chat::ChatState;
use crate::commands::{self, RejectReason, TurnOutcome};
use crate::models::{Message, Role, PENDING_CONTENT};
use crate::session::{self, SessionStatus};
use crate::state::AppState;
use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  <text>                  ask a question
  <n>                     send suggestion number n
  /new                    start a new conversation
  /open <id>              open a conversation
  /list                   list conversations
  /delete <id>            delete a guest conversation
  /retry                  resend the last failed message
  /clear                  wipe guest history on this device
  /export                 print guest history as JSON
  /login <email> <pass>   sign in
  /signup <email> <pass>  create an account
  /link <email> <pass>    keep this guest history under a new account
  /logout                 sign out
  /quit                   leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Suggestion(usize),
    New,
    Open(String),
    List,
    Delete(String),
    Retry,
    Clear,
    Export,
    SignIn { email: String, password: String },
    SignUp { email: String, password: String },
    Link { email: String, password: String },
    SignOut,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if let Ok(n) = line.parse::<usize>() {
        return Command::Suggestion(n);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Ask(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let credentials = |build: fn(String, String) -> Command| match args.as_slice() {
        [email, password] => build(email.to_string(), password.to_string()),
        _ => Command::Invalid(format!("usage: /{} <email> <password>", name)),
    };
    match (name, args.as_slice()) {
        ("new", []) => Command::New,
        ("open", [id]) => Command::Open(id.to_string()),
        ("list", []) => Command::List,
        ("delete", [id]) => Command::Delete(id.to_string()),
        ("retry", []) => Command::Retry,
        ("clear", []) => Command::Clear,
        ("export", []) => Command::Export,
        ("login", _) => credentials(|email, password| Command::SignIn { email, password }),
        ("signup", _) => credentials(|email, password| Command::SignUp { email, password }),
        ("link", _) => credentials(|email, password| Command::Link { email, password }),
        ("logout", []) => Command::SignOut,
        ("help", _) => Command::Help,
        ("quit", _) | ("exit", _) => Command::Quit,
        _ => Command::Invalid(format!("unknown command: {}", line)),
    }
}

/// Suggestions the user can pick by number: follow-ups of the latest
/// answer, or the starter questions on an empty conversation.
pub fn visible_suggestions(state: &ChatState) -> &[String] {
    if !state.follow_up_suggestions.is_empty() {
        &state.follow_up_suggestions
    } else if state.messages.is_empty() {
        &state.suggested_questions
    } else {
        &[]
    }
}

fn render_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    };
    let mut out = format!("{}: {}", speaker, message.content);
    if let Some(error) = message.error() {
        out.push_str(&format!("\n  (not sent: {})", error));
    }
    out
}

pub fn render_transcript(state: &ChatState) -> String {
    let mut lines = Vec::new();
    if let Some(conversation) = &state.current_conversation {
        lines.push(format!("== {} [{}] ==", conversation.display_title(), conversation.id));
    }
    lines.extend(state.messages.iter().map(render_message));
    lines.push(render_footer(state));
    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

/// What changed after a turn: the latest answer (or failed question) and
/// what can be asked next.
pub fn render_turn(state: &ChatState) -> String {
    let mut lines = Vec::new();
    if let Some(last) = state.messages.last() {
        if last.content != PENDING_CONTENT {
            lines.push(render_message(last));
        }
    }
    if let Some(disclaimer) = &state.disclaimer {
        lines.push(format!("  {}", disclaimer));
    }
    lines.push(render_footer(state));
    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

fn render_footer(state: &ChatState) -> String {
    let mut lines = Vec::new();
    if let Some(error) = &state.error {
        lines.push(format!("! {}", error));
    }
    let suggestions = visible_suggestions(state);
    if !suggestions.is_empty() {
        lines.push("Suggestions:".to_string());
        for (i, question) in suggestions.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, question));
        }
    }
    lines.join("\n")
}

/// Reads commands from stdin until `/quit` or end of input.
pub async fn run_repl(app: AppState) -> Result<()> {
    let mut route: Option<String> = None;
    session::load_conversation(&app, None).await;

    println!("Tax assistant. Type /help for commands.");
    println!("{}", render_footer(&app.chat.snapshot()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_command(&line) {
            Command::Quit => break,
            Command::Empty => continue,
            command => {
                if let Err(e) = dispatch(&app, &mut route, command).await {
                    println!("! {}", e);
                }
            }
        }
    }
    log::info!("Leaving chat");
    Ok(())
}

async fn dispatch(app: &AppState, route: &mut Option<String>, command: Command) -> Result<()> {
    match command {
        Command::Ask(text) => {
            let outcome = commands::submit_turn(app, &text).await;
            after_turn(app, route, outcome);
        }
        Command::Suggestion(n) => {
            let question = app
                .chat
                .read(|s| n.checked_sub(1).and_then(|i| visible_suggestions(s).get(i).cloned()));
            match question {
                Some(question) => {
                    println!("You: {}", question);
                    let outcome = commands::select_suggestion(app, &question).await;
                    after_turn(app, route, outcome);
                }
                None => println!("No suggestion {}", n),
            }
        }
        Command::Retry => {
            let failed = app.chat.read(|s| {
                s.messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User && m.error().is_some())
                    .map(|m| m.id.clone())
            });
            match failed {
                Some(id) => {
                    let outcome = commands::retry_turn(app, &id).await;
                    after_turn(app, route, outcome);
                }
                None => println!("Nothing to retry"),
            }
        }
        Command::New => open(app, route, None).await,
        Command::Open(id) => open(app, route, Some(id)).await,
        Command::List => {
            let conversations = commands::list_conversations(app).await?;
            if conversations.is_empty() {
                println!("No conversations yet");
            }
            for c in conversations {
                let marker = if route.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {}  {}  {}",
                    marker,
                    c.id,
                    c.created_at.format("%Y-%m-%d %H:%M"),
                    c.title.as_deref().unwrap_or(crate::models::DEFAULT_TITLE)
                );
            }
        }
        Command::Delete(id) => {
            commands::delete_conversation(app, &id).await?;
            if route.as_deref() == Some(id.as_str()) {
                *route = None;
            }
            println!("Deleted {}", id);
        }
        Command::Clear => {
            commands::clear_guest_history(app).await;
            open(app, route, None).await;
            println!("Guest history cleared");
        }
        Command::Export => {
            let history = commands::export_guest_history(app).await;
            println!("{}", history.encode()?);
        }
        Command::SignIn { email, password } => {
            app.identity.sign_in(&email, &password).await?;
            reload(app, route).await;
        }
        Command::SignUp { email, password } => {
            app.identity.sign_up(&email, &password).await?;
            println!("Account created for {}", email);
            reload(app, route).await;
        }
        Command::Link { email, password } => {
            app.identity.link_guest(&email, &password).await?;
            println!("Guest session linked to {}", email);
            reload(app, route).await;
        }
        Command::SignOut => {
            app.identity.sign_out().await?;
            app.identity.sign_in_anonymously().await?;
            *route = None;
            reload(app, route).await;
        }
        Command::Help => println!("{}", HELP),
        Command::Invalid(message) => println!("{}", message),
        Command::Quit | Command::Empty => {}
    }
    Ok(())
}

fn after_turn(app: &AppState, route: &mut Option<String>, outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Rejected(RejectReason::EmptyInput) => {}
        TurnOutcome::Rejected(RejectReason::TurnInFlight) => println!("Still waiting for the previous answer"),
        TurnOutcome::Rejected(RejectReason::IdentityUnresolved) => println!("Still signing in, try again"),
        TurnOutcome::Rejected(RejectReason::NotRetryable) => println!("Nothing to retry"),
        TurnOutcome::Completed | TurnOutcome::Failed(_) => {
            let state = app.chat.snapshot();
            // The first answer gives the conversation its id
            if let Some(id) = state.conversation_id() {
                *route = Some(id.to_string());
            }
            println!("{}", render_turn(&state));
        }
    }
}

async fn open(app: &AppState, route: &mut Option<String>, id: Option<String>) {
    *route = id;
    reload(app, route).await;
}

// Re-runs session selection for the current route, e.g. after the identity changed
async fn reload(app: &AppState, route: &mut Option<String>) {
    match session::load_conversation(app, route.as_deref()).await {
        SessionStatus::IdentityPending => println!("Waiting for sign-in to finish"),
        SessionStatus::Superseded => {}
        SessionStatus::Error(_) => {
            *route = None;
            println!("{}", render_footer(&app.chat.snapshot()));
        }
        SessionStatus::NewConversation | SessionStatus::Loaded(_) => {
            println!("{}", render_transcript(&app.chat.snapshot()));
        }
    }
}
