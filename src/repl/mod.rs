//! Interactive terminal front end for the chat session.

use crate::auth::{AuthGuard, Navigator, LOGIN_ROUTE};
use crate::chat::{ChatSession, SessionUpdate};
use crate::error::report;
use crate::markdown::MarkdownRenderer;
use crate::models::chat::{ChatMode, Role};
use crate::services::{AiService, CatalogService, ConversationService};
use log::warn;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub const CHAT_ROUTE: &str = "/chat";
const PROMPT: &str = "you> ";

const COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/clear", "Clear the chat history and start a new conversation"),
    ("/mode", "Show or set the chat mode: /mode stream|normal"),
    ("/history", "Print the local transcript, or the server's with /history remote"),
    ("/render", "Print the last reply as sanitized HTML"),
    ("/status", "Show the AI service status"),
    ("/conversations", "List your conversations"),
    ("/open", "Print the messages of a conversation: /open <id>"),
    ("/rename", "Rename a conversation: /rename <id> <title>"),
    ("/archive", "Archive a conversation: /archive <id>"),
    ("/delete", "Delete a conversation: /delete <id>"),
    ("/categories", "List blog categories: /categories [refresh|clear]"),
    ("/tags", "List blog tags: /tags [refresh|clear]"),
    ("/login", "Store a bearer token: /login <token>"),
    ("/logout", "Forget the stored token"),
    ("/quit", "Exit"),
];

enum CommandResult {
    Continue,
    Exit,
}

#[derive(Debug, PartialEq)]
enum PromptInput {
    Line(String),
    Empty,
    Exit,
}

pub struct Repl {
    session: Arc<ChatSession>,
    renderer: MarkdownRenderer,
    ai: AiService,
    conversations: ConversationService,
    catalog: CatalogService,
    guard: AuthGuard,
    navigator: Arc<dyn Navigator>,
}

impl Repl {
    pub fn new(
        session: Arc<ChatSession>,
        ai: AiService,
        conversations: ConversationService,
        catalog: CatalogService,
        guard: AuthGuard,
        navigator: Arc<dyn Navigator>
    ) -> Self {
        Self {
            session,
            renderer: MarkdownRenderer::new(),
            ai,
            conversations,
            catalog,
            guard,
            navigator,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut editor = DefaultEditor::new()?;
        self.print_welcome();

        loop {
            // The editor blocks on the terminal, so it is lent to a blocking
            // task for each prompt and handed back with the line.
            let (returned, readline) = tokio::task::spawn_blocking(move || {
                let readline = editor.readline(PROMPT);
                (editor, readline)
            })
            .await?;
            editor = returned;

            let line = match prompt_input(readline)? {
                PromptInput::Line(line) => line,
                PromptInput::Empty => continue,
                PromptInput::Exit => {
                    println!("Bye!");
                    break;
                }
            };
            let _ = editor.add_history_entry(line.as_str());

            if line.starts_with('/') {
                match self.handle_command(&line).await {
                    CommandResult::Exit => break,
                    CommandResult::Continue => continue,
                }
            }

            self.process_message(&line).await;
        }

        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("LiuTech AI chat");
        println!("Mode: {}", self.session.mode());
        if let Some(id) = self.session.conversation_id() {
            println!("Conversation: {}", id);
        }
        let restored = self.session.messages().len();
        if restored > 0 {
            println!("Restored {} messages from the last session", restored);
        }
        if self.navigator.current_route() == LOGIN_ROUTE {
            println!("Not logged in. Use /login <token> to continue.");
        }
        println!("Type /help for commands.");
        println!();
    }

    async fn process_message(&self, text: &str) {
        if self.navigator.current_route() == LOGIN_ROUTE {
            println!("Not logged in. Use /login <token> to continue.");
            return;
        }

        let mut updates = self.session.subscribe();
        let send = self.session.send_message(text, None);
        tokio::pin!(send);

        let mut streamed = false;
        loop {
            tokio::select! {
                accepted = &mut send => {
                    if !accepted {
                        println!("A reply is still loading, please wait.");
                        return;
                    }
                    break;
                }
                update = updates.recv() => match update {
                    Ok(SessionUpdate::Chunk { text, .. }) => {
                        print_chunk(&text);
                        streamed = true;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!("Display fell behind by {} updates", skipped),
                    Err(RecvError::Closed) => {}
                },
                _ = tokio::signal::ctrl_c() => self.session.cancel_stream(),
            }
        }
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Chunk { text, .. } = update {
                print_chunk(&text);
                streamed = true;
            }
        }
        if streamed {
            println!();
        }

        match self.session.last_message() {
            Some(last) if last.is_error => println!("Error: {}", last.content),
            Some(last) if !streamed && last.role == Role::Assistant => println!("ai> {}", last.content),
            _ => {}
        }
    }

    async fn handle_command(&self, line: &str) -> CommandResult {
        let (command, args) = match line.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" | "/q" => {
                println!("Bye!");
                return CommandResult::Exit;
            }
            "/help" | "/h" | "/?" => {
                println!();
                for (name, about) in COMMANDS {
                    println!("  {:<15} {}", name, about);
                }
                println!();
            }
            "/clear" => {
                self.session.clear_history();
                self.renderer.clear_cache();
                println!("Chat history cleared.");
            }
            "/mode" => {
                if args.is_empty() {
                    println!("Mode: {}", self.session.mode());
                } else {
                    match args.parse::<ChatMode>() {
                        Ok(mode) => {
                            self.session.set_mode(mode);
                            println!("Mode set to {}", mode);
                        }
                        Err(e) => println!("{}", e),
                    }
                }
            }
            "/history" if args == "remote" => match self.ai.chat_history(1, 20).await {
                Ok(history) => {
                    for item in history.data {
                        println!("{}> {}", item.role, item.content.unwrap_or_default());
                    }
                    println!("(page {} of {}, {} total)", history.page, history.total_pages, history.total);
                }
                Err(e) => println!("{}", report(&e)),
            },
            "/history" => {
                for message in self.session.messages() {
                    let who = match message.role {
                        Role::User => "you",
                        Role::Assistant if message.is_error => "error",
                        Role::Assistant => "ai",
                    };
                    println!("[{}] {}> {}", message.timestamp.format("%H:%M:%S"), who, message.content);
                }
            }
            "/render" => {
                let last = self
                    .session
                    .messages()
                    .into_iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant && !m.is_error);
                match last {
                    Some(message) => println!("{}", self.renderer.render(&message.content, message.is_streaming)),
                    None => println!("No reply to render yet."),
                }
            }
            "/status" => match self.ai.status().await {
                Ok(status) => {
                    println!("{}", status.message);
                    if let Some(model) = status.model {
                        println!("Model: {}", model);
                    }
                }
                Err(e) => println!("{}", report(&e)),
            },
            "/conversations" => match self.conversations.list(None, 1, 20).await {
                Ok(list) if list.is_empty() => println!("No conversations yet."),
                Ok(list) => {
                    for c in list {
                        println!(
                            "  #{:<6} {:<30} {} messages",
                            c.id,
                            c.title.unwrap_or_else(|| "(untitled)".to_string()),
                            c.message_count
                        );
                    }
                }
                Err(e) => println!("{}", report(&e)),
            },
            "/open" => match parse_id(args) {
                Some(id) => match self.conversations.messages(id, 1, 50).await {
                    Ok(messages) => {
                        for item in messages {
                            println!("{}> {}", item.role, item.content.unwrap_or_default());
                        }
                    }
                    Err(e) => println!("{}", report(&e)),
                },
                None => println!("Usage: /open <id>"),
            },
            "/rename" => {
                let parsed = args
                    .split_once(char::is_whitespace)
                    .and_then(|(id, title)| Some((parse_id(id)?, title.trim())));
                match parsed {
                    Some((id, title)) if !title.is_empty() => match self.conversations.rename(id, title).await {
                        Ok(()) => println!("Conversation {} renamed.", id),
                        Err(e) => println!("{}", report(&e)),
                    },
                    _ => println!("Usage: /rename <id> <title>"),
                }
            }
            "/archive" => match parse_id(args) {
                Some(id) => match self.conversations.archive(id).await {
                    Ok(()) => println!("Conversation {} archived.", id),
                    Err(e) => println!("{}", report(&e)),
                },
                None => println!("Usage: /archive <id>"),
            },
            "/delete" => match parse_id(args) {
                Some(id) => match self.conversations.remove(id).await {
                    Ok(()) => println!("Conversation {} deleted.", id),
                    Err(e) => println!("{}", report(&e)),
                },
                None => println!("Usage: /delete <id>"),
            },
            "/categories" if args == "clear" => {
                self.catalog.clear_categories().await;
                println!("Category cache cleared.");
            }
            "/categories" => match self.catalog.categories(args == "refresh").await {
                Ok(categories) => {
                    for c in categories {
                        println!("  {} ({})", c.name, c.post_count.unwrap_or(0));
                    }
                }
                Err(e) => println!("{}", report(&e)),
            },
            "/tags" if args == "clear" => {
                self.catalog.clear_tags().await;
                println!("Tag cache cleared.");
            }
            "/tags" => match self.catalog.tags(args == "refresh").await {
                Ok(tags) => {
                    for t in tags {
                        println!("  {} ({})", t.name, t.post_count);
                    }
                }
                Err(e) => println!("{}", report(&e)),
            },
            "/login" => {
                if args.is_empty() {
                    println!("Usage: /login <token>");
                } else {
                    self.guard.credentials().set(args, None, None);
                    self.navigator.navigate(CHAT_ROUTE);
                    println!("Token stored.");
                }
            }
            "/logout" => {
                self.guard.credentials().clear();
                self.navigator.navigate(LOGIN_ROUTE);
                println!("Logged out.");
            }
            other => {
                println!("Unknown command: {}", other);
                if let Some(suggestion) = suggest(other) {
                    println!("Did you mean {}?", suggestion);
                }
            }
        }
        CommandResult::Continue
    }
}

/// Ctrl-C and Ctrl-D at the prompt both end the session.
fn prompt_input(readline: rustyline::Result<String>) -> Result<PromptInput, ReadlineError> {
    match readline {
        Ok(line) => {
            let line = line.trim();
            if line.is_empty() {
                Ok(PromptInput::Empty)
            } else {
                Ok(PromptInput::Line(line.to_string()))
            }
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(PromptInput::Exit),
        Err(err) => Err(err),
    }
}

fn parse_id(arg: &str) -> Option<i64> {
    arg.trim().trim_start_matches('#').parse().ok()
}

fn print_chunk(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Closest known command to a mistyped one.
fn suggest(input: &str) -> Option<&'static str> {
    COMMANDS
        .iter()
        .map(|(name, _)| (*name, strsim::jaro_winkler(input, name)))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}
