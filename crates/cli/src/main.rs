mod consumer;
mod logging;
mod models;
mod session;
mod store;

use std::io::{self, Write};

use anyhow::{Context, Result};
use chat_core::{llm::Role, protocol::DEFAULT_MODEL};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use consumer::{RelayClient, ReplyState};
use session::ChatSession;
use store::{ChatStore, Settings};

const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787/chat-with-ai";

#[derive(Parser)]
#[command(name = "aichat", about = "Chat with a language model through the aichat relay")]
struct Cli {
    /// Relay endpoint
    #[arg(long, global = true, default_value = DEFAULT_RELAY_URL, env = "AICHAT_RELAY_URL")]
    relay_url: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (the default)
    Chat {
        /// Continue a stored chat (id or id prefix)
        #[arg(long)]
        chat: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Ask one question in a new chat
    Ask {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        no_stream: bool,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Manage stored chats
    Chats {
        #[command(subcommand)]
        action: ChatsCommand,
    },
    /// Show or set the preferred model
    Model {
        name: Option<String>,
        /// List known models, marking the preferred one
        #[arg(long, conflicts_with = "name")]
        list: bool,
    },
}

#[derive(Subcommand)]
enum ChatsCommand {
    List,
    New { title: Option<String> },
    Rename {
        id: String,
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    Delete { id: String },
    Show { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = ChatStore::open_default()?;
    let _guard = logging::init(store.root());

    let command = cli.command.unwrap_or(Command::Chat {
        chat: None,
        model: None,
        no_stream: false,
    });
    match command {
        Command::Chat { chat, model, no_stream } => {
            let chat = match chat {
                Some(key) => store.resolve(&key)?,
                None => store.create_chat(None)?,
            };
            let model = pick_model(&store, model)?;
            let client = RelayClient::new(cli.relay_url)?;
            let mut session = ChatSession::new(store, client, chat, model);
            session.stream = !no_stream;
            repl(&mut session).await
        }
        Command::Ask { model, no_stream, text } => {
            let chat = store.create_chat(None)?;
            let model = pick_model(&store, model)?;
            let client = RelayClient::new(cli.relay_url)?;
            let mut session = ChatSession::new(store, client, chat, model);
            session.stream = !no_stream;
            run_turn(&mut session, &text.join(" ")).await
        }
        Command::Chats { action } => chats(&store, action),
        Command::Model { name, list } => {
            match name {
                None if list => {
                    for line in models::catalog_lines(&pick_model(&store, None)?) {
                        println!("{}", line);
                    }
                }
                Some(name) => {
                    store.save_settings(&Settings { preferred_model: Some(name.clone()) })?;
                    println!("preferred model set to {}", name);
                }
                None => println!("{}", pick_model(&store, None)?),
            }
            Ok(())
        }
    }
}

fn pick_model(store: &ChatStore, explicit: Option<String>) -> Result<String> {
    if let Some(m) = explicit {
        return Ok(m);
    }
    let settings = store.load_settings()?;
    Ok(settings
        .preferred_model
        .unwrap_or_else(|| DEFAULT_MODEL.to_string()))
}

fn chats(store: &ChatStore, action: ChatsCommand) -> Result<()> {
    match action {
        ChatsCommand::List => {
            for c in store.list_chats()? {
                println!(
                    "{}  {}  {}",
                    &c.id.to_string()[..8],
                    c.updated_at.format("%Y-%m-%d %H:%M"),
                    c.title
                );
            }
        }
        ChatsCommand::New { title } => {
            let c = store.create_chat(title.as_deref())?;
            println!("{}", c.id);
        }
        ChatsCommand::Rename { id, title } => {
            let c = store.resolve(&id)?;
            let c = store.rename_chat(c.id, &title.join(" "))?;
            println!("renamed {} to {}", &c.id.to_string()[..8], c.title);
        }
        ChatsCommand::Delete { id } => {
            let c = store.resolve(&id)?;
            store.delete_chat(c.id)?;
            println!("deleted {}", c.title);
        }
        ChatsCommand::Show { id } => {
            let c = store.resolve(&id)?;
            println!("# {}", c.title);
            for m in store.load_messages(c.id)? {
                let who = match m.role {
                    Role::User => "you".to_string(),
                    _ => m.model.clone().unwrap_or_else(|| "assistant".to_string()),
                };
                println!("\n[{}] {}", who, m.content);
            }
        }
    }
    Ok(())
}

async fn repl(session: &mut ChatSession) -> Result<()> {
    info!(target: "aichat", relay = %session.relay_url(), chat = %session.chat.id, "repl start");
    println!(
        "chat {} with {}. Ctrl-C cancels a reply, /models lists models, /model <name> switches, /quit or Ctrl-D exits.",
        &session.chat.id.to_string()[..8],
        session.model
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            println!();
            break;
        };
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line == "/models" {
            for l in models::catalog_lines(&session.model) {
                println!("{}", l);
            }
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("/model")
            .filter(|r| r.is_empty() || r.starts_with(' '))
        {
            let name = rest.trim();
            if name.is_empty() {
                println!("model: {}", session.model);
            } else {
                session.set_model(name)?;
                println!("model set to {}", session.model);
            }
            continue;
        }
        run_turn(session, line).await?;
    }
    Ok(())
}

async fn run_turn(session: &mut ChatSession, text: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut out = io::stdout();
    let res = session
        .send(text, &cancel, |_, fragment| {
            let _ = write!(out, "{}", fragment);
            let _ = out.flush();
        })
        .await;
    watcher.abort();

    let Some(live) = res? else {
        return Ok(());
    };
    if !session.stream {
        print!("{}", live.content);
    }
    match live.state {
        ReplyState::Complete => println!(),
        ReplyState::Canceled => println!("\n[canceled]"),
        ReplyState::Failed(e) => eprintln!("\n[error] {}", e),
        ReplyState::Streaming => {}
    }
    info!(target: "aichat", chars = live.content.len(), "turn finished");
    Ok(())
}
