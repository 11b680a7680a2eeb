//! Terminal shell for the chat session engine
//!
//! (c) Softlandia 2025

use chat_session::config::ClientConfig;
use chat_session::core::client::ChatClient;
use chat_session::core::traits::IdentityProvider;
use chat_session::infrastructure::database::DatabaseConnection;
use chat_session::infrastructure::entities::{ChatKind, Message};
use chat_session::infrastructure::feed::ChangeFeed;
use chat_session::infrastructure::identity::LinkIdentityProvider;
use chat_session::infrastructure::repositories::SqliteChatStore;
use chat_session::infrastructure::traits::ChatStore;

use anyhow::{Context, anyhow};
use log::info;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

const HELP: &str = "\
commands:
  login <email>            sign in with a one-time link
  logout
  search <text>            find users by username or email
  chat <username|user-id>  start or open a personal chat
  group <name>             create a group chat
  add <username|user-id>   add a user to the open group
  chats                    list conversations
  open <n>                 open the n-th conversation of `chats`
  send <text>
  edit <n> <text>          edit the n-th message of `history`
  delete <n>
  history                  show the open conversation
  close
  online                   users online now
  hide | show              toggle visibility
  profile <username> [status]
  quit";

/// What the shell knows beyond the client itself.
struct Shell {
    config: Arc<ClientConfig>,
    store: Arc<dyn ChatStore>,
    identity: Arc<LinkIdentityProvider>,
    client: Option<ChatClient>,
}

enum Flow {
    Continue,
    Quit,
}

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = Arc::new(ClientConfig::from_env());
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Arc<ClientConfig>) -> anyhow::Result<()> {
    let connection = DatabaseConnection::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    let feed = Arc::new(ChangeFeed::new(config.feed_capacity));
    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(Arc::new(connection), feed));
    let identity = Arc::new(LinkIdentityProvider::new(config.link_ttl));

    let mut shell = Shell {
        config,
        store,
        identity,
        client: None,
    };

    println!("{HELP}");
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        match shell.execute(command, args.trim()).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }

    if let Some(client) = shell.client.take() {
        client.logout().await?;
    }
    info!("Shutting down...");
    Ok(())
}

impl Shell {
    fn client(&self) -> anyhow::Result<&ChatClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("not signed in, use `login <email>`"))
    }

    async fn execute(&mut self, command: &str, args: &str) -> anyhow::Result<Flow> {
        match command {
            "help" => println!("{HELP}"),
            "quit" | "exit" => return Ok(Flow::Quit),
            "login" => self.login(args).await?,
            "logout" => {
                let client = self
                    .client
                    .take()
                    .ok_or_else(|| anyhow!("not signed in"))?;
                client.logout().await?;
                println!("signed out");
            }
            "search" => {
                let found = self.client()?.directory().search(args).await?;
                for profile in found {
                    let marker = if profile.is_online { "*" } else { " " };
                    println!("{marker} {} <{}> {}", profile.username, profile.email, profile.id);
                }
            }
            "chat" => {
                let client = self.client()?;
                let other = self.resolve_user(args).await?;
                let chat = client.registry().start_or_open(other).await?;
                client.session().open(chat.id).await?;
                print_history(client);
            }
            "group" => {
                let client = self.client()?;
                let chat = client.registry().create_group(args).await?;
                client.session().open(chat.id).await?;
                println!("created group {}", chat.id);
            }
            "add" => {
                let client = self.client()?;
                let chat_id = client
                    .session()
                    .current_chat()
                    .ok_or_else(|| anyhow!("open a group first"))?;
                let user_id = self.resolve_user(args).await?;
                client.registry().add_member(chat_id, user_id).await?;
                println!("added {user_id}");
            }
            "chats" => {
                let client = self.client()?;
                let conversations = client.registry().refresh().await?;
                for (n, membership) in conversations.iter().enumerate() {
                    let chat = &membership.chat;
                    let title = match chat.kind {
                        ChatKind::Group => chat.name.clone().unwrap_or_default(),
                        ChatKind::Personal => "personal".to_owned(),
                    };
                    println!(
                        "{n:>3} {title} | {}",
                        chat.last_message.as_deref().unwrap_or("")
                    );
                }
            }
            "open" => {
                let client = self.client()?;
                let n: usize = args.parse().context("usage: open <n>")?;
                let chat_id = client
                    .registry()
                    .conversations()
                    .get(n)
                    .map(|membership| membership.chat.id)
                    .ok_or_else(|| anyhow!("no conversation {n}, see `chats`"))?;
                client.session().open(chat_id).await?;
                print_history(client);
            }
            "send" => {
                let client = self.client()?;
                client.session().send(args).await?;
                print_history(client);
            }
            "edit" => {
                let client = self.client()?;
                let (n, text) = args.split_once(' ').unwrap_or((args, ""));
                let message = nth_message(client, n)?;
                if client.session().edit(message.id, text).await?.is_none() {
                    println!("nothing to change");
                }
                print_history(client);
            }
            "delete" => {
                let client = self.client()?;
                let message = nth_message(client, args)?;
                client.session().delete(message.id).await?;
                print_history(client);
            }
            "history" => {
                let client = self.client()?;
                client.session().reload().await?;
                print_history(client);
            }
            "close" => self.client()?.session().close(),
            "online" => {
                for profile in self.client()?.presence().refresh_roster().await? {
                    println!("* {} ({})", profile.username, profile.status);
                }
            }
            "hide" => self.client()?.presence().set_visible(false).await?,
            "show" => self.client()?.presence().set_visible(true).await?,
            "profile" => {
                let (username, status) = args.split_once(' ').unwrap_or((args, ""));
                let profile = self
                    .client()?
                    .profile_editor()
                    .save(username, status)
                    .await?;
                println!("{} ({})", profile.username, profile.status);
            }
            other => println!("unknown command {other:?}, try `help`"),
        }
        Ok(Flow::Continue)
    }

    async fn login(&mut self, email: &str) -> anyhow::Result<()> {
        if self.client.is_some() {
            return Err(anyhow!("already signed in, `logout` first"));
        }

        self.identity.request_link(email).await?;
        // No mail service here: follow the link straight from the outbox.
        let link = self
            .identity
            .take_sent_link(email)
            .ok_or_else(|| anyhow!("no sign-in link was issued"))?;
        self.identity.redeem(&link.token)?;

        let identity: Arc<dyn IdentityProvider> = self.identity.clone();
        let client = ChatClient::login(identity, self.store.clone(), self.config.clone()).await?;
        println!("signed in as {}", client.profile().username);
        self.client = Some(client);
        Ok(())
    }

    /// Accepts a user id or an exact username.
    async fn resolve_user(&self, arg: &str) -> anyhow::Result<Uuid> {
        if let Ok(user_id) = Uuid::parse_str(arg) {
            return Ok(user_id);
        }
        self.client()?
            .directory()
            .search(arg)
            .await?
            .iter()
            .find(|profile| profile.username == arg)
            .map(|profile| profile.id)
            .ok_or_else(|| anyhow!("no user named {arg:?}, try `search`"))
    }
}

fn nth_message(client: &ChatClient, arg: &str) -> anyhow::Result<Message> {
    let n: usize = arg.parse().context("expected a message number")?;
    client
        .session()
        .timeline()
        .into_iter()
        .nth(n)
        .ok_or_else(|| anyhow!("no message {n}"))
}

fn print_history(client: &ChatClient) {
    let me = client.context().user_id();
    for (n, message) in client.session().timeline().iter().enumerate() {
        let who = if message.sender_id == me { "me" } else { "them" };
        let edited = if message.is_edited { " (edited)" } else { "" };
        println!(
            "{n:>3} [{}] {who}: {}{edited}",
            message.created_at.format("%H:%M"),
            message.content
        );
    }
}
