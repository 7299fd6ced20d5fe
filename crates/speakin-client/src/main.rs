mod commands;
mod config;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use speakin_api::{ApiClient, Backend, HistoryLoader, SessionToken};
use speakin_gateway::{
    ChatEvent, ConversationHandle, ConversationManager, GatewayConfig, NotificationEvent,
    NotificationHandle, NotificationManager, SendOutcome, Surface, WsConnector,
};
use speakin_types::models::Message;

use crate::commands::Input;
use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speakin=debug,speakin_gateway=debug,speakin_api=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!(
        "SpeakIn client for user {} (api {}, sockets {})",
        config.user_id, config.api_url, config.ws_url
    );

    let token = SessionToken::new(config.access_token.clone());
    let backend: Arc<dyn Backend> =
        Arc::new(ApiClient::new(config.api_url.clone(), token.clone()));
    let gateway = GatewayConfig::new(config.ws_url.clone()).with_heartbeat(config.heartbeat);
    let connector = Arc::new(WsConnector);

    let chat = ConversationManager::spawn(
        config.user_id,
        HistoryLoader::new(backend.clone()),
        token.clone(),
        gateway.clone(),
        connector.clone(),
    );
    let notifications =
        NotificationManager::spawn(config.user_id, backend, token, gateway, connector);

    tokio::spawn(log_chat_events(chat.clone()));
    tokio::spawn(log_notification_events(notifications.clone()));

    notifications.refresh_unread();
    chat.load_roster();
    if let Some(id) = config.counterpart_id {
        chat.open_counterpart(id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Nothing => {}
            Input::Quit => break,
            Input::Open(id) => chat.open_counterpart(id),
            Input::Who => list_roster(&chat).await,
            Input::Find(query) => {
                for counterpart in chat.search(query).await {
                    println!("  {:>6}  {}", counterpart.id, counterpart.display_name());
                }
            }
            Input::Notifications => notifications.activate(Surface::Flyout),
            Input::Clear => match notifications.clear_all().await {
                Ok(()) => println!("Notifications cleared"),
                Err(e) => println!("{}", e),
            },
            Input::Say(text) => match chat.send(text).await {
                SendOutcome::Sent => {}
                SendOutcome::NotOpen => println!("Not connected; /open a conversation first"),
                SendOutcome::NoCounterpart => println!("No conversation selected"),
                SendOutcome::Empty => {}
            },
            Input::Invalid(reason) => println!("{}", reason),
        }
    }

    notifications.deactivate(Surface::Flyout);
    notifications.shutdown();
    chat.shutdown();
    info!("Bye");
    Ok(())
}

async fn list_roster(chat: &ConversationHandle) {
    let Some(snapshot) = chat.snapshot().await else {
        return;
    };
    if snapshot.roster.is_empty() {
        println!("No conversations yet");
    }
    for counterpart in &snapshot.roster {
        let marker = match &snapshot.counterpart {
            Some(current) if current.id == counterpart.id => '*',
            _ => ' ',
        };
        println!("{} {:>6}  {}", marker, counterpart.id, counterpart.display_name());
    }
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M"),
        message.sender_id,
        message.content
    );
}

async fn log_chat_events(chat: ConversationHandle) {
    let mut events = chat.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Chat event receiver lagged by {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            ChatEvent::Selected(counterpart) => {
                println!("-- {} --", counterpart.display_name());
            }
            ChatEvent::HistoryLoaded { .. } => {
                if let Some(snapshot) = chat.snapshot().await {
                    for message in &snapshot.messages {
                        print_message(message);
                    }
                }
            }
            ChatEvent::MessageAppended(message) => print_message(&message),
            ChatEvent::StateChanged(state) => info!("Chat channel {:?}", state),
            ChatEvent::RosterChanged { len } => info!("{} conversation(s) known", len),
            ChatEvent::RosterPartial { failed } => {
                warn!("Could not load profiles for {:?}", failed)
            }
            ChatEvent::Error(error) => println!("! {}", error),
            ChatEvent::ErrorCleared | ChatEvent::ScrollToLatest => {}
        }
    }
}

async fn log_notification_events(notifications: NotificationHandle) {
    let mut events = notifications.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Notification event receiver lagged by {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            NotificationEvent::Received(entry) => {
                println!("* {}: {}", entry.sender_name, entry.message);
            }
            NotificationEvent::Loaded { .. } => {
                if let Some(snapshot) = notifications.snapshot().await {
                    println!("Notifications ({} unread):", snapshot.unread);
                    for entry in &snapshot.entries {
                        println!(
                            "  {} {}: {}",
                            entry.timestamp.format("%d %b %H:%M"),
                            entry.sender_name,
                            entry.message
                        );
                    }
                }
            }
            NotificationEvent::UnreadChanged(count) => info!("{} unread notification(s)", count),
            NotificationEvent::StateChanged(state) => info!("Notification channel {:?}", state),
            NotificationEvent::Cleared => {}
            NotificationEvent::Error(error) => println!("! {}", error),
        }
    }
}
