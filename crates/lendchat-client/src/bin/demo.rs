//! Drives a full send / receive / reconnect cycle against the in-process
//! transport.  Run with `RUST_LOG=debug` to watch the connection lifecycle.
//!
//! With `LENDCHAT_TOKEN` set, connects to `LENDCHAT_WS_URL` over a real
//! WebSocket instead and logs traffic for `LENDCHAT_DEMO_SECS` seconds.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use lendchat_client::{init_tracing, ChatService, ClientConfig};
use lendchat_net::{ChannelConnector, StaticCredential, Target, WsConnector};
use lendchat_shared::Message;
use lendchat_store::MemoryKv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut config = ClientConfig::from_env();
    config.reconnect_interval = Duration::from_millis(200);
    info!(?config, "Loaded configuration");

    let kv: Arc<dyn lendchat_store::KeyValueStore> = match config.db_path {
        Some(_) => ChatService::open_store(&config)?,
        None => Arc::new(MemoryKv::new()),
    };

    if let Ok(token) = std::env::var("LENDCHAT_TOKEN") {
        return run_live(config, kv, token).await;
    }

    let connector = Arc::new(ChannelConnector::new());
    let service = ChatService::start(
        config,
        kv,
        connector.clone(),
        Arc::new(StaticCredential("demo-token".into())),
    );

    service.listeners().on_status_change(|status| {
        info!(?status, "status");
    });
    service.listeners().on_message(Target::Global, |message| {
        info!(
            chat_id = %message.chat_id,
            status = ?message.status,
            content = %message.content,
            "message"
        );
    });

    // Offline send, picked up by the sweep once connected.
    let id = service
        .dispatcher()
        .send_message(Message::text("lender-1", "Acme Loans", "Is my application complete?"))
        .await;
    info!(message_id = %id, "queued while offline");

    service.connect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = serde_json::json!({
        "type": "message",
        "goId": "lender-1",
        "data": {
            "id": "srv-1",
            "chatId": "lender-1",
            "chatName": "Acme Loans",
            "toId": "me",
            "toName": "Me",
            "content": "Yes, we will be in touch shortly.",
            "timestamp": lendchat_shared::now_millis()
        }
    });
    connector.deliver(reply.to_string()).await;

    // Server drop; the manager reconnects on its own.
    connector.drop_connection().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    for item in service.store().get_chat_list().await {
        info!(
            chat = %item.id,
            title = %item.title,
            last = %item.last_message,
            unread = item.unread_count,
            "chat"
        );
    }
    info!(frames = connector.sent_texts().len(), "frames written");

    service.shutdown().await;
    Ok(())
}

async fn run_live(
    config: ClientConfig,
    kv: Arc<dyn lendchat_store::KeyValueStore>,
    token: String,
) -> anyhow::Result<()> {
    let secs = std::env::var("LENDCHAT_DEMO_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    let service = ChatService::start(
        config,
        kv,
        Arc::new(WsConnector::default()),
        Arc::new(StaticCredential(token)),
    );
    service.listeners().on_status_change(|status| {
        info!(?status, "status");
    });
    service.listeners().on_message(Target::Global, |message| {
        info!(chat_id = %message.chat_id, content = %message.content, "message");
    });

    service.connect().await;
    tokio::time::sleep(Duration::from_secs(secs)).await;

    service.shutdown().await;
    Ok(())
}
