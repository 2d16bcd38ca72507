use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use scdio_db::Database;
use scdio_types::api::Claims;
use scdio_types::events::{GatewayCommand, GatewayEvent, Room};

use crate::chat::{self, ChatError};
use crate::dispatcher::{Dispatcher, Rooms};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
}

#[derive(Debug, Clone)]
struct SessionUser {
    id: i64,
    username: String,
}

/// Per-connection state owned by the read loop.
pub struct Session {
    pub conn_id: Uuid,
    pub rooms: Arc<RwLock<Rooms>>,
    user: Option<SessionUser>,
}

impl Session {
    pub fn new(conn_id: Uuid) -> Self {
        Self {
            conn_id,
            rooms: Arc::new(RwLock::new(Rooms::default())),
            user: None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Drive one WebSocket until either side goes away. The client must send
/// `authenticate` before anything else is accepted.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut direct_rx) = ctx.dispatcher.register_connection().await;
    let mut session = Session::new(conn_id);
    debug!("Gateway connection {} opened", conn_id);

    let mut broadcast_rx = ctx.dispatcher.subscribe();
    let send_rooms = session.rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    // Forward room broadcasts + targeted replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let envelope = match result {
                        Ok(envelope) => envelope,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !envelope.is_for(conn_id, &*send_rooms.read().await) {
                        continue;
                    }
                    let Some(frame) = encode(&envelope.event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                result = direct_rx.recv() => {
                    let Some(event) = result else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {}
        _ = read_loop(&mut receiver, &ctx, &mut session, &pong_received) => {}
    }
    send_task.abort();

    ctx.dispatcher.unregister_connection(conn_id).await;
    if let Some(user) = session.user {
        if ctx.dispatcher.user_offline(user.id).await {
            let result = blocking(&ctx.db, move |db| db.set_status(user.id, "offline")).await;
            if let Err(e) = result {
                error!("Failed to mark {} offline: {:#}", user.username, e);
            }
        }
        info!("{} ({}) disconnected from gateway", user.username, user.id);
    } else {
        debug!("Gateway connection {} closed before authenticating", conn_id);
    }
}

async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    ctx: &GatewayContext,
    session: &mut Session,
    pong_received: &AtomicBool,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                Ok(cmd) => handle_command(ctx, session, cmd).await,
                Err(e) => {
                    warn!(
                        "Connection {} bad command: {} -- raw: {}",
                        session.conn_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    reply(ctx, session, GatewayEvent::error("Invalid command")).await;
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Apply one client command. Replies go to this connection only; state
/// changes are broadcast through the dispatcher.
pub async fn handle_command(ctx: &GatewayContext, session: &mut Session, cmd: GatewayCommand) {
    if let GatewayCommand::Authenticate { token } = cmd {
        authenticate(ctx, session, &token).await;
        return;
    }

    let Some(user) = session.user.clone() else {
        reply(ctx, session, GatewayEvent::error("Not authenticated")).await;
        return;
    };

    match cmd {
        GatewayCommand::Authenticate { .. } => {} // Handled above

        GatewayCommand::JoinChannel { channel_id } => {
            let result = blocking(&ctx.db, move |db| chat::channel_access(db, user.id, channel_id)).await;
            match result {
                Ok(_) => {
                    session.rooms.write().await.join(Room::Channel(channel_id));
                    debug!("{} ({}) joined channel {}", user.username, user.id, channel_id);
                }
                Err(e) => reply_chat_error(ctx, session, e, "Failed to join channel").await,
            }
        }

        GatewayCommand::LeaveChannel { channel_id } => {
            session.rooms.write().await.leave(Room::Channel(channel_id));
            debug!("{} ({}) left channel {}", user.username, user.id, channel_id);
        }

        GatewayCommand::SendMessage(req) => {
            let dispatcher = ctx.dispatcher.clone();
            let result = blocking(&ctx.db, move |db| chat::post_message(db, &dispatcher, user.id, &req)).await;
            if let Err(e) = result {
                reply_chat_error(ctx, session, e, "Failed to send message").await;
            }
        }

        GatewayCommand::EditMessage { id, content } => {
            let dispatcher = ctx.dispatcher.clone();
            let result = blocking(&ctx.db, move |db| {
                chat::edit_message(db, &dispatcher, user.id, id, Some(&content))
            })
            .await;
            if let Err(e) = result {
                reply_chat_error(ctx, session, e, "Failed to edit message").await;
            }
        }

        GatewayCommand::DeleteMessage { id } => {
            let dispatcher = ctx.dispatcher.clone();
            let result = blocking(&ctx.db, move |db| chat::delete_message(db, &dispatcher, user.id, id)).await;
            if let Err(e) = result {
                reply_chat_error(ctx, session, e, "Failed to delete message").await;
            }
        }

        GatewayCommand::React { message_id, emoji } => {
            let dispatcher = ctx.dispatcher.clone();
            let result = blocking(&ctx.db, move |db| {
                chat::toggle_reaction(db, &dispatcher, user.id, &user.username, message_id, &emoji)
            })
            .await;
            if let Err(e) = result {
                reply_chat_error(ctx, session, e, "Failed to update reaction").await;
            }
        }

        GatewayCommand::TypingStart { channel_id } | GatewayCommand::TypingStop { channel_id } => {
            let is_typing = matches!(cmd, GatewayCommand::TypingStart { .. });
            if !session.rooms.read().await.contains(Room::Channel(channel_id)) {
                trace!("{} typing in unjoined channel {}, ignored", user.username, channel_id);
                return;
            }
            ctx.dispatcher.broadcast_except(
                Room::Channel(channel_id),
                GatewayEvent::UserTyping {
                    channel_id,
                    user_id: user.id,
                    username: user.username,
                    is_typing,
                },
                session.conn_id,
            );
        }

        GatewayCommand::WhiteboardUpdate(data) => {
            trace!("{} ({}) whiteboard update", user.username, user.id);
            ctx.dispatcher
                .broadcast_except(Room::Global, GatewayEvent::WhiteboardUpdate(data), session.conn_id);
        }

        GatewayCommand::DashboardSubscribe => {
            session.rooms.write().await.join(Room::Dashboard);
            debug!("{} ({}) subscribed to dashboard updates", user.username, user.id);
        }
    }
}

async fn authenticate(ctx: &GatewayContext, session: &mut Session, token: &str) {
    if session.user.is_some() {
        reply(ctx, session, GatewayEvent::error("Already authenticated")).await;
        return;
    }

    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(ctx.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(e) => {
            warn!("Connection {} sent an invalid token: {}", session.conn_id, e);
            reply(ctx, session, invalid_token()).await;
            return;
        }
    };

    let user_id = claims.sub;
    let lookup: anyhow::Result<_> = blocking(&ctx.db, move |db| {
        let username = db.get_username(user_id)?;
        let servers = db.server_ids_for_user(user_id)?;
        Ok(username.map(|name| (name, servers)))
    })
    .await;

    let (username, servers) = match lookup {
        Ok(Some(found)) => found,
        Ok(None) => {
            warn!("Token for deleted user {}", user_id);
            reply(ctx, session, invalid_token()).await;
            return;
        }
        Err(e) => {
            error!("Gateway auth lookup failed: {:#}", e);
            reply(ctx, session, GatewayEvent::error("Internal server error")).await;
            return;
        }
    };

    {
        let mut rooms = session.rooms.write().await;
        for server_id in &servers {
            rooms.join(Room::Server(*server_id));
        }
    }
    session.user = Some(SessionUser {
        id: user_id,
        username: username.clone(),
    });

    reply(
        ctx,
        session,
        GatewayEvent::Authenticated {
            user_id,
            username: username.clone(),
        },
    )
    .await;

    // Tell the newcomer who is already here before announcing them.
    for (uid, uname) in ctx.dispatcher.online_users().await {
        if uid != user_id {
            reply(
                ctx,
                session,
                GatewayEvent::UserPresence {
                    user_id: uid,
                    username: uname,
                    status: "online".into(),
                },
            )
            .await;
        }
    }

    if ctx.dispatcher.user_online(user_id, &username).await {
        if let Err(e) = blocking(&ctx.db, move |db| db.set_status(user_id, "online")).await {
            error!("Failed to mark {} online: {:#}", user_id, e);
        }
    }
    info!(
        "{} ({}) authenticated on gateway, {} server rooms",
        username,
        user_id,
        servers.len()
    );
}

fn invalid_token() -> GatewayEvent {
    GatewayEvent::AuthenticationError {
        error: "Invalid token".into(),
    }
}

async fn reply(ctx: &GatewayContext, session: &Session, event: GatewayEvent) {
    ctx.dispatcher.send_to(session.conn_id, event).await;
}

async fn reply_chat_error(ctx: &GatewayContext, session: &Session, err: ChatError, fallback: &str) {
    let message = match err {
        ChatError::Internal(e) => {
            error!("Gateway command failed: {:#}", e);
            fallback.to_string()
        }
        other => other.to_string(),
    };
    reply(ctx, session, GatewayEvent::error(message)).await;
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("Failed to serialise gateway event: {}", e);
            None
        }
    }
}

/// Run blocking DB work off the async runtime.
async fn blocking<T, E, F>(db: &Arc<Database>, f: F) -> Result<T, E>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<anyhow::Error> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| E::from(anyhow::Error::from(e)))?
}
