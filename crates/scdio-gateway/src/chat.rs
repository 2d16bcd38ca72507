//! Chat mutations shared by the REST handlers and the WebSocket gateway.
//! Each operation checks access, writes to the database and broadcasts the
//! resulting event, so both transports behave identically.
//!
//! These are blocking; async callers wrap them in `spawn_blocking`.

use scdio_db::Database;
use scdio_db::queries::{NewMessage, ReactionToggle};
use scdio_types::api::SendMessageRequest;
use scdio_types::events::{GatewayEvent, Room};
use scdio_types::models::Message;
use scdio_types::permissions::Permissions;

use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Invalid(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Resolves the channel's server and checks the user may read it.
pub fn channel_access(db: &Database, user_id: i64, channel_id: i64) -> Result<i64, ChatError> {
    let server_id = db
        .channel_server(channel_id)?
        .ok_or(ChatError::NotFound("Channel not found"))?;
    let perms = db
        .effective_permissions(server_id, user_id)?
        .ok_or(ChatError::Forbidden("Access denied"))?;
    if !perms.contains(Permissions::VIEW_CHANNELS) {
        return Err(ChatError::Forbidden("Access denied"));
    }
    Ok(server_id)
}

/// Insert a message and broadcast `NewMessage` to the channel's server room.
pub fn post_message(
    db: &Database,
    dispatcher: &Dispatcher,
    user_id: i64,
    req: &SendMessageRequest,
) -> Result<Message, ChatError> {
    let channel_id = req.channel_id.ok_or(ChatError::Invalid("Channel ID is required"))?;
    let content = req.content();
    if content.is_none() && !req.has_attachments() {
        return Err(ChatError::Invalid("Message content is required"));
    }

    let server_id = db
        .channel_server(channel_id)?
        .ok_or(ChatError::NotFound("Channel not found"))?;
    let perms = db
        .effective_permissions(server_id, user_id)?
        .ok_or(ChatError::Forbidden("Access denied"))?;
    if !perms.contains(Permissions::SEND_MESSAGES) {
        return Err(ChatError::Forbidden("Missing permission to send messages"));
    }

    if let Some(parent) = req.reply_to {
        match db.get_message(parent)? {
            Some(parent) if parent.channel_id == channel_id => {}
            _ => return Err(ChatError::Invalid("Reply target not found in this channel")),
        }
    }

    let attachments = req.attachments.as_deref().unwrap_or_default();
    let message = db.insert_message(&NewMessage {
        channel_id,
        user_id,
        content,
        attachments,
        reply_to: req.reply_to,
    })?;

    dispatcher.broadcast(Room::Server(server_id), GatewayEvent::NewMessage(message.clone()));
    Ok(message)
}

/// Only the author may edit.
pub fn edit_message(
    db: &Database,
    dispatcher: &Dispatcher,
    user_id: i64,
    message_id: i64,
    content: Option<&str>,
) -> Result<Message, ChatError> {
    let content = content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(ChatError::Invalid("Message content is required"))?;
    let existing = db
        .get_message(message_id)?
        .ok_or(ChatError::NotFound("Message not found"))?;
    if existing.user_id != user_id {
        return Err(ChatError::Forbidden("You can only edit your own messages"));
    }

    let message = db
        .edit_message(message_id, content)?
        .ok_or(ChatError::NotFound("Message not found"))?;
    dispatcher.broadcast(
        Room::Server(message.server_id),
        GatewayEvent::MessageUpdated(message.clone()),
    );
    Ok(message)
}

/// The author, or anyone holding MANAGE_MESSAGES in the server, may delete.
pub fn delete_message(
    db: &Database,
    dispatcher: &Dispatcher,
    user_id: i64,
    message_id: i64,
) -> Result<(), ChatError> {
    let existing = db
        .get_message(message_id)?
        .ok_or(ChatError::NotFound("Message not found"))?;
    if existing.user_id != user_id {
        let perms = db
            .effective_permissions(existing.server_id, user_id)?
            .unwrap_or(Permissions::NONE);
        if !perms.contains(Permissions::MANAGE_MESSAGES) {
            return Err(ChatError::Forbidden("Access denied"));
        }
    }

    db.delete_message(message_id)?;
    dispatcher.broadcast(
        Room::Server(existing.server_id),
        GatewayEvent::MessageDeleted {
            id: message_id,
            channel_id: existing.channel_id,
        },
    );
    Ok(())
}

/// Toggle the user's reaction and broadcast the add or remove.
pub fn toggle_reaction(
    db: &Database,
    dispatcher: &Dispatcher,
    user_id: i64,
    username: &str,
    message_id: i64,
    emoji: &str,
) -> Result<ReactionToggle, ChatError> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::Invalid("Emoji is required"));
    }
    let existing = db
        .get_message(message_id)?
        .ok_or(ChatError::NotFound("Message not found"))?;
    if db.effective_permissions(existing.server_id, user_id)?.is_none() {
        return Err(ChatError::Forbidden("Access denied"));
    }

    let toggle = db
        .toggle_reaction(message_id, user_id, emoji)?
        .ok_or(ChatError::NotFound("Message not found"))?;

    let event = if toggle.added {
        GatewayEvent::ReactionAdded {
            message_id,
            channel_id: toggle.channel_id,
            user_id,
            username: username.to_string(),
            emoji: emoji.to_string(),
        }
    } else {
        GatewayEvent::ReactionRemoved {
            message_id,
            channel_id: toggle.channel_id,
            user_id,
            emoji: emoji.to_string(),
        }
    };
    dispatcher.broadcast(Room::Server(toggle.server_id), event);
    Ok(toggle)
}
