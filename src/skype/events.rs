// Push event decoding, dispatch and the sequential event loop

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use super::contacts::{ContactDirectory, ContactSource};
use super::error::{ErrorHandler, ErrorSource, SkypeError, SkypeResult};
use super::message_types::{MessageEnvelope, MessageTypeRegistry, PLAIN_TEXT};
use super::presence::{parse_endpoint_presence, parse_user_presence};
use super::push::PushChannel;
use crate::models::Notification;

/// Index of the contact id in a conversation resource link split on `/`:
/// `https:` `` `host` `v1` `users` `ME` `conversations` `8:bob` ...
const CONVERSATION_ID_SEGMENT: usize = 7;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    NewMessage,
    EndpointPresence,
    UserPresence,
    ConversationUpdate,
    ThreadUpdate,
    Unknown(String),
}

impl EventType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "NewMessage" => EventType::NewMessage,
            "EndpointPresence" => EventType::EndpointPresence,
            "UserPresence" => EventType::UserPresence,
            "ConversationUpdate" => EventType::ConversationUpdate,
            "ThreadUpdate" => EventType::ThreadUpdate,
            other => EventType::Unknown(other.to_string()),
        }
    }
}

/// One envelope from a push frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    pub event_type: EventType,
    pub resource: Value,
    pub resource_link: Option<String>,
}

impl ProtocolEvent {
    pub fn from_value(envelope: &Value) -> SkypeResult<Self> {
        let tag = envelope
            .get("resourceType")
            .and_then(Value::as_str)
            .or_else(|| envelope.get("type").and_then(Value::as_str))
            .ok_or_else(|| SkypeError::protocol_with_payload("Event without a type tag", envelope.to_string()))?;

        Ok(Self {
            event_type: EventType::from_tag(tag),
            resource: envelope.get("resource").cloned().unwrap_or(Value::Null),
            resource_link: envelope
                .get("resourceLink")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Decode a push frame: either a long-poll batch `{"eventMessages": [...]}`
/// or a single envelope.
pub fn decode_frame(frame: &str) -> SkypeResult<Vec<ProtocolEvent>> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| SkypeError::protocol_with_payload(format!("Undecodable frame: {}", e), frame))?;

    match value.get("eventMessages") {
        Some(Value::Array(envelopes)) => envelopes.iter().map(ProtocolEvent::from_value).collect(),
        Some(_) => Err(SkypeError::protocol_with_payload("eventMessages is not a list", frame)),
        None => Ok(vec![ProtocolEvent::from_value(&value)?]),
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Handled(Option<Notification>),
    Ignored,
}

/// Routes events to handlers and applies their side effects to the directory.
pub struct EventDispatcher {
    directory: Arc<ContactDirectory>,
    source: Arc<dyn ContactSource>,
    registry: Arc<RwLock<MessageTypeRegistry>>,
}

impl EventDispatcher {
    pub fn new(
        directory: Arc<ContactDirectory>,
        source: Arc<dyn ContactSource>,
        registry: Arc<RwLock<MessageTypeRegistry>>,
    ) -> Self {
        Self {
            directory,
            source,
            registry,
        }
    }

    pub async fn dispatch(&self, event: &ProtocolEvent) -> SkypeResult<Dispatch> {
        match &event.event_type {
            EventType::NewMessage => self.on_new_message(&event.resource).await,
            EventType::EndpointPresence => self.on_endpoint_presence(&event.resource).await,
            EventType::UserPresence => self.on_user_presence(event).await,
            EventType::ConversationUpdate => self.on_conversation_update(event).await,
            // Membership changes are not tracked
            EventType::ThreadUpdate => Ok(Dispatch::Handled(None)),
            EventType::Unknown(tag) => {
                debug!("Ignoring event with unknown type {}", tag);
                Ok(Dispatch::Ignored)
            }
        }
    }

    async fn on_new_message(&self, resource: &Value) -> SkypeResult<Dispatch> {
        let envelope = MessageEnvelope::from_resource(resource);

        let (message_type, handler) = match envelope.content {
            None => (PLAIN_TEXT.to_string(), self.registry.read().await.default_handler()),
            Some(_) => {
                let message_type = envelope.message_type.ok_or_else(|| {
                    SkypeError::dispatch(SkypeError::Validation("Null type".to_string()), resource)
                })?;
                let handler = self.registry.read().await.resolve(&message_type);
                match handler {
                    Some(handler) => (message_type, handler),
                    None => {
                        debug!("No handler for message type {}", message_type);
                        return Ok(Dispatch::Ignored);
                    }
                }
            }
        };

        handler
            .handle(&message_type, resource)
            .map(Dispatch::Handled)
            .map_err(|e| SkypeError::dispatch(e, resource))
    }

    async fn on_endpoint_presence(&self, resource: &Value) -> SkypeResult<Dispatch> {
        let presence = parse_endpoint_presence(resource)?;
        if !self
            .directory
            .record_endpoint(&presence.user_id, &presence.endpoint_id)
            .await
        {
            debug!("Endpoint presence for unknown contact {}", presence.user_id);
        }
        Ok(Dispatch::Handled(Some(Notification::EndpointPresence(presence))))
    }

    async fn on_user_presence(&self, event: &ProtocolEvent) -> SkypeResult<Dispatch> {
        let (user_id, status) = parse_user_presence(&event.resource, event.resource_link.as_deref())?;
        self.directory.set_status(&user_id, &status).await;
        Ok(Dispatch::Handled(Some(Notification::StatusChanged { user_id, status })))
    }

    async fn on_conversation_update(&self, event: &ProtocolEvent) -> SkypeResult<Dispatch> {
        let blocked = event
            .resource
            .get("properties")
            .and_then(|p| p.get("conversationblocked"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let Some(blocked) = blocked else {
            return Ok(Dispatch::Handled(None));
        };

        let contact_id = event
            .resource_link
            .as_deref()
            .and_then(|link| link.split('/').nth(CONVERSATION_ID_SEGMENT))
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                SkypeError::protocol_with_payload(
                    "Conversation update without a contact in resourceLink",
                    event.resource_link.clone().unwrap_or_default(),
                )
            })?
            .to_string();

        let blocked = blocked.eq_ignore_ascii_case("true");
        self.directory.get_or_load(&contact_id, self.source.as_ref()).await?;
        self.directory.set_blocked(&contact_id, blocked).await;
        info!("Contact {} blocked: {}", contact_id, blocked);

        Ok(Dispatch::Handled(Some(Notification::ContactBlocked { contact_id, blocked })))
    }
}

/// Single consumer of the push channel.
///
/// Frames are handled strictly in arrival order; a failing event is reported
/// and the loop moves on. Channel errors are reported and retried with a
/// growing pause. The loop ends when the channel closes or the task is
/// aborted at logout.
pub struct EventLoop {
    channel: Box<dyn PushChannel>,
    dispatcher: EventDispatcher,
    notifications: mpsc::Sender<Notification>,
    error_handler: Arc<dyn ErrorHandler>,
    retry_delay: Duration,
}

impl EventLoop {
    pub fn new(
        channel: Box<dyn PushChannel>,
        dispatcher: EventDispatcher,
        notifications: mpsc::Sender<Notification>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            channel,
            dispatcher,
            notifications,
            error_handler,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// First pause after a channel error.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(mut self) {
        info!("Event loop started");
        let mut backoff = self.retry_delay;
        loop {
            let frame = match self.channel.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Push channel closed");
                    break;
                }
                Err(e) => {
                    self.error_handler.handle(ErrorSource::PollingPushChannel, &e);
                    debug!("Polling again in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                    continue;
                }
            };
            backoff = self.retry_delay;

            let events = match decode_frame(&frame) {
                Ok(events) => events,
                Err(e) => {
                    self.error_handler.handle(ErrorSource::DecodingFrame, &e);
                    continue;
                }
            };

            for event in events {
                match self.dispatcher.dispatch(&event).await {
                    Ok(Dispatch::Handled(Some(notification))) => {
                        if self.notifications.send(notification).await.is_err() {
                            warn!("Notification receiver dropped");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => self.error_handler.handle(ErrorSource::EventDispatch, &e),
                }
            }
        }
        info!("Event loop stopped");
    }
}
