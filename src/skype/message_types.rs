// Message-type handlers for NewMessage events
// The dispatcher picks a handler by the resource's `messagetype` string.

use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::SkypeResult;
use crate::models::{ChatMessage, Notification};

/// Type assumed for a message resource that carries no content.
pub const PLAIN_TEXT: &str = "Text";

pub trait MessageHandler: Send + Sync {
    /// `message_type` is the string the handler was selected by.
    fn handle(&self, message_type: &str, resource: &Value) -> SkypeResult<Option<Notification>>;
}

/// The resource fields that drive message-type routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub message_type: Option<String>,
    pub content: Option<String>,
}

impl MessageEnvelope {
    pub fn from_resource(resource: &Value) -> Self {
        let field = |key: &str| resource.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            message_type: field("messagetype"),
            content: field("content"),
        }
    }
}

/// Last path component after `marker` in a service link, e.g. the `8:bob`
/// in `.../v1/users/ME/contacts/8:bob`.
pub fn link_tail(link: &str, marker: &str) -> Option<String> {
    let start = link.find(marker)? + marker.len();
    let tail = link[start..].split('/').next()?;
    (!tail.is_empty()).then(|| tail.to_string())
}

fn field(resource: &Value, key: &str) -> Option<String> {
    resource.get(key).and_then(Value::as_str).map(str::to_string)
}

fn conversation_of(resource: &Value) -> Option<String> {
    resource
        .get("conversationLink")
        .and_then(Value::as_str)
        .and_then(|link| link_tail(link, "/conversations/"))
}

fn sender_of(resource: &Value) -> Option<String> {
    resource
        .get("from")
        .and_then(Value::as_str)
        .and_then(|link| link_tail(link, "/contacts/"))
}

/// Plain and rich text messages.
pub struct TextMessageHandler;

impl MessageHandler for TextMessageHandler {
    fn handle(&self, message_type: &str, resource: &Value) -> SkypeResult<Option<Notification>> {
        let message = ChatMessage {
            conversation_id: conversation_of(resource),
            sender_id: sender_of(resource),
            sender_name: field(resource, "imdisplayname"),
            message_id: field(resource, "clientmessageid").or_else(|| field(resource, "id")),
            message_type: message_type.to_string(),
            content: field(resource, "content").unwrap_or_default(),
        };
        Ok(Some(Notification::MessageReceived(message)))
    }
}

/// `Control/Typing` and `Control/ClearTyping`
pub struct TypingHandler;

impl MessageHandler for TypingHandler {
    fn handle(&self, message_type: &str, resource: &Value) -> SkypeResult<Option<Notification>> {
        Ok(Some(Notification::Typing {
            conversation_id: conversation_of(resource),
            sender_id: sender_of(resource),
            active: message_type == "Control/Typing",
        }))
    }
}

/// Table from message-type string to handler.
pub struct MessageTypeRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    default_handler: Arc<dyn MessageHandler>,
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MessageTypeRegistry {
    /// Only the content-less default route, no named types.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: Arc::new(TextMessageHandler),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let text: Arc<dyn MessageHandler> = Arc::new(TextMessageHandler);
        let typing: Arc<dyn MessageHandler> = Arc::new(TypingHandler);
        registry.register_arc(PLAIN_TEXT, text.clone());
        registry.register_arc("RichText", text);
        registry.register_arc("Control/Typing", typing.clone());
        registry.register_arc("Control/ClearTyping", typing);
        registry
    }

    pub fn register(&mut self, message_type: &str, handler: impl MessageHandler + 'static) {
        self.register_arc(message_type, Arc::new(handler));
    }

    pub fn register_arc(&mut self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        debug!("Registering handler for message type {}", message_type);
        self.handlers.insert(message_type.to_string(), handler);
    }

    pub fn resolve(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn default_handler(&self) -> Arc<dyn MessageHandler> {
        self.default_handler.clone()
    }

    pub fn set_default_handler(&mut self, handler: impl MessageHandler + 'static) {
        self.default_handler = Arc::new(handler);
    }
}
