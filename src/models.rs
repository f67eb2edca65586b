use chrono::{DateTime, Utc};
use serde_json::Value;

/// Presence reported for contacts nobody has told us about yet.
pub const OFFLINE_STATUS: &str = "Offline";

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub person_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub mood: Option<String>,
    pub rich_mood: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub phone_numbers: Option<String>,
    pub gender: Option<String>,
    pub language: Option<String>,
    pub birthday: Option<String>,
    pub contact_type: Option<String>,
    pub auth_certificate: Option<String>,
    pub is_authorized: bool,
    pub is_blocked: bool,
    pub is_phone_contact: bool,
    pub status: String,
    pub endpoints: Vec<String>,
}

/// A pending request from someone who wants to be a contact.
///
/// Two requests are the same request when sender and time match.
#[derive(Debug, Clone)]
pub struct ContactRequest {
    pub sent_time: DateTime<Utc>,
    pub sender_id: String,
    pub greeting_message: String,
}

impl PartialEq for ContactRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sender_id == other.sender_id && self.sent_time == other.sent_time
    }
}

impl Eq for ContactRequest {}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub message_id: Option<String>,
    pub message_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointPresence {
    pub user_id: String,
    pub endpoint_id: String,
    pub public_info: Option<Value>,
    pub private_info: Option<Value>,
}

/// Application-visible events produced by the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    MessageReceived(ChatMessage),
    Typing {
        conversation_id: Option<String>,
        sender_id: Option<String>,
        active: bool,
    },
    StatusChanged {
        user_id: String,
        status: String,
    },
    EndpointPresence(EndpointPresence),
    ContactBlocked {
        contact_id: String,
        blocked: bool,
    },
    ContactRequestReceived(ContactRequest),
}
