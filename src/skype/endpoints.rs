// Service endpoints and client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed client id, scope and redirect used against the identity provider.
pub const LIVE_OAUTH_QUERY: &str = "client_id=00000000480BC46C&scope=service%3A%3Alw.skype.com%3A%3AMBI_SSL&response_type=token&redirect_uri=https%3A%2F%2Flogin.live.com%2Foauth20_desktop.srf&state=999&locale=en";

pub const DEFAULT_CLIENT_VERSION: &str = "1431/8.30.0.50";

/// Interested resources for the long-poll subscription
pub const INTERESTED_RESOURCES: [&str; 4] = [
    "/v1/threads/ALL",
    "/v1/users/ME/contacts/ALL",
    "/v1/users/ME/conversations/ALL/messages",
    "/v1/users/ME/conversations/ALL/properties",
];

/// Base URLs of the services the client talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub login: String,
    pub api: String,
    pub contacts: String,
    pub messenger: String,
    pub asm: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login: "https://login.live.com".to_string(),
            api: "https://api.skype.com".to_string(),
            contacts: "https://contacts.skype.com".to_string(),
            messenger: "https://client-s.gateway.messenger.live.com".to_string(),
            asm: "https://api.asm.skype.com".to_string(),
        }
    }
}

impl EndpointConfig {
    /// Point every service at one base URL (used against local mock servers).
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            login: base.clone(),
            api: base.clone(),
            contacts: base.clone(),
            messenger: base.clone(),
            asm: base,
        }
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth20_authorize.srf?{}", self.login, LIVE_OAUTH_QUERY)
    }

    pub fn default_post_url(&self) -> String {
        format!("{}/ppsecure/post.srf?{}", self.login, LIVE_OAUTH_QUERY)
    }

    pub fn session_login_url(&self) -> String {
        format!("{}/login/skypetoken", self.api)
    }

    pub fn profile_url(&self) -> String {
        format!("{}/users/self/profile", self.api)
    }

    pub fn asm_token_url(&self) -> String {
        format!("{}/v1/skypetokenauth", self.asm)
    }

    pub fn contacts_url(&self, skype_id: &str) -> String {
        format!(
            "{}/contacts/v1/users/{}/contacts",
            self.contacts,
            urlencoding::encode(skype_id)
        )
    }

    pub fn contact_url(&self, skype_id: &str, contact_id: &str) -> String {
        format!(
            "{}/{}",
            self.contacts_url(skype_id),
            urlencoding::encode(contact_id)
        )
    }

    pub fn contact_requests_url(&self) -> String {
        format!("{}/users/self/contacts/auth-request", self.api)
    }

    pub fn contact_request_url(&self, username: &str) -> String {
        format!(
            "{}/{}",
            self.contact_requests_url(),
            urlencoding::encode(username)
        )
    }

    pub fn contact_action_url(&self, username: &str, action: &str) -> String {
        format!(
            "{}/users/self/contacts/{}/{}",
            self.api,
            urlencoding::encode(username),
            action
        )
    }

    pub fn endpoints_url(&self) -> String {
        format!("{}/v1/users/ME/endpoints", self.messenger)
    }

    pub fn endpoint_url(&self, endpoint_id: &str) -> String {
        format!("{}/{}", self.endpoints_url(), urlencoding::encode(endpoint_id))
    }

    pub fn subscriptions_url(&self) -> String {
        format!("{}/SELF/subscriptions", self.endpoints_url())
    }

    pub fn poll_url(&self) -> String {
        format!("{}/0/poll", self.subscriptions_url())
    }

    pub fn threads_url(&self) -> String {
        format!("{}/v1/threads", self.messenger)
    }
}

/// Tunables for a `SkypeClient`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: EndpointConfig,
    pub client_version: String,
    pub request_timeout_secs: u64,
    pub bootstrap_workers: usize,
    pub bootstrap_deadline_secs: u64,
    pub notification_buffer: usize,
    /// How long a single long-poll request may stay open.
    pub poll_timeout_secs: u64,
    /// First pause after a failed poll; doubles while polls keep failing.
    pub poll_retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            request_timeout_secs: 30,
            bootstrap_workers: 5,
            // One day: effectively "wait for completion"
            bootstrap_deadline_secs: 24 * 60 * 60,
            notification_buffer: 100,
            poll_timeout_secs: 90,
            poll_retry_delay_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bootstrap_deadline(&self) -> Duration {
        Duration::from_secs(self.bootstrap_deadline_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.poll_retry_delay_ms)
    }
}
