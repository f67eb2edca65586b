// Session state produced by authentication and completed by bootstrap

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::transport::HttpRequest;

/// Tokens obtained from the identity provider redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl fmt::Debug for LiveTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// An authenticated session.
///
/// Both tokens are mandatory, so a value of this type is never half logged in.
/// The client keeps `Option<Session>`: `None` is the unauthenticated state.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub username: String,
    pub skype_id: String,
    pub access_token: String,
    pub session_token: String,
    pub refresh_token: Option<String>,
    pub access_token_expires_in: Option<u64>,
    pub endpoint_id: String,
    pub registration_token: Option<String>,
    pub cookies: HashMap<String, String>,
    pub display_name: Option<String>,
    pub phone_numbers: Option<String>,
}

impl Session {
    pub fn new(username: &str, skype_id: &str, tokens: LiveTokens, session_token: &str) -> Self {
        Self {
            username: username.to_lowercase(),
            skype_id: skype_id.to_string(),
            access_token: tokens.access_token,
            session_token: session_token.to_string(),
            refresh_token: tokens.refresh_token,
            access_token_expires_in: tokens.expires_in,
            endpoint_id: String::new(),
            registration_token: None,
            cookies: HashMap::new(),
            display_name: None,
            phone_numbers: None,
        }
    }

    /// Headers for api.skype.com and the contacts service.
    pub fn authorize_api(&self, request: HttpRequest) -> HttpRequest {
        request.header("X-Skypetoken", self.session_token.as_str())
    }

    /// Headers for the messaging gateway.
    pub fn authorize_messenger(&self, request: HttpRequest) -> HttpRequest {
        let request = request.header("Authentication", format!("skypetoken={}", self.session_token));
        match &self.registration_token {
            Some(token) => request.header("RegistrationToken", format!("registrationToken={}", token)),
            None => request,
        }
    }

    pub fn has_endpoint(&self) -> bool {
        !self.endpoint_id.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("skype_id", &self.skype_id)
            .field("endpoint_id", &self.endpoint_id)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Session slot shared between bootstrap tasks and the event loop.
pub type SharedSession = Arc<RwLock<Option<Session>>>;
