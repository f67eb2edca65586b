// Session lifecycle for SkypeClient
// Login, bootstrap follow-up, endpoint registration, event loop start and logout.

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::bootstrap::{run_bootstrap, BootstrapReport};
use super::error::{ErrorSource, SkypeError, SkypeResult};
use super::events::{EventDispatcher, EventLoop};
use super::transport::HttpRequest;
use super::SkypeClient;

static THREAD_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)threads/([^/?#]+)").expect("thread location pattern is valid"));

/// Fields of a `Set-RegistrationToken` header:
/// `registrationToken=...; expires=...; endpointId={...}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationToken {
    pub token: String,
    pub expires: Option<u64>,
    pub endpoint_id: String,
}

pub fn parse_registration_token(header: &str) -> SkypeResult<RegistrationToken> {
    let mut token = None;
    let mut expires = None;
    let mut endpoint_id = None;

    for part in header.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "registrationToken" => token = Some(value.trim().to_string()),
            "expires" => expires = value.trim().parse().ok(),
            "endpointId" => endpoint_id = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (token, endpoint_id) {
        (Some(token), Some(endpoint_id)) => Ok(RegistrationToken {
            token,
            expires,
            endpoint_id,
        }),
        _ => Err(SkypeError::protocol_with_payload(
            "Malformed Set-RegistrationToken header",
            header,
        )),
    }
}

impl SkypeClient {
    /// Authenticate, bootstrap the session and start consuming push events.
    ///
    /// Individual bootstrap tasks may fail without failing the login; their
    /// errors are in the returned report.
    pub async fn login(&self, username: &str, password: &str) -> SkypeResult<BootstrapReport> {
        if self.is_logged_in().await {
            warn!("Already logged in, logging out first");
            self.logout().await;
        }

        let session = self
            .authenticator
            .authenticate(self.transport.as_ref(), username, password)
            .await?;
        info!("Logged in as {} ({})", session.username, session.skype_id);
        *self.session.write().await = Some(session);

        let report = match run_bootstrap(self).await {
            Ok(report) => report,
            Err(e) => {
                error!("Session bootstrap failed: {}", e);
                self.teardown().await;
                return Err(e);
            }
        };

        self.start_event_loop().await;
        Ok(report)
    }

    /// Unregister the endpoint and drop all local session state.
    ///
    /// The local teardown happens even if the server call fails; that failure
    /// goes to the error handler.
    pub async fn logout(&self) {
        if let Err(e) = self.unregister_endpoint().await {
            self.error_handler.handle(ErrorSource::Logout, &e);
        }
        self.teardown().await;
        info!("Logged out");
    }

    async fn unregister_endpoint(&self) -> SkypeResult<()> {
        let Some(session) = self.session().await else {
            return Ok(());
        };
        if !session.has_endpoint() {
            debug!("No endpoint registered, skipping server logout");
            return Ok(());
        }

        let request = HttpRequest::delete(self.config.endpoints.endpoint_url(&session.endpoint_id))
            .cookies(session.cookies.iter())
            .no_redirects();
        let response = self.execute_messenger(request).await?;
        response.expect(&[200], "While logging out")
    }

    async fn teardown(&self) {
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        self.push_channel.lock().await.take();
        *self.session.write().await = None;
        self.directory.clear().await;
    }

    /// Exchange the skype token for the ASM device cookie.
    pub async fn fetch_device_cookie(&self) -> SkypeResult<()> {
        let session = self.current_session().await?;
        let request = HttpRequest::post(self.config.endpoints.asm_token_url())
            .text(format!("skypetoken={}", session.session_token));
        let response = self.transport.execute(request).await?;
        response.expect(&[200, 204], "While fetching the device cookie")?;

        let (name, value) = response
            .header("Set-Cookie")
            .and_then(|set_cookie| set_cookie.split(';').next())
            .and_then(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .ok_or_else(|| SkypeError::protocol("No cookie in device token response"))?;

        debug!("Storing device cookie {}", name);
        if let Some(session) = self.session.write().await.as_mut() {
            session.cookies.insert(name, value);
        }
        Ok(())
    }

    /// Register this client as an endpoint on the messaging gateway.
    pub async fn register_endpoint(&self) -> SkypeResult<()> {
        let request =
            HttpRequest::post(self.config.endpoints.endpoints_url()).json(json!({"endpointFeatures": "Agent"}));
        let response = self.execute_messenger(request).await?;
        response.expect(&[200, 201], "While registering endpoint")?;

        let header = response.header("Set-RegistrationToken").ok_or_else(|| {
            SkypeError::protocol_with_payload("No Set-RegistrationToken in endpoint response", response.body.clone())
        })?;
        let registration = parse_registration_token(header)?;
        info!("Registered endpoint {}", registration.endpoint_id);

        match self.session.write().await.as_mut() {
            Some(session) => {
                session.registration_token = Some(registration.token);
                session.endpoint_id = registration.endpoint_id;
                Ok(())
            }
            None => Err(SkypeError::NotAuthenticated),
        }
    }

    /// Open the push channel and keep it for the event loop. The endpoint
    /// must be registered first.
    pub async fn open_push_channel(&self) -> SkypeResult<()> {
        let channel = self.push_connector.connect(self.session.clone()).await?;
        *self.push_channel.lock().await = Some(channel);
        debug!("Push channel opened");
        Ok(())
    }

    /// Spawn the event consumer if a push channel was opened.
    pub(crate) async fn start_event_loop(&self) {
        let Some(channel) = self.push_channel.lock().await.take() else {
            warn!("No push channel, events will not be received");
            return;
        };

        let dispatcher = EventDispatcher::new(
            self.directory.clone(),
            std::sync::Arc::new(self.clone()),
            self.registry.clone(),
        );
        let event_loop = EventLoop::new(
            channel,
            dispatcher,
            self.notification_tx.clone(),
            self.error_handler.clone(),
        )
        .with_retry_delay(self.config.poll_retry_delay());

        let handle = tokio::spawn(event_loop.run());
        if let Some(previous) = self.event_loop.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Whether the event consumer task is running.
    pub async fn is_receiving_events(&self) -> bool {
        self.event_loop
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Create a group conversation with the given users and return its id.
    pub async fn create_group_chat(&self, usernames: &[&str]) -> SkypeResult<String> {
        let session = self.current_session().await?;
        let mut members = vec![json!({"id": format!("8:{}", session.username), "role": "Admin"})];
        members.extend(
            usernames
                .iter()
                .map(|username| json!({"id": format!("8:{}", username), "role": "User"})),
        );

        let request = HttpRequest::post(self.config.endpoints.threads_url()).json(json!({ "members": members }));
        let response = self.execute_messenger(request).await?;
        response.expect(&[201], "While creating group chat")?;

        let location = response.header("Location").unwrap_or_default();
        let thread_id = THREAD_LOCATION
            .captures(location)
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| {
                SkypeError::protocol_with_payload("Location of new thread did not contain an id", location)
            })?;
        info!("Created group chat {}", thread_id);
        Ok(thread_id)
    }
}
