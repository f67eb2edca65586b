// Skype client module
// Entry point for the client: authentication, session bootstrap, contact
// directory and push event handling.

use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex, RwLock};
use tokio::task::JoinHandle;

pub mod auth;
pub mod bootstrap;
pub mod connection;
pub mod contacts;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod message_types;
pub mod presence;
pub mod push;
pub mod roster;
pub mod session;
pub mod transport;

pub use auth::{Authenticator, LiveAuthenticator};
pub use bootstrap::{BootstrapReport, BootstrapTask};
pub use contacts::{ContactDirectory, ContactSource};
pub use endpoints::{ClientConfig, EndpointConfig};
pub use error::{CredentialError, ErrorHandler, ErrorSource, LoggingErrorHandler, SkypeError, SkypeResult};
pub use events::{Dispatch, EventDispatcher, EventLoop, EventType, ProtocolEvent};
pub use message_types::{MessageHandler, MessageTypeRegistry};
pub use push::{LongPollConnector, PushChannel, PushConnector};
pub use session::{Session, SharedSession};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use crate::models::{Contact, ContactRequest, Notification};

/// A Skype client.
///
/// Cloning is cheap: clones share the session, the contact directory and
/// the notification channel.
#[derive(Clone)]
pub struct SkypeClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    authenticator: Arc<dyn Authenticator>,
    push_connector: Arc<dyn PushConnector>,
    error_handler: Arc<dyn ErrorHandler>,
    session: SharedSession,
    directory: Arc<ContactDirectory>,
    registry: Arc<RwLock<MessageTypeRegistry>>,
    notification_tx: mpsc::Sender<Notification>,
    push_channel: Arc<TokioMutex<Option<Box<dyn PushChannel>>>>,
    event_loop: Arc<TokioMutex<Option<JoinHandle<()>>>>,
}

impl SkypeClient {
    /// Client talking to the real services over HTTPS.
    pub fn new(config: ClientConfig) -> SkypeResult<(Self, mpsc::Receiver<Notification>)> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Ok(Self::with_transport(config, transport))
    }

    /// Client over a caller-supplied transport, with the identity-provider
    /// authenticator and a long-poll push channel on that same transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (notification_tx, notification_rx) = mpsc::channel(config.notification_buffer.max(1));
        let authenticator = Arc::new(LiveAuthenticator::new(&config));
        let push_connector = Arc::new(
            LongPollConnector::new(transport.clone(), config.endpoints.clone()).with_poll_timeout(config.poll_timeout()),
        );

        (
            Self {
                config: Arc::new(config),
                transport,
                authenticator,
                push_connector,
                error_handler: Arc::new(LoggingErrorHandler),
                session: Arc::new(RwLock::new(None)),
                directory: Arc::new(ContactDirectory::new()),
                registry: Arc::new(RwLock::new(MessageTypeRegistry::with_defaults())),
                notification_tx,
                push_channel: Arc::new(TokioMutex::new(None)),
                event_loop: Arc::new(TokioMutex::new(None)),
            },
            notification_rx,
        )
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_push_connector(mut self, push_connector: Arc<dyn PushConnector>) -> Self {
        self.push_connector = push_connector;
        self
    }

    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Route NewMessage events of `message_type` to `handler`.
    pub async fn register_message_handler(&self, message_type: &str, handler: impl MessageHandler + 'static) {
        self.registry.write().await.register(message_type, handler);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current session, if logged in.
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub fn directory(&self) -> Arc<ContactDirectory> {
        self.directory.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.directory.contacts().await
    }

    pub async fn contact_requests(&self) -> Vec<ContactRequest> {
        self.directory.requests().await
    }

    pub(crate) async fn current_session(&self) -> SkypeResult<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(SkypeError::NotAuthenticated)
    }

    /// Send a request to api.skype.com or the contacts service.
    pub(crate) async fn execute_api(&self, request: HttpRequest) -> SkypeResult<HttpResponse> {
        let request = self.current_session().await?.authorize_api(request);
        debug!("Sending {:?} request to: {}", request.method, request.url);
        self.transport.execute(request).await
    }

    /// Send a request to the messaging gateway.
    pub(crate) async fn execute_messenger(&self, request: HttpRequest) -> SkypeResult<HttpResponse> {
        let request = self.current_session().await?.authorize_messenger(request);
        debug!("Sending {:?} request to: {}", request.method, request.url);
        self.transport.execute(request).await
    }
}
