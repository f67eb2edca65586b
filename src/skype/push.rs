// Push channel: where event frames come from
// The default channel long-polls the messaging gateway subscription.

use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::endpoints::{EndpointConfig, INTERESTED_RESOURCES};
use super::error::{SkypeError, SkypeResult};
use super::session::SharedSession;
use super::transport::{HttpRequest, Transport};

/// A source of raw event frames.
///
/// An error from `next_frame` is not final: the consumer may call it again.
#[async_trait]
pub trait PushChannel: Send {
    /// Next frame, or `None` once the channel is closed for good.
    async fn next_frame(&mut self) -> SkypeResult<Option<String>>;
}

/// Opens a push channel for a session.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, session: SharedSession) -> SkypeResult<Box<dyn PushChannel>>;
}

pub struct LongPollConnector {
    transport: Arc<dyn Transport>,
    endpoints: EndpointConfig,
    idle_delay: Duration,
    poll_timeout: Option<Duration>,
}

impl LongPollConnector {
    pub fn new(transport: Arc<dyn Transport>, endpoints: EndpointConfig) -> Self {
        Self {
            transport,
            endpoints,
            idle_delay: Duration::from_millis(500),
            poll_timeout: None,
        }
    }

    /// Pause between polls that returned no events.
    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Timeout for a single poll; the server holds polls open for a while.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }
}

#[async_trait]
impl PushConnector for LongPollConnector {
    /// Subscribe and hand back the channel. The session must already carry
    /// the endpoint registration token.
    async fn connect(&self, session: SharedSession) -> SkypeResult<Box<dyn PushChannel>> {
        if session.read().await.is_none() {
            return Err(SkypeError::NotAuthenticated);
        }
        let mut channel = LongPollChannel {
            transport: self.transport.clone(),
            endpoints: self.endpoints.clone(),
            session,
            idle_delay: self.idle_delay,
            poll_timeout: self.poll_timeout,
            subscribed: false,
        };
        channel.subscribe().await?;
        Ok(Box::new(channel))
    }
}

/// Long-poll subscription on the messaging gateway.
///
/// A poll answered with 404 or 410 means the subscription expired; the
/// channel subscribes again before the next poll.
pub struct LongPollChannel {
    transport: Arc<dyn Transport>,
    endpoints: EndpointConfig,
    session: SharedSession,
    idle_delay: Duration,
    poll_timeout: Option<Duration>,
    subscribed: bool,
}

impl LongPollChannel {
    async fn authorized(&self, request: HttpRequest) -> SkypeResult<HttpRequest> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(SkypeError::NotAuthenticated)?;
        Ok(session.authorize_messenger(request))
    }

    async fn subscribe(&mut self) -> SkypeResult<()> {
        let request = HttpRequest::post(self.endpoints.subscriptions_url()).json(json!({
            "channelType": "httpLongPoll",
            "template": "raw",
            "interestedResources": INTERESTED_RESOURCES,
        }));
        let request = self.authorized(request).await?;
        let response = self.transport.execute(request).await?;
        response.expect(&[201], "While subscribing to events")?;
        info!("Subscribed to push events");
        self.subscribed = true;
        Ok(())
    }

    fn poll_request(&self) -> HttpRequest {
        let request = HttpRequest::post(self.endpoints.poll_url());
        match self.poll_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

#[async_trait]
impl PushChannel for LongPollChannel {
    async fn next_frame(&mut self) -> SkypeResult<Option<String>> {
        loop {
            if !self.subscribed {
                self.subscribe().await?;
            }

            let request = self.authorized(self.poll_request()).await?;
            let response = self.transport.execute(request).await?;
            match response.status {
                200 if !response.body.trim().is_empty() => return Ok(Some(response.body)),
                200 | 204 => tokio::time::sleep(self.idle_delay).await,
                404 | 410 => {
                    warn!("Push subscription expired ({}), subscribing again", response.status);
                    self.subscribed = false;
                    tokio::time::sleep(self.idle_delay).await;
                }
                _ => {
                    response.expect(&[200, 204], "While polling for events")?;
                }
            }
        }
    }
}
