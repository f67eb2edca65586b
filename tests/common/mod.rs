// Common test utilities for integration tests
// A scripted in-memory transport, a scripted push channel and a recording
// error handler, plus canned service responses for a full login.
#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};

use skylink::skype::transport::Method;
use skylink::skype::{
    ClientConfig, EndpointConfig, ErrorHandler, ErrorSource, HttpRequest, HttpResponse, PushChannel,
    PushConnector, SharedSession, SkypeError, SkypeResult, Transport,
};
use skylink::SkypeClient;

pub const BASE: &str = "https://skype.test";
pub const USERNAME: &str = "Alice@Example.com";
pub const PASSWORD: &str = "correct horse";
pub const SKYPE_ID: &str = "live:alice";
pub const SKYPE_TOKEN: &str = "skype-token-1";
pub const ENDPOINT_ID: &str = "{ep-1}";

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        endpoints: EndpointConfig::single_host(BASE),
        ..ClientConfig::default()
    }
}

/// In-memory transport answering by method and path.
///
/// Each route holds a queue of responses; the last one repeats. Unrouted
/// requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, response: HttpResponse) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    /// Replace whatever is scripted for a route.
    pub fn reset(&self, method: Method, path: &str, response: HttpResponse) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert((method, path.to_string()), VecDeque::from([response]));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .collect()
    }
}

fn path_of(url: &str) -> &str {
    let without_base = url.strip_prefix(BASE).unwrap_or(url);
    without_base.split('?').next().unwrap_or(without_base)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> SkypeResult<HttpResponse> {
        let key = (request.method, path_of(&request.url).to_string());
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let response = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| HttpResponse::new(404, format!("no route for {:?}", key))))
    }
}

/// Push connector that replays fixed frames, or refuses to connect.
pub struct ScriptedPushConnector {
    frames: Mutex<Option<Vec<String>>>,
    refuse: bool,
}

impl ScriptedPushConnector {
    pub fn with_frames(frames: Vec<String>) -> Self {
        Self {
            frames: Mutex::new(Some(frames)),
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            frames: Mutex::new(None),
            refuse: true,
        }
    }
}

#[async_trait]
impl PushConnector for ScriptedPushConnector {
    async fn connect(&self, _session: SharedSession) -> SkypeResult<Box<dyn PushChannel>> {
        if self.refuse {
            return Err(SkypeError::Transport("connection refused".to_string()));
        }
        let frames = self.frames.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(ScriptedChannel {
            frames: frames.into(),
        }))
    }
}

/// Push connector whose connect never completes.
pub struct HangingPushConnector;

#[async_trait]
impl PushConnector for HangingPushConnector {
    async fn connect(&self, _session: SharedSession) -> SkypeResult<Box<dyn PushChannel>> {
        std::future::pending().await
    }
}

pub struct ScriptedChannel {
    pub frames: VecDeque<String>,
}

#[async_trait]
impl PushChannel for ScriptedChannel {
    async fn next_frame(&mut self) -> SkypeResult<Option<String>> {
        Ok(self.frames.pop_front())
    }
}

/// Keeps every reported error as `(source, message)`.
#[derive(Default)]
pub struct RecordingErrorHandler {
    errors: Mutex<Vec<(ErrorSource, String)>>,
}

impl RecordingErrorHandler {
    pub fn errors(&self) -> Vec<(ErrorSource, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn from_source(&self, source: ErrorSource) -> Vec<String> {
        self.errors()
            .into_iter()
            .filter(|(s, _)| *s == source)
            .map(|(_, message)| message)
            .collect()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle(&self, source: ErrorSource, error: &SkypeError) {
        self.errors.lock().unwrap().push((source, error.to_string()));
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

pub fn authorize_page() -> HttpResponse {
    let body = format!(
        r#"<html><head><script>var ServerData = {{urlPost:'{}/ppsecure/post.srf?wa=wsignin1.0',sFT:'x'}};</script></head>
<body><form><input type="email" name="loginfmt"><input type="hidden" name="PPFT" id="i0327" value="ppft-token"/></form></body></html>"#,
        BASE
    );
    HttpResponse::new(200, body)
        .with_header("Set-Cookie", "MSPRequ=lt=1; path=/")
        .with_header("Set-Cookie", "MSPOK=$uuid-mspok; domain=skype.test; path=/")
}

/// Script the identity provider and session-token exchange.
pub fn script_login(transport: &ScriptedTransport) {
    transport
        .on(Method::Get, "/oauth20_authorize.srf", authorize_page())
        .on(
            Method::Post,
            "/ppsecure/post.srf",
            HttpResponse::new(302, "").with_header(
                "Location",
                "https://login.live.com/oauth20_desktop.srf?lc=1033#access_token=EwB%2Btoken&token_type=bearer&expires_in=86400&refresh_token=MCd%21refresh",
            ),
        )
        .on(
            Method::Post,
            "/login/skypetoken",
            json_response(200, json!({"skypetoken": SKYPE_TOKEN, "skypeid": SKYPE_ID, "expiresIn": 86400})),
        );
}

pub fn contact_list() -> Value {
    json!({
        "contacts": [
            {
                "person_id": "8:bob",
                "display_name": "Bob",
                "authorized": true,
                "blocked": false,
                "profile": {"name": {"first": "Bob", "surname": "Builder"}, "mood": "busy"}
            },
            {
                "person_id": "8:carol",
                "authorized": true,
                "profile": {"firstname": "Carol"}
            },
            {"person_id": "8:suggested", "suggested": true},
            {"display_name": "no id"}
        ],
        "blocklist": [{"mri": "8:mallory"}]
    })
}

/// Script every bootstrap call except the push channel.
pub fn script_bootstrap(transport: &ScriptedTransport) {
    transport
        .on(
            Method::Post,
            "/v1/skypetokenauth",
            HttpResponse::new(204, "").with_header("Set-Cookie", "skypetoken_asm=asm-cookie; path=/; secure"),
        )
        .on(
            Method::Get,
            "/users/self/profile",
            json_response(
                200,
                json!({"firstname": "Alice", "lastname": "Liddell", "phoneMobile": "+6421000", "phoneHome": ""}),
            ),
        )
        .on(Method::Get, "/contacts/v1/users/live%3Aalice/contacts", json_response(200, contact_list()))
        .on(
            Method::Get,
            "/users/self/contacts/auth-request",
            json_response(
                200,
                json!([
                    {"event_time": "2016-03-25 14:05:09.123", "sender": "dave", "greeting": "hi alice"},
                    {"event_time": "not a date", "sender": "eve", "greeting": "x"}
                ]),
            ),
        )
        .on(
            Method::Post,
            "/v1/users/ME/endpoints",
            HttpResponse::new(201, "{}").with_header(
                "Set-RegistrationToken",
                format!("registrationToken=reg-token==; expires=1459264519; endpointId={}", ENDPOINT_ID),
            ),
        )
        .on(Method::Delete, "/v1/users/ME/endpoints/%7Bep-1%7D", HttpResponse::new(200, ""));
}

/// A client over a fully scripted transport.
pub fn scripted_client(
    transport: Arc<ScriptedTransport>,
    push: ScriptedPushConnector,
    errors: Arc<RecordingErrorHandler>,
) -> (SkypeClient, tokio::sync::mpsc::Receiver<skylink::Notification>) {
    scripted_client_with(test_config(), transport, push, errors)
}

pub fn scripted_client_with(
    config: ClientConfig,
    transport: Arc<ScriptedTransport>,
    push: impl PushConnector + 'static,
    errors: Arc<RecordingErrorHandler>,
) -> (SkypeClient, tokio::sync::mpsc::Receiver<skylink::Notification>) {
    setup_logging();
    let (client, notifications) = SkypeClient::with_transport(config, transport);
    (
        client.with_push_connector(Arc::new(push)).with_error_handler(errors),
        notifications,
    )
}
