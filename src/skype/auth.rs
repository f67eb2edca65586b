// Identity provider login and session-token exchange
//
// The provider has no API for this: the authorize page is scraped for the
// PPFT form token and the POST target, and failures are recognised by the
// error text embedded in the returned page's JavaScript.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, error, info};
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::endpoints::{ClientConfig, EndpointConfig};
use super::error::{CredentialError, SkypeError, SkypeResult};
use super::session::{LiveTokens, Session};
use super::transport::{HttpRequest, Transport};

const URL_POST_MARKER: &str = "urlPost:'";
const ERROR_TEXT_MARKER: &str = "sErrTxt:'";

/// Strategy that turns credentials into an authenticated `Session`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        transport: &dyn Transport,
        username: &str,
        password: &str,
    ) -> SkypeResult<Session>;
}

/// Login through the Microsoft account (Live) web flow.
pub struct LiveAuthenticator {
    endpoints: EndpointConfig,
    client_version: String,
}

impl LiveAuthenticator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            client_version: config.client_version.clone(),
        }
    }

    /// Steps 1-6: authorize page, form scrape, credential POST, redirect parse.
    pub async fn fetch_live_tokens(
        &self,
        transport: &dyn Transport,
        username: &str,
        password: &str,
    ) -> SkypeResult<LiveTokens> {
        debug!("Requesting Live authorize page");
        let authorize = transport
            .execute(HttpRequest::get(self.endpoints.authorize_url()))
            .await
            .map_err(|e| {
                error!("Failed to reach Live: {}", e);
                e
            })?;

        let mspok = authorize.cookie("MSPOK").ok_or_else(|| {
            error!("Error while connecting to Live: MSPOK not set");
            SkypeError::protocol("Error while connecting to Live: MSPOK not set")
        })?;

        let ppft = find_ppft(&authorize.body).ok_or_else(|| {
            error!("Error while connecting to Live: PPFT not found");
            SkypeError::protocol_with_payload(
                "Error while connecting to Live: PPFT not found",
                authorize.body.clone(),
            )
        })?;

        let post_url = find_post_url(&authorize.body).unwrap_or_else(|| {
            debug!("No urlPost in authorize page, using default post URL");
            self.endpoints.default_post_url()
        });

        debug!("Posting credentials to {}", post_url);
        let post = transport
            .execute(
                HttpRequest::post(post_url)
                    .form([
                        ("PPFT", ppft),
                        ("login", username.to_lowercase()),
                        ("passwd", password.to_string()),
                    ])
                    .cookie("MSPOK", mspok)
                    .no_redirects(),
            )
            .await?;

        if post.status != 302 {
            let err = classify_login_failure(&post.body);
            error!("{}", err);
            return Err(err);
        }

        let location = post.header("Location").ok_or_else(|| {
            SkypeError::protocol("Error while connecting to Live: redirect without Location")
        })?;
        parse_redirect_tokens(location)
    }

    /// Step 8: exchange the access token for a skype token.
    async fn exchange_for_session(
        &self,
        transport: &dyn Transport,
        username: &str,
        password: &str,
        tokens: LiveTokens,
    ) -> SkypeResult<Session> {
        let lowered = username.to_lowercase();
        let url = self.endpoints.session_login_url();
        debug!("Sending post request to: {}", url);

        let response = transport
            .execute(HttpRequest::post(url).form([
                ("scopes", "client".to_string()),
                ("clientVersion", self.client_version.clone()),
                ("username", lowered.clone()),
                ("passwordHash", password_hash(username, password)),
                ("access_token", tokens.access_token.clone()),
                ("site_name", "lw".to_string()),
            ]))
            .await?;
        response.expect(&[200], "While logging in")?;

        let login_data: Value = response.json()?;
        let skype_token = login_data
            .get("skypetoken")
            .and_then(Value::as_str)
            .ok_or_else(|| SkypeError::protocol_with_payload("No skypetoken in login response", response.body.clone()))?;
        let skype_id = login_data
            .get("skypeid")
            .and_then(Value::as_str)
            .ok_or_else(|| SkypeError::protocol_with_payload("No skypeid in login response", response.body.clone()))?;

        Ok(Session::new(&lowered, skype_id, tokens, skype_token))
    }
}

#[async_trait]
impl Authenticator for LiveAuthenticator {
    async fn authenticate(
        &self,
        transport: &dyn Transport,
        username: &str,
        password: &str,
    ) -> SkypeResult<Session> {
        info!("Authenticating {} against Live", username.to_lowercase());
        let tokens = self.fetch_live_tokens(transport, username, password).await?;
        let session = self
            .exchange_for_session(transport, username, password, tokens)
            .await?;
        info!("Obtained skype token for {}", session.skype_id);
        Ok(session)
    }
}

/// `base64(md5("{username}\nskyper\n{password}"))` with the username lowercased.
///
/// Legacy scheme the login endpoint requires; reproduce byte for byte.
pub fn password_hash(username: &str, password: &str) -> String {
    let input = format!("{}\nskyper\n{}", username.to_lowercase(), password);
    BASE64.encode(Md5::digest(input.as_bytes()))
}

static INPUT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<input\b([^>]*)>").expect("input tag pattern is valid"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern is valid")
});

/// Attributes of one tag, as HTML reads them: case-insensitive names,
/// quoted or bare values, valueless boolean attributes.
fn tag_attributes(attributes: &str) -> Vec<(String, Option<String>)> {
    ATTRIBUTE
        .captures_iter(attributes)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4));
            (c[1].to_ascii_lowercase(), value.map(|v| decode_entities(v.as_str())))
        })
        .collect()
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Find the value of the first `<input name="PPFT" value="...">` tag.
///
/// The page as a whole is not well-formed markup, so each `<input ...>`
/// tag is cut out and its attributes read on their own.
pub fn find_ppft(body: &str) -> Option<String> {
    INPUT_TAG.captures_iter(body).find_map(|tag| {
        let attributes = tag_attributes(&tag[1]);
        let named_ppft = attributes
            .iter()
            .any(|(name, value)| name == "name" && value.as_deref() == Some("PPFT"));
        if !named_ppft {
            return None;
        }
        attributes
            .into_iter()
            .find(|(name, _)| name == "value")
            .and_then(|(_, value)| value)
    })
}

/// The `urlPost:'...'` assignment embedded in the login page, if any.
pub fn find_post_url(body: &str) -> Option<String> {
    let start = body.find(URL_POST_MARKER)? + URL_POST_MARKER.len();
    let end = start + body[start..].find('\'')?;
    Some(body[start..end].to_string())
}

/// The `sErrTxt:'...'` value, with `\'` escapes kept in place.
pub fn extract_error_text(body: &str) -> Option<String> {
    let start = body.find(ERROR_TEXT_MARKER)? + ERROR_TEXT_MARKER.len();
    let mut escaped = false;
    for (i, c) in body[start..].char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => return Some(body[start..start + i].to_string()),
            _ => {}
        }
    }
    None
}

/// Map a non-redirect login response to exactly one error.
pub fn classify_login_failure(body: &str) -> SkypeError {
    let Some(message) = extract_error_text(body) else {
        return CredentialError::SuspiciousLogin(
            "Error while connecting to Live: not redirected, no reason given".to_string(),
        )
        .into();
    };

    let lowered = message.to_lowercase();
    if (message.contains("account") || message.contains("password")) && message.contains("incorrect") {
        CredentialError::WrongPassword(message).into()
    } else if lowered.contains("account doesn't exist") || lowered.contains("account doesn\\'t exist") {
        CredentialError::AccountNotFound(message).into()
    } else {
        SkypeError::protocol_with_payload(format!("Error while connecting to Live: {}", message), body)
    }
}

fn redirect_param<'a>(location: &'a str, name: &str) -> Option<&'a str> {
    location
        .split(&['?', '#', '&'][..])
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
}

fn decode_param(raw: &str) -> SkypeResult<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| SkypeError::protocol(format!("Undecodable redirect parameter: {}", e)))
}

/// Pull the tokens out of the success redirect's `Location`.
pub fn parse_redirect_tokens(location: &str) -> SkypeResult<LiveTokens> {
    let access_token = redirect_param(location, "access_token").ok_or_else(|| {
        SkypeError::protocol_with_payload(
            "Error while connecting to Live: access token not found",
            location,
        )
    })?;

    let refresh_token = redirect_param(location, "refresh_token")
        .map(decode_param)
        .transpose()?;
    let expires_in = redirect_param(location, "expires_in").and_then(|v| v.parse().ok());

    Ok(LiveTokens {
        access_token: decode_param(access_token)?,
        refresh_token,
        expires_in,
    })
}
