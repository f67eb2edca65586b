// Integration tests for the reqwest transport against a mock server

mod common;

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skylink::skype::{HttpRequest, ReqwestTransport, Transport};

fn transport() -> ReqwestTransport {
    common::setup_logging();
    ReqwestTransport::new(Duration::from_secs(5)).expect("client should build")
}

async fn redirecting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/landing", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_redirect_is_returned_when_not_following() {
    let server = redirecting_server().await;

    let response = transport()
        .execute(HttpRequest::get(format!("{}/start", server.uri())).no_redirects())
        .await
        .unwrap();

    assert!(response.is_redirect());
    assert_eq!(response.header("location"), Some(format!("{}/landing", server.uri()).as_str()));
}

#[tokio::test]
async fn test_redirects_are_followed_by_default() {
    let server = redirecting_server().await;

    let response = transport()
        .execute(HttpRequest::get(format!("{}/start", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "landed");
}

#[tokio::test]
async fn test_cookies_headers_and_text_body_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/users/self/contacts/bob/block"))
        .and(header("X-Skypetoken", "token"))
        .and(header("Cookie", "skypetoken_asm=asm; MSPOK=ok"))
        .and(body_string("reporterIp=127.0.0.1"))
        .respond_with(
            ResponseTemplate::new(201)
                .append_header("Set-Cookie", "first=1; path=/")
                .append_header("Set-Cookie", "second=2; path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = HttpRequest::put(format!("{}/users/self/contacts/bob/block", server.uri()))
        .header("X-Skypetoken", "token")
        .cookie("skypetoken_asm", "asm")
        .cookie("MSPOK", "ok")
        .text("reporterIp=127.0.0.1");
    let response = transport().execute(request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.cookie("second").as_deref(), Some("2"));
}

#[tokio::test]
async fn test_form_and_json_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string("login=alice&passwd=a+b%26c"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({"endpointFeatures": "Agent"})))
        .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    let form = HttpRequest::post(format!("{}/form", server.uri())).form([("login", "alice"), ("passwd", "a b&c")]);
    assert_eq!(transport.execute(form).await.unwrap().status, 200);

    let json = HttpRequest::post(format!("{}/json", server.uri())).json(json!({"endpointFeatures": "Agent"}));
    assert_eq!(transport.execute(json).await.unwrap().status, 201);
}

#[tokio::test]
async fn test_unreachable_host_is_a_transport_error() {
    let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
    let err = transport
        .execute(HttpRequest::get("http://127.0.0.1:9/unreachable"))
        .await
        .unwrap_err();
    assert!(matches!(err, skylink::SkypeError::Transport(_)));
}
