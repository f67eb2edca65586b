// Integration tests for push event handling after login

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

use skylink::models::Notification;
use skylink::skype::transport::Method;
use skylink::skype::{ErrorSource, MessageHandler, SkypeResult};
use skylink::SkypeClient;

fn frame(events: Vec<Value>) -> String {
    json!({ "eventMessages": events }).to_string()
}

fn new_message(resource: Value) -> Value {
    json!({
        "resourceType": "NewMessage",
        "resourceLink": "https://skype.test/v1/users/ME/conversations/8:bob/messages/1",
        "resource": resource
    })
}

fn blocked_update(contact_id: &str, flag: &str) -> Value {
    json!({
        "resourceType": "ConversationUpdate",
        "resourceLink": format!("https://skype.test/v1/users/ME/conversations/{}/properties", contact_id),
        "resource": {"properties": {"conversationblocked": flag}}
    })
}

async fn logged_in(
    frames: Vec<String>,
) -> (SkypeClient, Receiver<Notification>, Arc<ScriptedTransport>, Arc<RecordingErrorHandler>) {
    let transport = Arc::new(ScriptedTransport::new());
    script_login(&transport);
    script_bootstrap(&transport);
    let errors = Arc::new(RecordingErrorHandler::default());
    let (client, notifications) = scripted_client(
        transport.clone(),
        ScriptedPushConnector::with_frames(frames),
        errors.clone(),
    );
    client.login(USERNAME, PASSWORD).await.expect("login should succeed");
    (client, notifications, transport, errors)
}

async fn next(notifications: &mut Receiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

#[tokio::test]
async fn test_events_are_handled_in_order_and_errors_do_not_stop_the_loop() {
    let frames = vec![
        frame(vec![
            new_message(json!({
                "messagetype": "Text",
                "content": "hello alice",
                "from": "https://skype.test/v1/users/ME/contacts/8:bob",
                "conversationLink": "https://skype.test/v1/users/ME/conversations/8:bob",
                "imdisplayname": "Bob"
            })),
            new_message(json!({"content": "typed but untyped", "messagetype": null})),
        ]),
        "{this is not json".to_string(),
        frame(vec![
            json!({
                "resourceType": "UserPresence",
                "resource": {
                    "selfLink": "https://skype.test/v1/users/ME/contacts/8:bob/presenceDocs/messagingService",
                    "status": "Away"
                }
            }),
            json!({
                "resourceType": "EndpointPresence",
                "resource": {
                    "id": "messagingService",
                    "type": "EndpointPresenceDoc",
                    "selfLink": "https://skype.test/v1/users/8:bob/endpoints/no-braces/presenceDocs/messagingService"
                }
            }),
            json!({"resourceType": "CallEvent", "resource": {}}),
            blocked_update("8:carol", "TRUE"),
        ]),
    ];
    let (client, mut notifications, _transport, errors) = logged_in(frames).await;

    match next(&mut notifications).await {
        Notification::MessageReceived(message) => {
            assert_eq!(message.content, "hello alice");
            assert_eq!(message.sender_id.as_deref(), Some("8:bob"));
            assert_eq!(message.sender_name.as_deref(), Some("Bob"));
        }
        other => panic!("expected a message, got {:?}", other),
    }
    assert_eq!(
        next(&mut notifications).await,
        Notification::StatusChanged {
            user_id: "8:bob".to_string(),
            status: "Away".to_string()
        }
    );
    assert_eq!(
        next(&mut notifications).await,
        Notification::ContactBlocked {
            contact_id: "8:carol".to_string(),
            blocked: true
        }
    );

    let dispatch_errors = errors.from_source(ErrorSource::EventDispatch);
    assert_eq!(dispatch_errors.len(), 2, "{:?}", dispatch_errors);
    assert!(dispatch_errors[0].contains("Null type"));
    assert_eq!(dispatch_errors[1], "resourceLink did not conform to format expected");
    assert_eq!(errors.from_source(ErrorSource::DecodingFrame).len(), 1);

    let directory = client.directory();
    assert_eq!(directory.get("8:bob").await.unwrap().status, "Away");
    assert!(directory.get("8:carol").await.unwrap().is_blocked);
}

#[tokio::test]
async fn test_message_without_content_goes_to_plain_text_handler() {
    let frames = vec![frame(vec![new_message(json!({"id": "42", "messagetype": "RichText"}))])];
    let (_client, mut notifications, _transport, _errors) = logged_in(frames).await;

    match next(&mut notifications).await {
        Notification::MessageReceived(message) => {
            assert_eq!(message.message_type, "Text");
            assert_eq!(message.message_id.as_deref(), Some("42"));
        }
        other => panic!("expected a message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_endpoint_presence_is_recorded() {
    let frames = vec![frame(vec![json!({
        "resourceType": "EndpointPresence",
        "resource": {
            "id": "messagingService",
            "type": "EndpointPresenceDoc",
            "selfLink": "https://skype.test/v1/users/8:bob/endpoints/{5a0c-77e1}/presenceDocs/messagingService",
            "publicInfo": {"typ": "11"}
        }
    })])];
    let (client, mut notifications, _transport, _errors) = logged_in(frames).await;

    match next(&mut notifications).await {
        Notification::EndpointPresence(presence) => {
            assert_eq!(presence.user_id, "8:bob");
            assert_eq!(presence.endpoint_id, "5a0c-77e1");
            assert_eq!(presence.public_info, Some(json!({"typ": "11"})));
            assert_eq!(presence.private_info, None);
        }
        other => panic!("expected endpoint presence, got {:?}", other),
    }
    assert_eq!(
        client.directory().get("8:bob").await.unwrap().endpoints,
        vec!["5a0c-77e1".to_string()]
    );
}

#[tokio::test]
async fn test_conversation_update_loads_unknown_contact() {
    let transport_frames = vec![frame(vec![blocked_update("8:zed", "false")])];
    let transport = Arc::new(ScriptedTransport::new());
    script_login(&transport);
    script_bootstrap(&transport);
    transport.on(
        Method::Get,
        "/contacts/v1/users/live%3Aalice/contacts/8%3Azed",
        json_response(200, json!({"contacts": [{"person_id": "8:zed", "display_name": "Zed", "blocked": true}]})),
    );
    let errors = Arc::new(RecordingErrorHandler::default());
    let (client, mut notifications) = scripted_client(
        transport.clone(),
        ScriptedPushConnector::with_frames(transport_frames),
        errors.clone(),
    );
    client.login(USERNAME, PASSWORD).await.unwrap();

    assert_eq!(
        next(&mut notifications).await,
        Notification::ContactBlocked {
            contact_id: "8:zed".to_string(),
            blocked: false
        }
    );
    let zed = client.directory().get("8:zed").await.unwrap();
    assert_eq!(zed.display_name.as_deref(), Some("Zed"));
    assert!(!zed.is_blocked);
    assert_eq!(
        transport
            .requests_to(Method::Get, "/contacts/v1/users/live%3Aalice/contacts/8%3Azed")
            .len(),
        1
    );
}

struct CallHandler;

impl MessageHandler for CallHandler {
    fn handle(&self, message_type: &str, resource: &Value) -> SkypeResult<Option<Notification>> {
        Ok(Some(Notification::StatusChanged {
            user_id: resource["from"].as_str().unwrap_or_default().to_string(),
            status: message_type.to_string(),
        }))
    }
}

#[tokio::test]
async fn test_registered_message_handler_receives_its_type() {
    let transport = Arc::new(ScriptedTransport::new());
    script_login(&transport);
    script_bootstrap(&transport);
    let frames = vec![frame(vec![
        new_message(json!({"messagetype": "Event/Call", "content": "<partlist/>", "from": "8:bob"})),
        new_message(json!({"messagetype": "Event/Unknown", "content": "x"})),
        new_message(json!({"messagetype": "Text", "content": "after"})),
    ])];
    let (client, mut notifications) = scripted_client(
        transport,
        ScriptedPushConnector::with_frames(frames),
        Arc::new(RecordingErrorHandler::default()),
    );
    client.register_message_handler("Event/Call", CallHandler).await;
    client.login(USERNAME, PASSWORD).await.unwrap();

    assert_eq!(
        next(&mut notifications).await,
        Notification::StatusChanged {
            user_id: "8:bob".to_string(),
            status: "Event/Call".to_string()
        }
    );
    match next(&mut notifications).await {
        Notification::MessageReceived(message) => assert_eq!(message.content, "after"),
        other => panic!("expected the text message, got {:?}", other),
    }
}
