// Presence documents pushed by the messaging gateway
// Endpoint presence has an asserted shape; user presence is parsed leniently.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::error::{SkypeError, SkypeResult};
use crate::models::{EndpointPresence, OFFLINE_STATUS};

static ENDPOINT_PRESENCE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/users/([^/]+)/endpoints/\{([a-zA-Z0-9-]+)\}/").expect("endpoint presence pattern is valid")
});
static USER_PRESENCE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(?:users|contacts)/([^/]+)/presenceDocs/").expect("user presence pattern is valid")
});

/// Validate an `EndpointPresenceDoc` and pull out who and which endpoint.
///
/// Any deviation from the expected shape is a conformance error naming the
/// field that failed.
pub fn parse_endpoint_presence(resource: &Value) -> SkypeResult<EndpointPresence> {
    if resource.get("id").and_then(Value::as_str) != Some("messagingService") {
        return Err(SkypeError::conformance("resource.id", resource));
    }
    if resource.get("type").and_then(Value::as_str) != Some("EndpointPresenceDoc") {
        return Err(SkypeError::conformance("resource.type", resource));
    }

    let self_link = resource
        .get("selfLink")
        .and_then(Value::as_str)
        .ok_or_else(|| SkypeError::conformance("resourceLink", resource))?;
    let captures = ENDPOINT_PRESENCE_LINK
        .captures(self_link)
        .ok_or_else(|| SkypeError::conformance("resourceLink", resource))?;

    let object = |key: &str| resource.get(key).filter(|v| v.is_object()).cloned();
    Ok(EndpointPresence {
        user_id: captures[1].to_string(),
        endpoint_id: captures[2].to_string(),
        public_info: object("publicInfo"),
        private_info: object("privateInfo"),
    })
}

/// `(user id, status)` from a `UserPresenceDoc`.
pub fn parse_user_presence(resource: &Value, resource_link: Option<&str>) -> SkypeResult<(String, String)> {
    let user_id = [resource.get("selfLink").and_then(Value::as_str), resource_link]
        .into_iter()
        .flatten()
        .find_map(|link| USER_PRESENCE_LINK.captures(link).map(|c| c[1].to_string()))
        .ok_or_else(|| {
            SkypeError::protocol_with_payload("User presence without a user link", resource.to_string())
        })?;

    let status = resource
        .get("status")
        .and_then(Value::as_str)
        .or_else(|| resource.get("availability").and_then(Value::as_str))
        .unwrap_or(OFFLINE_STATUS)
        .to_string();

    Ok((user_id, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint_doc(self_link: &str) -> Value {
        json!({
            "id": "messagingService",
            "type": "EndpointPresenceDoc",
            "selfLink": self_link,
            "publicInfo": {"capabilities": "", "typ": "11", "skypeNameVersion": "908/1.30.0.128"},
            "privateInfo": {"epname": "laptop"}
        })
    }

    #[test]
    fn test_endpoint_presence_accepts_expected_shape() {
        let doc = endpoint_doc(
            "uri/v1/users/8:bob/endpoints/{0b0a1cd9-8a76-4fa0-a91a-7e5b9a1f0a3c}/presenceDocs/messagingService",
        );
        let presence = parse_endpoint_presence(&doc).unwrap();
        assert_eq!(presence.user_id, "8:bob");
        assert_eq!(presence.endpoint_id, "0b0a1cd9-8a76-4fa0-a91a-7e5b9a1f0a3c");
        assert_eq!(presence.private_info, Some(json!({"epname": "laptop"})));
    }

    #[test]
    fn test_endpoint_presence_names_failing_field() {
        let mut doc = endpoint_doc("uri/v1/users/8:bob/endpoints/{abc}/");
        doc["id"] = json!("other");
        assert!(matches!(
            parse_endpoint_presence(&doc),
            Err(SkypeError::Conformance { field, .. }) if field == "resource.id"
        ));

        let mut doc = endpoint_doc("uri/v1/users/8:bob/endpoints/{abc}/");
        doc["type"] = json!("UserPresenceDoc");
        assert!(matches!(
            parse_endpoint_presence(&doc),
            Err(SkypeError::Conformance { field, .. }) if field == "resource.type"
        ));

        let doc = endpoint_doc("uri/v1/users/8:bob/endpoints/abc/");
        let err = parse_endpoint_presence(&doc).unwrap_err();
        assert!(matches!(&err, SkypeError::Conformance { field, .. } if field == "resourceLink"));
        assert_eq!(err.payload(), Some(doc.to_string().as_str()));
    }

    #[test]
    fn test_user_presence() {
        let resource = json!({
            "id": "messagingService",
            "type": "UserPresenceDoc",
            "selfLink": "https://h/v1/users/ME/contacts/8:bob/presenceDocs/messagingService",
            "availability": "Online",
            "status": "Away"
        });
        let (user, status) = parse_user_presence(&resource, None).unwrap();
        assert_eq!(user, "8:bob");
        assert_eq!(status, "Away");

        let bare = json!({"type": "UserPresenceDoc"});
        let (user, status) =
            parse_user_presence(&bare, Some("https://h/v1/users/8:carol/presenceDocs/messagingService")).unwrap();
        assert_eq!(user, "8:carol");
        assert_eq!(status, OFFLINE_STATUS);

        assert!(parse_user_presence(&bare, None).is_err());
    }
}
