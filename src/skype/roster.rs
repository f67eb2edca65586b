// Contact list management for SkypeClient
// Profile, contact list loading and refresh, contact requests and actions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde_json::Value;

use super::contacts::{username_from_id, ContactSource, SyncSummary};
use super::error::{SkypeError, SkypeResult};
use super::transport::HttpRequest;
use super::SkypeClient;
use crate::models::{Contact, ContactRequest, Notification};

const REQUEST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a contact request `event_time`.
pub fn parse_event_time(raw: &str) -> SkypeResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, REQUEST_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)))
        .map_err(|e| SkypeError::Parse(format!("Bad event_time {:?}: {}", raw, e)))
}

fn parse_contact_request(item: &Value) -> SkypeResult<ContactRequest> {
    let text = |key: &str| item.get(key).and_then(Value::as_str);
    let sender = text("sender")
        .ok_or_else(|| SkypeError::Parse(format!("Contact request without sender: {}", item)))?;
    let event_time = text("event_time")
        .ok_or_else(|| SkypeError::Parse(format!("Contact request without event_time: {}", item)))?;

    Ok(ContactRequest {
        sent_time: parse_event_time(event_time)?,
        sender_id: sender.to_string(),
        greeting_message: text("greeting").unwrap_or_default().to_string(),
    })
}

fn json_array<'a>(object: &'a Value, key: &str) -> &'a [Value] {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

impl SkypeClient {
    /// Refresh display name and phone numbers of the logged-in user.
    pub async fn load_profile(&self) -> SkypeResult<()> {
        let response = self
            .execute_api(HttpRequest::get(self.config.endpoints.profile_url()))
            .await?;
        response.expect(&[200], "While loading profile")?;
        let profile: Value = response.json()?;

        let text = |key: &str| {
            profile
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        };
        let display_name = text("firstname").map(|first| match text("lastname") {
            Some(last) => format!("{} {}", first, last),
            None => first.to_string(),
        });
        let phones: Vec<&str> = ["phoneHome", "phoneMobile", "phoneOffice"]
            .into_iter()
            .filter_map(|key| text(key))
            .collect();

        if let Some(session) = self.session.write().await.as_mut() {
            if display_name.is_some() {
                session.display_name = display_name;
            }
            if !phones.is_empty() {
                session.phone_numbers = Some(phones.join(", "));
            }
        }
        Ok(())
    }

    async fn fetch_contact_list(&self) -> SkypeResult<Value> {
        let session = self.current_session().await?;
        let response = self
            .execute_api(HttpRequest::get(self.config.endpoints.contacts_url(&session.skype_id)))
            .await?;
        response.expect(&[200], "While loading contacts")?;
        let list: Value = response.json()?;
        if !list.get("contacts").map(Value::is_array).unwrap_or(false) {
            return Err(SkypeError::protocol_with_payload("Contact list without contacts", response.body));
        }
        Ok(list)
    }

    /// Full contact load: adds every contact and blocklist entry not yet known.
    pub async fn load_all_contacts(&self) -> SkypeResult<SyncSummary> {
        let list = self.fetch_contact_list().await?;
        let summary = self
            .directory
            .full_sync(json_array(&list, "contacts"), json_array(&list, "blocklist"))
            .await;
        info!(
            "Loaded contacts: {} added, {} blocked, {} skipped",
            summary.added, summary.blocked_stubs, summary.skipped
        );
        Ok(summary)
    }

    /// Fetch the list again and merge every entry into what we know.
    pub async fn update_contact_list(&self) -> SkypeResult<()> {
        let list = self.fetch_contact_list().await?;

        for entry in json_array(&list, "contacts") {
            if entry.get("suggested").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(id) = entry.get("person_id").and_then(Value::as_str) else {
                warn!("Skipping contact entry without person_id: {}", entry);
                continue;
            };
            debug!("Updating contact: {}", id);
            if let Err(e) = self.directory.apply_update(id, entry, self).await {
                warn!("Could not update contact {}: {}", id, e);
            }
        }

        self.directory
            .full_sync(&[], json_array(&list, "blocklist"))
            .await;
        Ok(())
    }

    /// Fetch pending contact requests and return the ones not seen before.
    pub async fn load_contact_requests(&self) -> SkypeResult<Vec<ContactRequest>> {
        let response = self
            .execute_api(HttpRequest::get(self.config.endpoints.contact_requests_url()))
            .await?;
        response.expect(&[200], "While loading authorization requests")?;
        let items: Vec<Value> = response.json()?;

        let mut added = Vec::new();
        for item in &items {
            let request = match parse_contact_request(item) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Could not parse contact request: {}", e);
                    continue;
                }
            };
            if self.directory.add_request(request.clone()).await {
                added.push(request);
            }
        }
        debug!("{} new contact requests", added.len());
        Ok(added)
    }

    /// Reload contact requests; with `notify`, announce new ones and refresh
    /// the contact list.
    pub async fn refresh_contact_requests(&self, notify: bool) -> SkypeResult<()> {
        let added = self.load_contact_requests().await?;
        if notify {
            for request in added {
                if self
                    .notification_tx
                    .send(Notification::ContactRequestReceived(request))
                    .await
                    .is_err()
                {
                    warn!("Notification receiver dropped");
                }
            }
            self.update_contact_list().await?;
        }
        Ok(())
    }

    /// Raw payload of one contact from the contacts service.
    pub async fn fetch_contact(&self, contact_id: &str) -> SkypeResult<Value> {
        let session = self.current_session().await?;
        let url = self.config.endpoints.contact_url(&session.skype_id, contact_id);
        let response = self.execute_api(HttpRequest::get(url)).await?;
        if response.status == 404 {
            return Err(SkypeError::NoSuchContact(contact_id.to_string()));
        }
        response.expect(&[200], "While loading contact")?;

        let payload: Value = response.json()?;
        match payload.get("contacts") {
            Some(Value::Array(contacts)) => contacts
                .first()
                .cloned()
                .ok_or_else(|| SkypeError::NoSuchContact(contact_id.to_string())),
            _ => Ok(payload),
        }
    }

    /// A contact from the directory, loaded from the service if unknown.
    pub async fn contact(&self, contact_id: &str) -> SkypeResult<Contact> {
        self.directory.get_or_load(contact_id, self).await
    }

    /// Re-fetch a contact and merge the result.
    pub async fn refresh_contact(&self, contact_id: &str) -> SkypeResult<Contact> {
        let payload = self.fetch_contact(contact_id).await?;
        Ok(self.directory.upsert(contact_id, &payload).await)
    }

    pub async fn authorize_contact(&self, contact_id: &str) -> SkypeResult<Contact> {
        let url = format!(
            "{}/accept",
            self.config.endpoints.contact_request_url(&username_from_id(contact_id))
        );
        let response = self.execute_api(HttpRequest::put(url)).await?;
        response.expect(&[200], "While authorizing contact")?;
        info!("Authorized {}", contact_id);
        self.refresh_contact(contact_id).await
    }

    pub async fn decline_contact(&self, contact_id: &str) -> SkypeResult<Contact> {
        let url = format!(
            "{}/decline",
            self.config.endpoints.contact_request_url(&username_from_id(contact_id))
        );
        let response = self.execute_api(HttpRequest::put(url)).await?;
        response.expect(&[201], "While declining contact request")?;
        info!("Declined contact request from {}", contact_id);
        self.refresh_contact(contact_id).await
    }

    pub async fn block_contact(&self, contact_id: &str, report_abuse: bool) -> SkypeResult<Contact> {
        let url = self
            .config
            .endpoints
            .contact_action_url(&username_from_id(contact_id), "block");
        let mut body = format!("reporterIp=127.0.0.1&uiVersion={}", self.config.client_version);
        if report_abuse {
            body.push_str("&reportAbuse=1");
        }
        let response = self.execute_api(HttpRequest::put(url).text(body)).await?;
        response.expect(&[201], "While blocking contact")?;
        info!("Blocked {}", contact_id);
        self.refresh_contact(contact_id).await
    }

    pub async fn unblock_contact(&self, contact_id: &str) -> SkypeResult<Contact> {
        let url = self
            .config
            .endpoints
            .contact_action_url(&username_from_id(contact_id), "unblock");
        let response = self.execute_api(HttpRequest::put(url)).await?;
        response.expect(&[201], "While unblocking contact")?;
        info!("Unblocked {}", contact_id);
        self.refresh_contact(contact_id).await
    }

    /// Ask `contact_id` to become a contact.
    pub async fn send_contact_request(&self, contact_id: &str, greeting: &str) -> SkypeResult<Contact> {
        let url = self
            .config
            .endpoints
            .contact_request_url(&username_from_id(contact_id));
        let body = format!("greeting={}", urlencoding::encode(greeting));
        let response = self.execute_api(HttpRequest::put(url).text(body)).await?;
        if response.status == 404 {
            return Err(SkypeError::NoSuchContact(contact_id.to_string()));
        }
        response.expect(&[200, 201], "While sending contact request")?;
        info!("Sent contact request to {}", contact_id);
        self.refresh_contact(contact_id).await
    }
}

#[async_trait]
impl ContactSource for SkypeClient {
    async fn load_contact(&self, contact_id: &str) -> SkypeResult<Value> {
        self.fetch_contact(contact_id).await
    }
}
