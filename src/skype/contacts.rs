// Contact directory
// Owns every known contact and pending contact request, and the rules for
// merging full, partial and blocklist payloads into them.

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use super::error::{SkypeError, SkypeResult};
use crate::models::{Contact, ContactRequest, OFFLINE_STATUS};

static PHONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[0-9]+$").expect("phone number pattern is valid"));
static MRI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+:").expect("MRI prefix pattern is valid"));

/// Characters stripped from display names before they are stored.
const UNSAFE_NAME_CHARS: [char; 6] = ['&', '<', '>', '/', '"', ','];

/// Where the directory fetches a contact it has not seen yet.
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn load_contact(&self, contact_id: &str) -> SkypeResult<Value>;
}

pub fn sanitize_display_name(name: &str) -> String {
    name.chars().filter(|c| !UNSAFE_NAME_CHARS.contains(c)).collect()
}

/// `8:live:bob` -> `live:bob`, `4:+15551234` -> `+15551234`
pub fn username_from_id(person_id: &str) -> String {
    MRI_PREFIX.replace(person_id, "").into_owned()
}

fn string_field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn set_if_present(target: &mut Option<String>, obj: &Value, key: &str) {
    if let Some(value) = string_field(obj, key) {
        *target = Some(value.to_string());
    }
}

fn fill_if_unset(target: &mut Option<String>, obj: &Value, key: &str) {
    if target.is_none() {
        set_if_present(target, obj, key);
    }
}

/// Gender arrives as a number, a string or a boolean depending on the service.
fn normalize_gender(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn flatten_phones(phones: &[Value]) -> String {
    phones
        .iter()
        .filter_map(|phone| match phone.get("number") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Contact {
    pub fn new(person_id: &str) -> Self {
        let username = username_from_id(person_id);
        Self {
            person_id: person_id.to_string(),
            is_phone_contact: PHONE_NUMBER.is_match(&username),
            username,
            display_name: None,
            first_name: None,
            last_name: None,
            avatar_url: None,
            mood: None,
            rich_mood: None,
            country: None,
            city: None,
            phone_numbers: None,
            gender: None,
            language: None,
            birthday: None,
            contact_type: None,
            auth_certificate: None,
            is_authorized: false,
            is_blocked: false,
            status: OFFLINE_STATUS.to_string(),
            endpoints: Vec::new(),
        }
    }

    /// A contact known only from the blocklist.
    pub fn blocked_stub(person_id: &str) -> Self {
        let mut contact = Self::new(person_id);
        contact.is_blocked = true;
        contact
    }

    /// Build a contact from a contacts-endpoint entry keyed by `person_id`.
    pub fn from_entry(entry: &Value) -> SkypeResult<Self> {
        let person_id = string_field(entry, "person_id").ok_or_else(|| {
            SkypeError::protocol_with_payload("Contact entry without person_id", entry.to_string())
        })?;
        Ok(Self::from_payload(person_id, entry))
    }

    /// Build a contact for a known id; phone contacts carry no profile.
    pub fn from_payload(person_id: &str, payload: &Value) -> Self {
        let mut contact = Self::new(person_id);
        let with_profile = !contact.is_phone_contact;
        contact.merge(payload, with_profile);
        contact
    }

    /// Merge an incremental update. Applying the same payload twice is a no-op.
    pub fn update(&mut self, payload: &Value) {
        self.merge(payload, true);
    }

    fn merge(&mut self, payload: &Value, with_profile: bool) {
        if let Some(authorized) = payload.get("authorized").and_then(Value::as_bool) {
            self.is_authorized = authorized;
        }
        if let Some(blocked) = payload.get("blocked").and_then(Value::as_bool) {
            self.is_blocked = blocked;
        }
        if let Some(name) = string_field(payload, "display_name") {
            self.set_display_name(name);
        }
        set_if_present(&mut self.avatar_url, payload, "avatar_url");
        set_if_present(&mut self.mood, payload, "mood");
        set_if_present(&mut self.contact_type, payload, "type");
        set_if_present(&mut self.auth_certificate, payload, "auth_certificate");

        if let Some(location) = payload
            .get("locations")
            .and_then(Value::as_array)
            .and_then(|locations| locations.first())
        {
            set_if_present(&mut self.country, location, "country");
            set_if_present(&mut self.city, location, "city");
        }

        if with_profile {
            if let Some(profile) = payload.get("profile").filter(|p| p.is_object()) {
                self.update_profile(profile);
            }
        }

        self.ensure_display_name();
    }

    fn update_profile(&mut self, profile: &Value) {
        let name = profile.get("name").filter(|n| n.is_object());
        let first = name
            .and_then(|n| string_field(n, "first"))
            .or_else(|| string_field(profile, "firstname"));
        let last = name
            .and_then(|n| string_field(n, "surname"))
            .or_else(|| string_field(profile, "lastname"));
        if let Some(first) = first {
            self.first_name = Some(first.to_string());
        }
        if let Some(last) = last {
            self.last_name = Some(last.to_string());
        }

        if let Some(phones) = profile.get("phones").and_then(Value::as_array) {
            self.phone_numbers = Some(flatten_phones(phones));
        }
        if let Some(gender) = profile.get("gender").and_then(normalize_gender) {
            self.gender = Some(gender);
        }
        set_if_present(&mut self.language, profile, "language");
        set_if_present(&mut self.avatar_url, profile, "avatar_url");
        set_if_present(&mut self.birthday, profile, "birthday");

        if self.display_name.is_none() {
            if let Some(name) = string_field(profile, "displayname") {
                self.set_display_name(name);
            }
        }
        fill_if_unset(&mut self.mood, profile, "mood");
        fill_if_unset(&mut self.rich_mood, profile, "richMood");
        fill_if_unset(&mut self.country, profile, "country");
        fill_if_unset(&mut self.city, profile, "city");
    }

    fn set_display_name(&mut self, name: &str) {
        let sanitized = sanitize_display_name(name);
        if !sanitized.trim().is_empty() {
            self.display_name = Some(sanitized);
        }
    }

    fn ensure_display_name(&mut self) {
        if self.display_name.is_some() {
            return;
        }
        let computed = match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.person_id.clone(),
        };
        self.set_display_name(&computed);
        if self.display_name.is_none() {
            self.display_name = Some(sanitize_display_name(&self.person_id));
        }
    }
}

/// Counts from one full sync
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub blocked_stubs: usize,
    pub skipped: usize,
}

/// The single owner of contact state.
///
/// Readers share the lock; every mutation takes it exclusively. No lock is
/// held across a network call.
#[derive(Default)]
pub struct ContactDirectory {
    contacts: RwLock<HashMap<String, Contact>>,
    requests: Mutex<Vec<ContactRequest>>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add contacts and blocklist stubs we do not know yet. Known entries are
    /// left untouched.
    pub async fn full_sync(&self, contacts: &[Value], blocklist: &[Value]) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let mut directory = self.contacts.write().await;

        for entry in contacts {
            if entry.get("suggested").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(person_id) = string_field(entry, "person_id") else {
                warn!("Skipping contact entry without person_id: {}", entry);
                summary.skipped += 1;
                continue;
            };
            if !directory.contains_key(person_id) {
                debug!("Implementing contact: {}", person_id);
                directory.insert(person_id.to_string(), Contact::from_payload(person_id, entry));
                summary.added += 1;
            }
        }

        for entry in blocklist {
            let Some(mri) = string_field(entry, "mri") else {
                warn!("Skipping blocklist entry without mri: {}", entry);
                summary.skipped += 1;
                continue;
            };
            if !directory.contains_key(mri) {
                directory.insert(mri.to_string(), Contact::blocked_stub(mri));
                summary.blocked_stubs += 1;
            }
        }

        summary
    }

    /// Make sure `contact_id` is in the directory, loading it if needed.
    pub async fn ensure_loaded(&self, contact_id: &str, source: &dyn ContactSource) -> SkypeResult<()> {
        if self.contacts.read().await.contains_key(contact_id) {
            return Ok(());
        }

        debug!("Contact {} not in directory, loading it", contact_id);
        let payload = source.load_contact(contact_id).await?;
        let mut directory = self.contacts.write().await;
        directory
            .entry(contact_id.to_string())
            .or_insert_with(|| Contact::from_payload(contact_id, &payload));
        Ok(())
    }

    /// Merge a partial payload into a contact, loading it first on a miss.
    pub async fn apply_update(
        &self,
        contact_id: &str,
        payload: &Value,
        source: &dyn ContactSource,
    ) -> SkypeResult<Contact> {
        self.ensure_loaded(contact_id, source).await?;
        let mut directory = self.contacts.write().await;
        let contact = directory
            .get_mut(contact_id)
            .ok_or_else(|| SkypeError::NoSuchContact(contact_id.to_string()))?;
        contact.update(payload);
        Ok(contact.clone())
    }

    /// Merge a freshly fetched payload, creating the contact if it is new.
    pub async fn upsert(&self, contact_id: &str, payload: &Value) -> Contact {
        let mut directory = self.contacts.write().await;
        match directory.get_mut(contact_id) {
            Some(contact) => {
                contact.update(payload);
                contact.clone()
            }
            None => {
                let contact = Contact::from_payload(contact_id, payload);
                directory.insert(contact_id.to_string(), contact.clone());
                contact
            }
        }
    }

    pub async fn get_or_load(&self, contact_id: &str, source: &dyn ContactSource) -> SkypeResult<Contact> {
        self.ensure_loaded(contact_id, source).await?;
        self.get(contact_id)
            .await
            .ok_or_else(|| SkypeError::NoSuchContact(contact_id.to_string()))
    }

    pub async fn get(&self, contact_id: &str) -> Option<Contact> {
        self.contacts.read().await.get(contact_id).cloned()
    }

    pub async fn contains(&self, contact_id: &str) -> bool {
        self.contacts.read().await.contains_key(contact_id)
    }

    /// Returns false if the contact is unknown.
    pub async fn set_blocked(&self, contact_id: &str, blocked: bool) -> bool {
        self.modify(contact_id, |contact| contact.is_blocked = blocked).await
    }

    pub async fn set_status(&self, contact_id: &str, status: &str) -> bool {
        self.modify(contact_id, |contact| contact.status = status.to_string())
            .await
    }

    pub async fn record_endpoint(&self, contact_id: &str, endpoint_id: &str) -> bool {
        self.modify(contact_id, |contact| {
            if !contact.endpoints.iter().any(|e| e == endpoint_id) {
                contact.endpoints.push(endpoint_id.to_string());
            }
        })
        .await
    }

    async fn modify(&self, contact_id: &str, change: impl FnOnce(&mut Contact)) -> bool {
        match self.contacts.write().await.get_mut(contact_id) {
            Some(contact) => {
                change(contact);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contacts.read().await.is_empty()
    }

    /// Snapshot sorted by id.
    pub async fn contacts(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.contacts.read().await.values().cloned().collect();
        contacts.sort_by(|a, b| a.person_id.cmp(&b.person_id));
        contacts
    }

    /// Returns false for a request we already hold.
    pub async fn add_request(&self, request: ContactRequest) -> bool {
        let mut requests = self.requests.lock().await;
        if requests.contains(&request) {
            false
        } else {
            requests.push(request);
            true
        }
    }

    pub async fn requests(&self) -> Vec<ContactRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.contacts.write().await.clear();
        self.requests.lock().await.clear();
    }
}
