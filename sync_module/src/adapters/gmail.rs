//! Gmail REST API (v1) as the labelled thread source.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

use reconcile_module::ThreadRecord;

use super::ThreadSource;
use crate::error::{AuthError, SyncError};
use crate::google_auth::CredentialProvider;

/// Thread source backed by one Gmail mailbox (`users/me`).
pub struct GmailThreadSource {
    auth: Box<dyn CredentialProvider>,
    base_url: String,
    client: Client,
    /// Label name to label id, filled on first use.
    label_ids: RwLock<HashMap<String, String>>,
}

impl GmailThreadSource {
    pub fn new(auth: Box<dyn CredentialProvider>, base_url: impl Into<String>) -> Self {
        Self {
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            label_ids: RwLock::new(HashMap::new()),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{}", self.base_url, path)
    }

    /// Sends an authorized request, retrying once with a new token on 401.
    fn send(
        &self,
        what: &str,
        build: impl Fn(&str) -> RequestBuilder,
    ) -> Result<Response, SyncError> {
        let token = self.auth.access_token()?;
        let mut response = build(&token).send()?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("access token rejected for {}; retrying with a new one", what);
            self.auth.invalidate();
            let token = self.auth.access_token()?;
            response = build(&token).send()?;
        }
        check_status(response, what)
    }

    /// Resolves a label name such as `gtd/next-action` to its id.
    pub fn label_id(&self, name: &str) -> Result<String, SyncError> {
        if let Some(id) = self
            .label_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(id.clone());
        }

        let url = self.api_url("labels");
        let labels: LabelsListResponse = self
            .send("labels", |token| self.client.get(&url).bearer_auth(token))?
            .json()?;

        let mut cache = self.label_ids.write().unwrap_or_else(PoisonError::into_inner);
        for label in labels.labels.unwrap_or_default() {
            cache.insert(label.name, label.id);
        }
        cache
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("label \"{}\"", name)))
    }

    fn list_thread_ids(&self, label_id: &str) -> Result<Vec<String>, SyncError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?labelIds={}",
                self.api_url("threads"),
                urlencoding::encode(label_id)
            );
            if let Some(token) = page_token.as_deref() {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let page: ThreadsListResponse = self
                .send("threads", |token| self.client.get(&url).bearer_auth(token))?
                .json()?;
            ids.extend(page.threads.unwrap_or_default().into_iter().map(|t| t.id));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<GmailThread, SyncError> {
        let url = format!(
            "{}?format=metadata&metadataHeaders=Subject",
            self.api_url(&format!("threads/{}", urlencoding::encode(thread_id)))
        );
        let what = format!("thread {}", thread_id);
        Ok(self
            .send(&what, |token| self.client.get(&url).bearer_auth(token))?
            .json()?)
    }
}

impl ThreadSource for GmailThreadSource {
    fn list_labelled_threads(&self, label: &str) -> Result<Vec<ThreadRecord>, SyncError> {
        let label_id = self.label_id(label)?;
        let ids = self.list_thread_ids(&label_id)?;
        debug!("Found {} threads labelled {}", ids.len(), label);

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_thread(&id) {
                Ok(thread) => threads.push(thread.to_record()),
                // Deleted between listing and fetching; it is no longer labelled.
                Err(err) if err.is_not_found() => warn!("skipping vanished thread {}", id),
                Err(err) => return Err(err),
            }
        }
        Ok(threads)
    }

    fn remove_label(&self, thread_id: &str, label: &str) -> Result<(), SyncError> {
        let label_id = self.label_id(label)?;
        let url = self.api_url(&format!("threads/{}/modify", urlencoding::encode(thread_id)));
        let body = ModifyThreadRequest {
            add_label_ids: Vec::new(),
            remove_label_ids: vec![label_id],
        };
        let what = format!("thread {}", thread_id);
        self.send(&what, |token| {
            self.client.post(&url).bearer_auth(token).json(&body)
        })?;
        Ok(())
    }
}

fn check_status(response: Response, what: &str) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    // 403 doubles as Gmail's quota error; only the rest are credential problems.
    let rate_limited =
        body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded");
    match status.as_u16() {
        404 => Err(SyncError::not_found(what)),
        401 => Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        }
        .into()),
        403 if !rate_limited => Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        }
        .into()),
        code => Err(SyncError::Http { status: code, body }),
    }
}

// ============================================================================
// Gmail API types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LabelsListResponse {
    pub labels: Option<Vec<GmailLabel>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailLabel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadsListResponse {
    /// Absent when no thread carries the label.
    pub threads: Option<Vec<ThreadSummary>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailThread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<GmailMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
struct ModifyThreadRequest {
    #[serde(rename = "addLabelIds")]
    add_label_ids: Vec<String>,
    #[serde(rename = "removeLabelIds")]
    remove_label_ids: Vec<String>,
}

impl GmailMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }
}

impl GmailThread {
    /// Subject and link come from the first message; an empty thread keeps
    /// `first_message_id` unset so the reconciler can reject it.
    pub fn to_record(&self) -> ThreadRecord {
        let first = self.messages.first();
        ThreadRecord {
            thread_id: self.id.clone(),
            subject: first.and_then(|m| m.header("Subject")).map(str::to_string),
            first_message_id: first.map(|m| m.id.clone()),
        }
    }
}
