//! The per-request context record.
//!
//! A [`SystemContext`] is an owned bundle of request metadata. Every text
//! field is an owned `String`, so `Clone` yields a fully independent copy:
//! mutating a clone never shows through to the original and vice versa.
//! That property is what makes capture-by-value across threads sound.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Generates a fresh request identifier: a v4 UUID without hyphens.
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Per-request context carrying caller identity and request metadata.
///
/// `create_time` is fixed at construction and has no setter. `request_id`
/// is stable once materialized, either through [`set_request_id`] or the
/// lazy path in [`request_id_or_generate`].
///
/// [`set_request_id`]: SystemContext::set_request_id
/// [`request_id_or_generate`]: SystemContext::request_id_or_generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContext {
    client_ip: Option<String>,
    user_id: Option<String>,
    username: Option<String>,
    request_id: Option<String>,
    user_agent: Option<String>,
    request_path: Option<String>,
    request_method: Option<String>,
    request_time: Option<DateTime<Utc>>,
    create_time: DateTime<Utc>,
}

impl SystemContext {
    /// Creates an empty record stamped with the current `create_time`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_ip: None,
            user_id: None,
            username: None,
            request_id: None,
            user_agent: None,
            request_path: None,
            request_method: None,
            request_time: None,
            create_time: Utc::now(),
        }
    }

    /// Creates the record used when a thread has no context: empty fields,
    /// with both `request_time` and `create_time` set to now.
    #[must_use]
    pub fn create_default() -> Self {
        let mut ctx = Self::new();
        ctx.request_time = Some(ctx.create_time);
        ctx
    }

    // -- builders -----------------------------------------------------------

    #[must_use]
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_request_path(mut self, request_path: impl Into<String>) -> Self {
        self.request_path = Some(request_path.into());
        self
    }

    #[must_use]
    pub fn with_request_method(mut self, request_method: impl Into<String>) -> Self {
        self.request_method = Some(request_method.into());
        self
    }

    #[must_use]
    pub fn with_request_time(mut self, request_time: DateTime<Utc>) -> Self {
        self.request_time = Some(request_time);
        self
    }

    // -- getters ------------------------------------------------------------

    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the request id if one has been materialized. Never generates.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    #[must_use]
    pub fn request_path(&self) -> Option<&str> {
        self.request_path.as_deref()
    }

    #[must_use]
    pub fn request_method(&self) -> Option<&str> {
        self.request_method.as_deref()
    }

    #[must_use]
    pub fn request_time(&self) -> Option<DateTime<Utc>> {
        self.request_time
    }

    #[must_use]
    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    // -- setters ------------------------------------------------------------

    pub fn set_client_ip(&mut self, client_ip: impl Into<String>) {
        self.client_ip = Some(client_ip.into());
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.user_agent = Some(user_agent.into());
    }

    pub fn set_request_path(&mut self, request_path: impl Into<String>) {
        self.request_path = Some(request_path.into());
    }

    pub fn set_request_method(&mut self, request_method: impl Into<String>) {
        self.request_method = Some(request_method.into());
    }

    pub fn set_request_time(&mut self, request_time: DateTime<Utc>) {
        self.request_time = Some(request_time);
    }

    /// Returns the request id, generating and storing one first if absent.
    ///
    /// Returns `(id, generated)` where `generated` is true only on the call
    /// that created the id.
    pub fn request_id_or_generate(&mut self) -> (&str, bool) {
        let generated = self.request_id.is_none();
        let id = self.request_id.get_or_insert_with(generate_request_id);
        (id.as_str(), generated)
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SystemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(value: Option<&str>) -> &str {
            value.unwrap_or("null")
        }
        write!(
            f,
            "SystemContext{{clientIp='{}', userId='{}', username='{}', requestId='{}', requestPath='{}'}}",
            field(self.client_ip()),
            field(self.user_id()),
            field(self.username()),
            field(self.request_id()),
            field(self.request_path()),
        )
    }
}
