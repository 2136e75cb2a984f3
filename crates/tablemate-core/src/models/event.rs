use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub city: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub registered: u32,
}

impl Event {
    pub fn is_full(&self) -> bool {
        self.capacity.map(|cap| self.registered >= cap).unwrap_or(false)
    }

    /// Registration is open until the deadline, or until the event starts
    /// when no deadline is set.
    pub fn is_registration_open(&self, now: DateTime<Utc>) -> bool {
        let closes_at = self.registration_deadline.unwrap_or(self.starts_at);
        now < closes_at && !self.is_full()
    }
}

/// Body of `POST /events/{id}/register`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Waitlisted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: i64,
    pub event_id: i64,
    pub status: RegistrationStatus,
    /// Set for team registrations until the partner accepts.
    #[serde(default)]
    pub invitation_token: Option<String>,
}
