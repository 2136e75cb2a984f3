//! Typed helpers for the tablemate resources.
//!
//! All of these go through `ApiClient::fetch`, so they share its session
//! refresh and retry behavior. Non-2xx responses surface as `ApiError`.

use anyhow::Result;
use tracing::info;

use super::ApiClient;
use crate::models::{Event, InvitationAcceptance, Profile, Registration, RegistrationRequest};

impl ApiClient {
    pub async fn fetch_profile(&self) -> Result<Profile> {
        self.get("/profile").await
    }

    pub async fn fetch_events(&self) -> Result<Vec<Event>> {
        self.get("/events").await
    }

    pub async fn fetch_event(&self, event_id: i64) -> Result<Event> {
        self.get(&format!("/events/{}", event_id)).await
    }

    /// Register the logged-in user alone.
    pub async fn register_solo(&self, event_id: i64) -> Result<Registration> {
        let body = RegistrationRequest { partner_email: None };
        let registration: Registration = self
            .post(&format!("/events/{}/register", event_id), &body)
            .await?;
        info!(event_id, registration_id = registration.id, "Registered solo");
        Ok(registration)
    }

    /// Register as a team; the partner receives an invitation to accept.
    pub async fn register_team(&self, event_id: i64, partner_email: &str) -> Result<Registration> {
        let body = RegistrationRequest {
            partner_email: Some(partner_email.to_string()),
        };
        let registration: Registration = self
            .post(&format!("/events/{}/register", event_id), &body)
            .await?;
        info!(event_id, registration_id = registration.id, "Registered team");
        Ok(registration)
    }

    pub async fn accept_invitation(&self, token: &str) -> Result<InvitationAcceptance> {
        self.post(&format!("/invitations/{}/accept", token), &serde_json::json!({}))
            .await
    }
}
