//! Data models for tablemate resources.
//!
//! - `Event`, `Registration`: dinner events and sign-ups (solo or team)
//! - `Profile`: the logged-in user
//! - `InvitationAcceptance`: result of joining a partner's team

pub mod event;
pub mod profile;

pub use event::{Event, Registration, RegistrationRequest, RegistrationStatus};
pub use profile::{InvitationAcceptance, Profile};
