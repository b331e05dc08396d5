//! Request parameters for the C2 operations table (§4.2).

use callml::HttpMethod;

use crate::ids::Sid;
use crate::model::CallStatus;

#[derive(Clone, Debug)]
pub struct CreateCallParams {
    pub from: String,
    pub to: String,
    pub url: String,
    pub method: HttpMethod,
    pub status_callback: Option<String>,
    pub status_callback_method: HttpMethod,
    pub status_callback_events: Vec<CallStatus>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateCallParams {
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub status_callback: Option<String>,
    pub status: Option<CallStatus>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateConferenceParams {
    pub status: Option<crate::model::ConferenceStatus>,
}

#[derive(Clone, Debug, Default)]
pub struct ParticipantUpdate {
    pub muted: Option<bool>,
    pub hold: Option<bool>,
    pub hold_url: Option<String>,
    pub hold_method: Option<HttpMethod>,
    pub announce_url: Option<String>,
    pub announce_method: Option<HttpMethod>,
}

pub struct ProvisionNumberParams {
    pub phone_number: String,
    pub application_sid: Option<Sid>,
}

pub struct CreateApplicationParams {
    pub friendly_name: String,
    pub voice_url: String,
    pub voice_method: HttpMethod,
    pub status_callback: Option<String>,
    pub status_callback_method: HttpMethod,
}
