//! Media requests and the open/closed lifecycle.

pub mod manager;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub use manager::LifecycleManager;

/// Status reported for records whose label was never set.
pub const DEFAULT_STATUS: &str = "Pending";

/// The two partitions a record can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSet {
    Open,
    Closed,
}

impl RequestSet {
    /// The set a transition out of `self` lands in.
    pub fn other(self) -> Self {
        match self {
            RequestSet::Open => RequestSet::Closed,
            RequestSet::Closed => RequestSet::Open,
        }
    }

    /// Collection name used by persistent stores.
    pub fn collection(self) -> &'static str {
        match self {
            RequestSet::Open => "requests",
            RequestSet::Closed => "closed_requests",
        }
    }
}

impl fmt::Display for RequestSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestSet::Open => write!(f, "open"),
            RequestSet::Closed => write!(f, "closed"),
        }
    }
}

/// A persisted media request, shaped the same in both sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub id: i64,
    pub name: String,
    pub media: String,
    pub title: String,
    pub author: Option<String>,
    #[serde(rename = "mediaLink")]
    pub media_link: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl MediaRequest {
    /// Status label with the implicit default applied.
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or(DEFAULT_STATUS)
    }

    /// Timestamp a set is ordered by: `created_at` for open, `closed_at` for closed.
    pub fn sort_key(&self, set: RequestSet) -> DateTime<Utc> {
        match set {
            RequestSet::Open => self.created_at,
            RequestSet::Closed => self.closed_at.unwrap_or(self.created_at),
        }
    }
}

/// Field changes stamped on a record as it moves between sets.
///
/// Stores apply it to the record they hold at the moment of the move, so a
/// relabel that landed just before is never lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Replaces the label when set; `None` keeps the current one.
    pub status: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn apply(&self, record: &mut MediaRequest) {
        if let Some(status) = &self.status {
            record.status = Some(status.clone());
        }
        record.closed_at = self.closed_at;
    }
}

/// Submission body for a new request.
///
/// Deserialization is lenient (every field optional) so a missing field is
/// reported as a validation failure rather than a JSON error.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub media: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, rename = "mediaLink")]
    #[validate(custom(function = "not_blank"))]
    pub media_link: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

// `custom` validators only run on `Some`, so absence is checked in `into_draft`.
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl NewRequest {
    /// Validate and convert into the fields a store persists.
    pub fn into_draft(self) -> Result<RequestDraft, ValidationError> {
        if let Err(errors) = self.validate() {
            let mut err = ValidationError::new("required_field_blank");
            for field in errors.field_errors().keys() {
                err.add_param(field.to_string().into(), &true);
            }
            return Err(err);
        }

        match (self.name, self.media, self.title, self.media_link) {
            (Some(name), Some(media), Some(title), Some(media_link)) => Ok(RequestDraft {
                name,
                media,
                title,
                author: blank_to_none(self.author),
                media_link,
                image: blank_to_none(self.image),
            }),
            _ => Err(ValidationError::new("required_field_missing")),
        }
    }
}

/// Validated submission fields, before storage assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDraft {
    pub name: String,
    pub media: String,
    pub title: String,
    pub author: Option<String>,
    pub media_link: String,
    pub image: Option<String>,
}

impl RequestDraft {
    pub fn into_request(self, id: i64, created_at: DateTime<Utc>) -> MediaRequest {
        MediaRequest {
            id,
            name: self.name,
            media: self.media,
            title: self.title,
            author: self.author,
            media_link: self.media_link,
            image: self.image,
            status: None,
            created_at,
            closed_at: None,
        }
    }
}
