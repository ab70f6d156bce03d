//! casirest response DTOs.
//!
//! Only the fields this service interprets are typed. Everything else an
//! upstream object carries is kept in a flattened map so it survives the
//! round trip back to the agent client untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An upstream identifier.
///
/// casirest is not consistent about whether ids are JSON numbers or strings,
/// so both are accepted and compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamId::Number(n) => write!(f, "{n}"),
            UpstreamId::Text(s) => f.write_str(s),
        }
    }
}

/// Identifier of a bookee (vehicle).
pub type BookeeId = UpstreamId;

/// Session object returned by `POST /tokens?expand=customerId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Session id.
    pub id: UpstreamId,

    /// Customer the session belongs to.
    pub customer_id: UpstreamId,

    /// Remaining token fields (validity, flags, ...), passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry of `GET /pointsofinterest`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointOfInterest {
    /// Places at this point of interest.
    #[serde(default)]
    pub places: Vec<Place>,
}

/// A fixed location holding zero or more bookees.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Place {
    /// Distance from the requested coordinates, in upstream units.
    pub distance: f64,

    /// Vehicles parked here.
    #[serde(default)]
    pub bookees: Vec<UpstreamBookee>,
}

/// A shareable vehicle as reported by casirest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamBookee {
    pub id: BookeeId,

    /// Size class; only present when the query expands `bookeeType`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookee_type: Option<BookeeType>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpstreamBookee {
    /// The size-class label, if the bookee carries one.
    pub fn size_label(&self) -> Option<&str> {
        self.bookee_type.as_ref().map(|t| t.name.as_str())
    }
}

/// Expanded `bookeeType` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookeeType {
    /// Size-class label such as `"XS"` or `"M (Elektro)"`.
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry of `GET /bookingproposals`.
///
/// Only the bookee id is interpreted; a proposal means the bookee is free for
/// the requested window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingProposal {
    pub bookee_id: BookeeId,
}
