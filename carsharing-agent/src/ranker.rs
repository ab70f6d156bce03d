//! Vehicle ranking for availability results.
//!
//! Narrows the bookees around a location down to the few worth offering:
//! only bookees with a booking proposal for the requested window qualify,
//! and the survivors are ordered by a policy that depends on how long the
//! booking is.

use std::collections::HashSet;

use serde::Serialize;

use crate::cantamen::{BookeeId, BookingProposal, PointOfInterest, UpstreamBookee};

/// Bookings shorter than this many hours favour proximity.
pub const SHORT_BOOKING_HOURS: i64 = 3;

/// A small car this close beats an extra-small one farther away.
pub const CONVENIENCE_DISTANCE: f64 = 200.0;

/// Maximum number of vehicles returned by [`rank`].
pub const MAX_RANKED: usize = 5;

/// Maximum number of vehicles returned by [`for_logging`].
pub const MAX_LOGGED: usize = 15;

/// Vehicle size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    ExtraSmall,
    Small,
    Medium,
    MediumElectric,
    Large,
    ExtraLarge,
}

impl SizeClass {
    pub const ALL: [SizeClass; 6] = [
        SizeClass::ExtraSmall,
        SizeClass::Small,
        SizeClass::Medium,
        SizeClass::MediumElectric,
        SizeClass::Large,
        SizeClass::ExtraLarge,
    ];

    /// Parse an upstream `bookeeType.name` label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "XS" => Some(SizeClass::ExtraSmall),
            "S" => Some(SizeClass::Small),
            "M" => Some(SizeClass::Medium),
            "M (Elektro)" => Some(SizeClass::MediumElectric),
            "L" => Some(SizeClass::Large),
            "XL" => Some(SizeClass::ExtraLarge),
            _ => None,
        }
    }

    /// The upstream label.
    pub fn label(self) -> &'static str {
        match self {
            SizeClass::ExtraSmall => "XS",
            SizeClass::Small => "S",
            SizeClass::Medium => "M",
            SizeClass::MediumElectric => "M (Elektro)",
            SizeClass::Large => "L",
            SizeClass::ExtraLarge => "XL",
        }
    }

    /// Ranking priority; lower is preferred. Smaller cars are cheaper.
    pub fn priority(self) -> u8 {
        match self {
            SizeClass::ExtraSmall => 1,
            SizeClass::Small => 2,
            SizeClass::Medium | SizeClass::MediumElectric => 3,
            SizeClass::Large => 4,
            SizeClass::ExtraLarge => 5,
        }
    }
}

/// A bookable vehicle with the distance of the place it is parked at.
///
/// Serializes as the upstream bookee object with a `distance` field added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    #[serde(flatten)]
    pub bookee: UpstreamBookee,
    pub distance: f64,
}

/// Errors from ranking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    /// The upstream reported a size class the ranking table does not know
    #[error("unknown size class {label:?} on bookee {bookee}")]
    UnknownSizeClass { bookee: BookeeId, label: String },

    /// The bookee came without an expanded `bookeeType`
    #[error("bookee {0} has no size class")]
    MissingSizeClass(BookeeId),
}

/// Bookable vehicles in upstream order: flattened, then filtered by proposal.
fn bookable<'a>(
    poi: &'a [PointOfInterest],
    proposals: &[BookingProposal],
) -> impl Iterator<Item = Vehicle> + 'a {
    let available: HashSet<BookeeId> = proposals.iter().map(|p| p.bookee_id.clone()).collect();

    poi.iter()
        .flat_map(|entry| entry.places.iter())
        .flat_map(|place| {
            place.bookees.iter().map(move |bookee| Vehicle {
                bookee: bookee.clone(),
                distance: place.distance,
            })
        })
        .filter(move |vehicle| available.contains(&vehicle.bookee.id))
}

fn size_class(bookee: &UpstreamBookee) -> Result<SizeClass, RankError> {
    let label = bookee
        .size_label()
        .ok_or_else(|| RankError::MissingSizeClass(bookee.id.clone()))?;

    SizeClass::from_label(label).ok_or_else(|| RankError::UnknownSizeClass {
        bookee: bookee.id.clone(),
        label: label.to_string(),
    })
}

/// Sort tier for short bookings.
///
/// Extra-small and small cars within the convenience distance come first
/// (extra-small ahead), then the farther extra-small and small cars, then
/// every other class by priority.
fn proximity_tier(class: SizeClass, distance: f64) -> u8 {
    let near = distance <= CONVENIENCE_DISTANCE;
    match (class, near) {
        (SizeClass::ExtraSmall, true) => 0,
        (SizeClass::Small, true) => 1,
        (SizeClass::ExtraSmall, false) => 2,
        (SizeClass::Small, false) => 3,
        (other, _) => 2 + other.priority(),
    }
}

/// Rank bookable vehicles for a booking of `duration_hours` whole hours.
///
/// Bookings shorter than [`SHORT_BOOKING_HOURS`] are ordered by
/// `(proximity tier, distance)`, longer ones by size-class priority only.
/// Both sorts are stable. At most [`MAX_RANKED`] vehicles are returned.
///
/// Fails if a bookable vehicle has a missing or unknown size class.
pub fn rank(
    poi: &[PointOfInterest],
    proposals: &[BookingProposal],
    duration_hours: i64,
) -> Result<Vec<Vehicle>, RankError> {
    let mut classified = bookable(poi, proposals)
        .map(|vehicle| Ok((size_class(&vehicle.bookee)?, vehicle)))
        .collect::<Result<Vec<_>, RankError>>()?;

    if duration_hours < SHORT_BOOKING_HOURS {
        classified.sort_by(|(class_a, a), (class_b, b)| {
            proximity_tier(*class_a, a.distance)
                .cmp(&proximity_tier(*class_b, b.distance))
                .then(a.distance.total_cmp(&b.distance))
        });
    } else {
        // Longer bookings are dominated by price, which tracks size
        classified.sort_by_key(|(class, _)| class.priority());
    }

    Ok(classified
        .into_iter()
        .take(MAX_RANKED)
        .map(|(_, vehicle)| vehicle)
        .collect())
}

/// The first [`MAX_LOGGED`] bookable vehicles in upstream order.
///
/// Diagnostic view only; size classes are not interpreted.
pub fn for_logging(poi: &[PointOfInterest], proposals: &[BookingProposal]) -> Vec<Vehicle> {
    bookable(poi, proposals).take(MAX_LOGGED).collect()
}
