use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds UTC — the only instant type used internally.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)` of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open range of minutes since local midnight, `[start_min, end_min)`.
/// Weekly rules and override windows are stored this way; conversion to UTC
/// instants happens in `tz` for a concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_min: u16,
    pub end_min: u16,
}

impl TimeRange {
    pub fn new(start_min: u16, end_min: u16) -> Self {
        debug_assert!(start_min < end_min, "TimeRange start must be before end");
        Self { start_min, end_min }
    }

    pub fn is_valid(&self) -> bool {
        self.start_min < self.end_min && self.end_min <= 24 * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
    Completed,
    NoShow,
}

impl BookingStatus {
    /// Whether a booking in this status blocks the provider's time.
    pub fn occupies_time(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled
                | BookingStatus::Rejected
                | BookingStatus::Completed
                | BookingStatus::NoShow
        )
    }

    /// Lifecycle: pending → {confirmed, cancelled, rejected};
    /// confirmed → {cancelled, completed, no_show}; terminal states are final.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        match self {
            BookingStatus::Pending => matches!(
                next,
                BookingStatus::Confirmed | BookingStatus::Cancelled | BookingStatus::Rejected
            ),
            BookingStatus::Confirmed => matches!(
                next,
                BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow
            ),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<BookingStatus> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "rejected" => Some(BookingStatus::Rejected),
            "completed" => Some(BookingStatus::Completed),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }
}

/// An appointment. Buffers are snapshotted from the service at creation so
/// later service edits never retroactively change which time a booking blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub buffer_before_min: i64,
    pub buffer_after_min: i64,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
}

impl Booking {
    /// The time this booking actually blocks: `[start − buffer_before, end + buffer_after)`.
    pub fn occupied(&self) -> Span {
        Span::new(
            self.span.start - self.buffer_before_min * MINUTE_MS,
            self.span.end + self.buffer_after_min * MINUTE_MS,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_min: i64,
    pub buffer_before_min: i64,
    pub buffer_after_min: i64,
    pub min_notice_hours: i64,
    pub max_future_days: i64,
    pub max_capacity: u32,
    /// Providers assigned to this service, in assignment order.
    pub provider_ids: Vec<Ulid>,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min * MINUTE_MS
    }

    pub fn min_notice_ms(&self) -> Ms {
        self.min_notice_hours * HOUR_MS
    }

    pub fn horizon_ms(&self) -> Ms {
        self.max_future_days * DAY_MS
    }
}

/// A date-specific exception: either the whole day is blocked, or the window
/// replaces (never adds to) the weekly rules for that date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    pub is_available: bool,
    pub window: Option<TimeRange>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub name: Option<String>,
    /// IANA timezone the provider's weekly rules and overrides are expressed in.
    pub tz: Tz,
    /// Weekly recurring availability, indexed by day-of-week (0 = Sunday).
    pub weekly: [Vec<TimeRange>; 7],
    /// At most one override per date — upsert semantics.
    pub overrides: BTreeMap<NaiveDate, DateOverride>,
    /// All bookings (any status), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ProviderState {
    pub fn new(id: Ulid, name: Option<String>, tz: Tz) -> Self {
        Self {
            id,
            name,
            tz,
            weekly: Default::default(),
            overrides: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        self.bookings
            .iter()
            .position(|b| b.id == id)
            .map(|pos| self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose *occupied* interval (with buffers) overlaps the query
    /// window. The search window is widened by the buffer cap so the binary
    /// search over raw start times cannot skip a booking whose buffer reaches
    /// into the query.
    pub fn overlapping_bookings(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let pad = crate::limits::MAX_BUFFER_MIN * MINUTE_MS;
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end + pad);
        let query = *query;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.occupied().overlaps(&query))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated {
        id: Ulid,
        name: Option<String>,
        timezone: String,
    },
    ProviderUpdated {
        id: Ulid,
        name: Option<String>,
        timezone: String,
    },
    ProviderDeleted {
        id: Ulid,
    },
    ServiceCreated {
        id: Ulid,
        name: String,
        duration_min: i64,
        buffer_before_min: i64,
        buffer_after_min: i64,
        min_notice_hours: i64,
        max_future_days: i64,
        max_capacity: u32,
    },
    ServiceUpdated {
        id: Ulid,
        name: String,
        duration_min: i64,
        buffer_before_min: i64,
        buffer_after_min: i64,
        min_notice_hours: i64,
        max_future_days: i64,
        max_capacity: u32,
    },
    ServiceDeleted {
        id: Ulid,
    },
    ProviderAssigned {
        service_id: Ulid,
        provider_id: Ulid,
    },
    ProviderUnassigned {
        service_id: Ulid,
        provider_id: Ulid,
    },
    /// Full-day replace: the new set of ranges for that weekday.
    WeekdayReplaced {
        provider_id: Ulid,
        day_of_week: u8,
        ranges: Vec<TimeRange>,
    },
    OverrideUpserted {
        provider_id: Ulid,
        date: NaiveDate,
        is_available: bool,
        window: Option<TimeRange>,
        reason: Option<String>,
    },
    OverrideDeleted {
        provider_id: Ulid,
        date: NaiveDate,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: BookingStatus,
    },
    /// Retention sweep removed an old terminal booking from state.
    BookingPruned {
        id: Ulid,
        provider_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRuleInfo {
    pub provider_id: Ulid,
    pub day_of_week: u8,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideInfo {
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub is_available: bool,
    pub window: Option<TimeRange>,
    pub reason: Option<String>,
}

/// One bookable slot. `provider_ids` lists every provider free at this start;
/// in single-provider queries it has exactly one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub provider_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
    pub has_availability: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResult {
    pub days: Vec<DayAvailability>,
    pub total_slots: usize,
    pub any_provider: bool,
}

/// Why a slot was rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRejection {
    NotAssigned,
    OutsideWindow,
    OutsideAvailability,
    Conflict,
}

impl SlotRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotRejection::NotAssigned => "provider not assigned to service",
            SlotRejection::OutsideWindow => "outside booking window",
            SlotRejection::OutsideAvailability => "outside availability",
            SlotRejection::Conflict => "conflicts with existing booking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCheck {
    pub available: bool,
    pub reason: Option<SlotRejection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_at(start: Ms, end: Ms, before: i64, after: i64) -> Booking {
        Booking {
            id: Ulid::new(),
            service_id: Ulid::new(),
            provider_id: Ulid::new(),
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            buffer_before_min: before,
            buffer_after_min: after,
            client_name: None,
            client_email: None,
        }
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn time_range_validity() {
        assert!(TimeRange::new(540, 1020).is_valid()); // 09:00–17:00
        assert!(TimeRange::new(0, 1440).is_valid()); // whole day
        assert!(!TimeRange { start_min: 600, end_min: 600 }.is_valid());
        assert!(!TimeRange { start_min: 0, end_min: 1441 }.is_valid());
    }

    #[test]
    fn occupied_extends_by_buffers() {
        let b = booking_at(10 * HOUR_MS, 10 * HOUR_MS + 30 * MINUTE_MS, 10, 15);
        let occ = b.occupied();
        assert_eq!(occ.start, 10 * HOUR_MS - 10 * MINUTE_MS);
        assert_eq!(occ.end, 10 * HOUR_MS + 45 * MINUTE_MS);
    }

    #[test]
    fn status_lifecycle() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn status_occupancy() {
        use BookingStatus::*;
        assert!(Pending.occupies_time());
        assert!(Confirmed.occupies_time());
        for s in [Cancelled, Rejected, Completed, NoShow] {
            assert!(!s.occupies_time());
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn status_round_trips_names() {
        use BookingStatus::*;
        for s in [Pending, Confirmed, Cancelled, Rejected, Completed, NoShow] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("noshow"), None);
    }

    #[test]
    fn bookings_kept_sorted() {
        let mut ps = ProviderState::new(Ulid::new(), None, chrono_tz::UTC);
        ps.insert_booking(booking_at(3 * HOUR_MS, 4 * HOUR_MS, 0, 0));
        ps.insert_booking(booking_at(HOUR_MS, 2 * HOUR_MS, 0, 0));
        ps.insert_booking(booking_at(2 * HOUR_MS, 3 * HOUR_MS, 0, 0));
        let starts: Vec<Ms> = ps.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![HOUR_MS, 2 * HOUR_MS, 3 * HOUR_MS]);
    }

    #[test]
    fn overlapping_bookings_includes_buffer_reach() {
        let mut ps = ProviderState::new(Ulid::new(), None, chrono_tz::UTC);
        // Ends at 10:00 but a 30-min trailing buffer reaches to 10:30.
        ps.insert_booking(booking_at(9 * HOUR_MS, 10 * HOUR_MS, 0, 30));
        let query = Span::new(10 * HOUR_MS + 15 * MINUTE_MS, 11 * HOUR_MS);
        let hits: Vec<_> = ps.overlapping_bookings(&query).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_bookings_skips_disjoint() {
        let mut ps = ProviderState::new(Ulid::new(), None, chrono_tz::UTC);
        ps.insert_booking(booking_at(HOUR_MS, 2 * HOUR_MS, 0, 0));
        ps.insert_booking(booking_at(20 * HOUR_MS, 21 * HOUR_MS, 0, 0));
        let query = Span::new(5 * HOUR_MS, 6 * HOUR_MS);
        assert_eq!(ps.overlapping_bookings(&query).count(), 0);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut ps = ProviderState::new(Ulid::new(), None, chrono_tz::UTC);
        let b = booking_at(HOUR_MS, 2 * HOUR_MS, 0, 0);
        let id = b.id;
        ps.insert_booking(b);
        assert!(ps.remove_booking(id).is_some());
        assert!(ps.remove_booking(id).is_none());
        assert!(ps.bookings.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking_at(HOUR_MS, 2 * HOUR_MS, 5, 10),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn override_event_roundtrip_with_date() {
        let event = Event::OverrideUpserted {
            provider_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            is_available: true,
            window: Some(TimeRange::new(600, 720)),
            reason: Some("clinic".into()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
