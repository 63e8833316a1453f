use crate::model::*;

use super::availability::fits_windows;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Insert-time conflict check, run under the provider's write lock.
///
/// `span` is the raw appointment interval; the service's current buffers are
/// applied to the candidate, each existing booking's snapshotted buffers to
/// itself. Group services (capacity > 1) share a start: same-service bookings
/// at exactly `span.start` count as seats, anything else overlapping blocks.
pub(crate) fn check_no_conflict(
    ps: &ProviderState,
    service: &Service,
    span: &Span,
) -> Result<(), EngineError> {
    let candidate = Span::new(
        span.start - service.buffer_before_min * MINUTE_MS,
        span.end + service.buffer_after_min * MINUTE_MS,
    );

    if service.max_capacity <= 1 {
        for b in ps.overlapping_bookings(&candidate) {
            if b.status.occupies_time() {
                return Err(EngineError::Conflict(b.id));
            }
        }
        return Ok(());
    }

    let mut seats: u32 = 0;
    for b in ps.overlapping_bookings(&candidate) {
        if !b.status.occupies_time() {
            continue;
        }
        if b.service_id != service.id {
            return Err(EngineError::Conflict(b.id));
        }
        if b.span.start == span.start {
            seats += 1;
        } else if b.occupied().overlaps(&candidate) {
            // Same service but a different start — not a shared seat.
            return Err(EngineError::Conflict(b.id));
        }
    }
    if seats >= service.max_capacity {
        return Err(EngineError::CapacityExceeded(service.max_capacity));
    }
    Ok(())
}

/// Full slot verdict for an exact requested start, in rejection-priority
/// order: booking window, then availability, then conflicts. Assignment is
/// the engine's concern — it needs the service↔provider link, not the state.
pub(crate) fn evaluate_slot(
    ps: &ProviderState,
    service: &Service,
    start: Ms,
    now: Ms,
) -> SlotCheck {
    let reject = |reason| SlotCheck {
        available: false,
        reason: Some(reason),
    };

    if start < now + service.min_notice_ms() || start > now + service.horizon_ms() {
        return reject(SlotRejection::OutsideWindow);
    }
    if !fits_windows(ps, service, start) {
        return reject(SlotRejection::OutsideAvailability);
    }
    let span = Span::new(start, start + service.duration_ms());
    if check_no_conflict(ps, service, &span).is_err() {
        return reject(SlotRejection::Conflict);
    }
    SlotCheck {
        available: true,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use chrono_tz::UTC;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    // Midnight UTC, Tuesday 2026-03-10.
    const DAY: Ms = 1_773_100_800_000;

    fn svc(duration: i64, before: i64, after: i64, capacity: u32) -> Service {
        Service {
            id: Ulid::new(),
            name: "svc".into(),
            duration_min: duration,
            buffer_before_min: before,
            buffer_after_min: after,
            min_notice_hours: 0,
            max_future_days: 30,
            max_capacity: capacity,
            provider_ids: Vec::new(),
        }
    }

    fn provider() -> ProviderState {
        let mut ps = ProviderState::new(Ulid::new(), None, UTC);
        ps.weekly[2].push(TimeRange::new(540, 1020)); // Tue 09:00–17:00
        ps
    }

    fn booked(ps: &mut ProviderState, service: &Service, start: Ms) {
        ps.insert_booking(Booking {
            id: Ulid::new(),
            service_id: service.id,
            provider_id: ps.id,
            span: Span::new(start, start + service.duration_ms()),
            status: BookingStatus::Confirmed,
            buffer_before_min: service.buffer_before_min,
            buffer_after_min: service.buffer_after_min,
            client_name: None,
            client_email: None,
        });
    }

    #[test]
    fn day_constant_is_tuesday() {
        let date = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(DAY)
            .unwrap()
            .date_naive();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(crate::tz::day_of_week(date), 2);
    }

    #[test]
    fn overlap_is_conflict() {
        let mut ps = provider();
        let s = svc(60, 0, 0, 1);
        booked(&mut ps, &s, DAY + 10 * H);
        let err = check_no_conflict(
            &ps,
            &s,
            &Span::new(DAY + 10 * H + 30 * M, DAY + 11 * H + 30 * M),
        );
        assert!(matches!(err, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn adjacent_without_buffers_is_free() {
        let mut ps = provider();
        let s = svc(60, 0, 0, 1);
        booked(&mut ps, &s, DAY + 10 * H);
        assert!(check_no_conflict(&ps, &s, &Span::new(DAY + 11 * H, DAY + 12 * H)).is_ok());
    }

    #[test]
    fn snapshotted_buffer_still_blocks_after_service_edit() {
        let mut ps = provider();
        let with_buffer = svc(30, 0, 15, 1);
        booked(&mut ps, &with_buffer, DAY + 10 * H);
        // Service later drops its buffer; the existing booking keeps its own.
        let mut edited = with_buffer.clone();
        edited.buffer_after_min = 0;
        let err = check_no_conflict(
            &ps,
            &edited,
            &Span::new(DAY + 10 * H + 30 * M, DAY + 11 * H),
        );
        assert!(matches!(err, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn candidate_buffer_reaches_back() {
        let mut ps = provider();
        let plain = svc(30, 0, 0, 1);
        booked(&mut ps, &plain, DAY + 10 * H);
        let buffered = svc(30, 15, 0, 1);
        let err = check_no_conflict(
            &ps,
            &buffered,
            &Span::new(DAY + 10 * H + 30 * M, DAY + 11 * H),
        );
        assert!(matches!(err, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn group_seats_fill_to_capacity() {
        let mut ps = provider();
        let class = svc(60, 0, 0, 2);
        let span = Span::new(DAY + 10 * H, DAY + 11 * H);
        booked(&mut ps, &class, DAY + 10 * H);
        assert!(check_no_conflict(&ps, &class, &span).is_ok());
        booked(&mut ps, &class, DAY + 10 * H);
        assert!(matches!(
            check_no_conflict(&ps, &class, &span),
            Err(EngineError::CapacityExceeded(2))
        ));
    }

    #[test]
    fn group_misaligned_start_conflicts() {
        let mut ps = provider();
        let class = svc(60, 0, 0, 5);
        booked(&mut ps, &class, DAY + 10 * H);
        let err = check_no_conflict(
            &ps,
            &class,
            &Span::new(DAY + 10 * H + 30 * M, DAY + 11 * H + 30 * M),
        );
        assert!(matches!(err, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn evaluate_slot_rejection_order() {
        let mut ps = provider();
        let mut s = svc(60, 0, 0, 1);
        s.min_notice_hours = 2;
        let now = DAY + 9 * H;

        // Inside the notice period → window rejection, even though the time is free.
        let check = evaluate_slot(&ps, &s, DAY + 10 * H, now);
        assert_eq!(check.reason, Some(SlotRejection::OutsideWindow));

        // Wednesday has no rules.
        let check = evaluate_slot(&ps, &s, DAY + 24 * H + 10 * H, now);
        assert_eq!(check.reason, Some(SlotRejection::OutsideAvailability));

        booked(&mut ps, &s, DAY + 13 * H);
        let check = evaluate_slot(&ps, &s, DAY + 13 * H, now);
        assert_eq!(check.reason, Some(SlotRejection::Conflict));

        let check = evaluate_slot(&ps, &s, DAY + 14 * H, now);
        assert!(check.available);
        // Off-lattice starts are fine for direct checks.
        let check = evaluate_slot(&ps, &s, DAY + 14 * H + 10 * M, now);
        assert!(check.available);
    }

    #[test]
    fn span_outside_valid_epoch_rejected() {
        assert!(validate_span(&Span::new(1_000, 2_000)).is_err());
        assert!(validate_span(&Span::new(DAY, DAY + H)).is_ok());
    }
}
