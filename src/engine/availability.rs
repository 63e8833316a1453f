use chrono::NaiveDate;

use crate::model::*;
use crate::tz;

// ── Slot Generation ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted) from `base` (sorted, disjoint), splitting
/// ranges as needed.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line: time ranges where the overlap count reaches `capacity`.
/// Used for group services — only fully saturated ranges block new seats.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Span::new(start, *time));
        }
    }

    result
}

/// The provider's availability windows for one local calendar date, as UTC
/// spans: a date override fully determines the day when present; otherwise
/// the weekly rules for that day-of-week apply. Output is merged and sorted.
pub fn effective_windows(ps: &ProviderState, date: NaiveDate) -> Vec<Span> {
    let ranges: Vec<TimeRange> = match ps.overrides.get(&date) {
        Some(ov) if !ov.is_available => Vec::new(),
        Some(ov) => ov.window.into_iter().collect(),
        None => ps.weekly[tz::day_of_week(date) as usize].clone(),
    };

    let mut spans: Vec<Span> = ranges
        .iter()
        .filter_map(|r| tz::range_on_date(date, r, ps.tz))
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Walk each free range with step = duration, emitting every start where the
/// whole appointment fits. No external grid: the lattice restarts at each
/// free range's beginning.
pub fn slot_starts(free: &[Span], duration_ms: Ms) -> Vec<Ms> {
    debug_assert!(duration_ms > 0);
    let mut starts = Vec::new();
    for range in free {
        let mut s = tz::ceil_minute(range.start);
        while s + duration_ms <= range.end {
            starts.push(s);
            s += duration_ms;
        }
    }
    starts
}

/// Keep only starts inside the service's booking window:
/// `now + min_notice ≤ start ≤ now + max_future_days`.
pub fn clamp_booking_window(starts: Vec<Ms>, service: &Service, now: Ms) -> Vec<Ms> {
    let earliest = now + service.min_notice_ms();
    let latest = now + service.horizon_ms();
    starts
        .into_iter()
        .filter(|&s| s >= earliest && s <= latest)
        .collect()
}

/// Candidate slots for one provider on one provider-local date, before the
/// booking-window clamp. Sorted ascending; no other sort key.
pub fn day_slot_starts(ps: &ProviderState, service: &Service, date: NaiveDate) -> Vec<Ms> {
    let windows = effective_windows(ps, date);
    // Candidates' own buffers may spill past the windows, so the busy scan
    // must reach that far too: a booking sitting just outside a shrunk
    // window still collides with a buffered candidate inside it.
    let pad_before = service.buffer_before_min * MINUTE_MS;
    let pad_after = service.buffer_after_min * MINUTE_MS;
    let Some(bounds) = windows.first().map(|f| {
        Span::new(
            f.start - pad_before,
            windows.last().map_or(f.end, |l| l.end) + pad_after,
        )
    }) else {
        return Vec::new();
    };

    let group_mode = service.max_capacity > 1;
    let mut blocking: Vec<Span> = Vec::new();
    let mut group: Vec<&Booking> = Vec::new();
    for b in ps.overlapping_bookings(&bounds) {
        if !b.status.occupies_time() {
            continue;
        }
        if group_mode && b.service_id == service.id {
            group.push(b);
        } else {
            blocking.push(b.occupied());
        }
    }
    blocking.sort_by_key(|s| s.start);

    let mut busy = merge_overlapping(&blocking);
    if group_mode && !group.is_empty() {
        let seats: Vec<Span> = group.iter().map(|b| b.occupied()).collect();
        let mut saturated = compute_saturated_spans(&seats, service.max_capacity);
        busy.append(&mut saturated);
        busy.sort_by_key(|s| s.start);
        busy = merge_overlapping(&busy);
    }

    let free = subtract_intervals(&windows, &busy);
    let duration = service.duration_ms();
    let mut starts = slot_starts(&free, duration);

    // The candidate's own buffers must not reach into anything busy.
    if service.buffer_before_min > 0 || service.buffer_after_min > 0 {
        starts.retain(|&s| {
            let occupied = Span::new(
                s - service.buffer_before_min * MINUTE_MS,
                s + duration + service.buffer_after_min * MINUTE_MS,
            );
            !busy.iter().any(|b| b.overlaps(&occupied))
        });
    }

    if group_mode && !group.is_empty() {
        starts.retain(|&s| {
            let candidate = Span::new(s, s + duration);
            let mut same_start = 0u32;
            for b in &group {
                if b.span.start == s {
                    same_start += 1;
                } else if b.span.overlaps(&candidate) {
                    // A misaligned group booking blocks like any other.
                    return false;
                }
            }
            same_start < service.max_capacity
        });
    }

    starts
}

/// Exact-interval check used by the slot validator and the booking insert:
/// does `[start, start+duration)` lie inside a free window? Buffers may spill
/// outside the windows; conflict detection against other bookings is the
/// caller's second phase.
pub fn fits_windows(ps: &ProviderState, service: &Service, start: Ms) -> bool {
    let date = tz::local_date_of(start, ps.tz);
    let candidate = Span::new(start, start + service.duration_ms());
    effective_windows(ps, date)
        .iter()
        .any(|w| w.contains_span(&candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

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

    fn provider_nine_to_five(date: NaiveDate) -> ProviderState {
        let mut ps = ProviderState::new(Ulid::new(), None, UTC);
        ps.weekly[tz::day_of_week(date) as usize].push(TimeRange::new(540, 1020));
        ps
    }

    fn booked(ps: &mut ProviderState, service: &Service, start: Ms, end: Ms) -> Ulid {
        let id = Ulid::new();
        ps.insert_booking(Booking {
            id,
            service_id: service.id,
            provider_id: ps.id,
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            buffer_before_min: service.buffer_before_min,
            buffer_after_min: service.buffer_after_min,
            client_name: None,
            client_email: None,
        });
        id
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn day_start(date: NaiveDate) -> Ms {
        tz::local_day_span(date, UTC).start
    }

    // ── subtract / merge / saturation ─────────────────────

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn subtract_full_cover() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(400, 500)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 500)]);
    }

    #[test]
    fn saturated_spans_basic() {
        let allocs = vec![Span::new(0, 100), Span::new(50, 150)];
        assert_eq!(compute_saturated_spans(&allocs, 2), vec![Span::new(50, 100)]);
        assert!(compute_saturated_spans(&allocs, 3).is_empty());
    }

    // ── effective windows ─────────────────────────────────

    #[test]
    fn weekly_rule_produces_window() {
        let date = d(2026, 3, 10); // Tuesday
        let ps = provider_nine_to_five(date);
        let windows = effective_windows(&ps, date);
        let base = day_start(date);
        assert_eq!(windows, vec![Span::new(base + 9 * H, base + 17 * H)]);
    }

    #[test]
    fn no_rule_for_other_days() {
        let tuesday = d(2026, 3, 10);
        let ps = provider_nine_to_five(tuesday);
        assert!(effective_windows(&ps, d(2026, 3, 11)).is_empty());
    }

    #[test]
    fn split_shift_merges_overlap() {
        let date = d(2026, 3, 10);
        let mut ps = ProviderState::new(Ulid::new(), None, UTC);
        let dow = tz::day_of_week(date) as usize;
        // Store permits overlap; the generator must merge.
        ps.weekly[dow].push(TimeRange::new(540, 720));
        ps.weekly[dow].push(TimeRange::new(660, 840));
        ps.weekly[dow].push(TimeRange::new(900, 1020));
        let windows = effective_windows(&ps, date);
        let base = day_start(date);
        assert_eq!(
            windows,
            vec![
                Span::new(base + 9 * H, base + 14 * H),
                Span::new(base + 15 * H, base + 17 * H),
            ]
        );
    }

    #[test]
    fn blocking_override_wins_over_weekly() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        ps.overrides.insert(
            date,
            DateOverride {
                date,
                is_available: false,
                window: None,
                reason: Some("holiday".into()),
            },
        );
        assert!(effective_windows(&ps, date).is_empty());
    }

    #[test]
    fn available_override_replaces_weekly() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        ps.overrides.insert(
            date,
            DateOverride {
                date,
                is_available: true,
                window: Some(TimeRange::new(600, 720)), // 10:00–12:00 only
                reason: None,
            },
        );
        let base = day_start(date);
        assert_eq!(
            effective_windows(&ps, date),
            vec![Span::new(base + 10 * H, base + 12 * H)]
        );
    }

    // ── lattice ───────────────────────────────────────────

    #[test]
    fn lattice_steps_by_duration() {
        // Tuesday 09:00–12:00, 60-min service: 09:00, 10:00, 11:00 — not 11:30.
        let date = d(2026, 3, 10);
        let mut ps = ProviderState::new(Ulid::new(), None, UTC);
        ps.weekly[tz::day_of_week(date) as usize].push(TimeRange::new(540, 720));
        let service = svc(60, 0, 0, 1);
        let base = day_start(date);
        assert_eq!(
            day_slot_starts(&ps, &service, date),
            vec![base + 9 * H, base + 10 * H, base + 11 * H]
        );
    }

    #[test]
    fn lattice_restarts_after_busy_gap() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let service = svc(60, 0, 0, 1);
        let base = day_start(date);
        // 10:30–11:00 booked: free is 09:00–10:30 and 11:00–17:00.
        booked(&mut ps, &service, base + 10 * H + 30 * M, base + 11 * H);
        let starts = day_slot_starts(&ps, &service, date);
        assert_eq!(starts[0], base + 9 * H);
        assert!(!starts.contains(&(base + 10 * H))); // would overlap
        assert!(starts.contains(&(base + 11 * H))); // restart at gap end
    }

    #[test]
    fn trailing_buffer_blocks_next_slot() {
        // duration=30, buffer_after=15, booking 10:00–10:30:
        // 10:30 and 10:40 blocked, 10:45 offered.
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let service = svc(30, 0, 15, 1);
        let base = day_start(date);
        booked(&mut ps, &service, base + 10 * H, base + 10 * H + 30 * M);
        let starts = day_slot_starts(&ps, &service, date);
        assert!(!starts.contains(&(base + 10 * H + 30 * M)));
        assert!(!starts.contains(&(base + 10 * H + 40 * M)));
        assert!(starts.contains(&(base + 10 * H + 45 * M)));
    }

    #[test]
    fn leading_buffer_of_candidate_respected() {
        // Existing booking occupies 10:00–10:30 (no buffers). A service with
        // buffer_before=15 cannot start at 10:30 — its buffer would reach back.
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let plain = svc(30, 0, 0, 1);
        let base = day_start(date);
        booked(&mut ps, &plain, base + 10 * H, base + 10 * H + 30 * M);
        let buffered = svc(30, 15, 0, 1);
        let starts = day_slot_starts(&ps, &buffered, date);
        assert!(!starts.contains(&(base + 10 * H + 30 * M)));
        assert!(starts.contains(&(base + 10 * H + 45 * M)));
    }

    #[test]
    fn trailing_buffer_reaches_booking_past_window_end() {
        // A 17:30–18:00 booking outlives a window shrink to 09:00–17:00.
        // A 60-min service with a 45-min trailing buffer cannot start at
        // 16:00: its occupied interval runs to 17:45.
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let plain = svc(30, 0, 0, 1);
        let base = day_start(date);
        booked(&mut ps, &plain, base + 17 * H + 30 * M, base + 18 * H);
        let buffered = svc(60, 0, 45, 1);
        let starts = day_slot_starts(&ps, &buffered, date);
        assert!(!starts.contains(&(base + 16 * H)));
        assert!(starts.contains(&(base + 15 * H)));
    }

    #[test]
    fn leading_buffer_reaches_booking_before_window_start() {
        // 08:15–08:45 booking sits before the 09:00 window; a 30-min leading
        // buffer makes a 09:00 start reach back into it.
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let plain = svc(30, 0, 0, 1);
        let base = day_start(date);
        booked(&mut ps, &plain, base + 8 * H + 15 * M, base + 8 * H + 45 * M);
        let buffered = svc(60, 30, 0, 1);
        let starts = day_slot_starts(&ps, &buffered, date);
        assert!(!starts.contains(&(base + 9 * H)));
        assert!(starts.contains(&(base + 10 * H)));
    }

    #[test]
    fn cancelled_booking_does_not_block() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let service = svc(60, 0, 0, 1);
        let base = day_start(date);
        let id = booked(&mut ps, &service, base + 10 * H, base + 11 * H);
        ps.booking_mut(id).unwrap().status = BookingStatus::Cancelled;
        let starts = day_slot_starts(&ps, &service, date);
        assert!(starts.contains(&(base + 10 * H)));
    }

    #[test]
    fn group_service_shares_slot_until_capacity() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let class = svc(60, 0, 0, 3);
        let base = day_start(date);
        booked(&mut ps, &class, base + 10 * H, base + 11 * H);
        booked(&mut ps, &class, base + 10 * H, base + 11 * H);
        // Two of three seats taken: 10:00 still offered.
        let starts = day_slot_starts(&ps, &class, date);
        assert!(starts.contains(&(base + 10 * H)));

        booked(&mut ps, &class, base + 10 * H, base + 11 * H);
        // Saturated: 10:00 gone, neighbors unaffected.
        let starts = day_slot_starts(&ps, &class, date);
        assert!(!starts.contains(&(base + 10 * H)));
        assert!(starts.contains(&(base + 9 * H)));
        assert!(starts.contains(&(base + 11 * H)));
    }

    #[test]
    fn other_service_blocks_group_slot() {
        let date = d(2026, 3, 10);
        let mut ps = provider_nine_to_five(date);
        let class = svc(60, 0, 0, 5);
        let other = svc(30, 0, 0, 1);
        let base = day_start(date);
        booked(&mut ps, &other, base + 10 * H, base + 10 * H + 30 * M);
        let starts = day_slot_starts(&ps, &class, date);
        assert!(!starts.contains(&(base + 10 * H)));
    }

    // ── booking window clamp ──────────────────────────────

    #[test]
    fn notice_window_filters_early_starts() {
        let mut service = svc(60, 0, 0, 1);
        service.min_notice_hours = 24;
        let now = 1_000_000 * MINUTE_MS;
        let starts = vec![now + 23 * H, now + 24 * H, now + 25 * H];
        let kept = clamp_booking_window(starts, &service, now);
        assert_eq!(kept, vec![now + 24 * H, now + 25 * H]);
    }

    #[test]
    fn horizon_filters_far_future() {
        let mut service = svc(60, 0, 0, 1);
        service.max_future_days = 7;
        let now = 1_000_000 * MINUTE_MS;
        let starts = vec![now + 6 * DAY_MS, now + 8 * DAY_MS];
        let kept = clamp_booking_window(starts, &service, now);
        assert_eq!(kept, vec![now + 6 * DAY_MS]);
    }

    // ── exact-fit check ───────────────────────────────────

    #[test]
    fn fits_windows_exact_interval() {
        let date = d(2026, 3, 10);
        let ps = provider_nine_to_five(date);
        let service = svc(60, 0, 0, 1);
        let base = day_start(date);
        assert!(fits_windows(&ps, &service, base + 9 * H));
        assert!(fits_windows(&ps, &service, base + 16 * H));
        // Does not need lattice alignment.
        assert!(fits_windows(&ps, &service, base + 9 * H + 10 * M));
        // 16:30 + 60min spills past 17:00.
        assert!(!fits_windows(&ps, &service, base + 16 * H + 30 * M));
        assert!(!fits_windows(&ps, &service, base + 8 * H));
    }
}
