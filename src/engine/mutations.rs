use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tz;

use super::availability::fits_windows;
use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_service_fields(
    duration_min: i64,
    buffer_before_min: i64,
    buffer_after_min: i64,
    min_notice_hours: i64,
    max_future_days: i64,
    max_capacity: u32,
) -> Result<(), EngineError> {
    if duration_min <= 0 || duration_min > MAX_DURATION_MIN {
        return Err(EngineError::Validation("duration out of range".into()));
    }
    if !(0..=MAX_BUFFER_MIN).contains(&buffer_before_min)
        || !(0..=MAX_BUFFER_MIN).contains(&buffer_after_min)
    {
        return Err(EngineError::Validation("buffer out of range".into()));
    }
    if !(0..=MAX_NOTICE_HOURS).contains(&min_notice_hours) {
        return Err(EngineError::Validation("min_notice_hours out of range".into()));
    }
    if !(1..=MAX_FUTURE_DAYS).contains(&max_future_days) {
        return Err(EngineError::Validation("max_future_days out of range".into()));
    }
    if max_capacity == 0 || max_capacity > MAX_CAPACITY {
        return Err(EngineError::Validation("max_capacity out of range".into()));
    }
    Ok(())
}

fn validate_client_field(value: &Option<String>) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.len() > MAX_CLIENT_FIELD_LEN
    {
        return Err(EngineError::LimitExceeded("client field too long"));
    }
    Ok(())
}

impl Engine {
    // ── Providers ─────────────────────────────────────────

    pub async fn create_provider(
        &self,
        id: Ulid,
        name: Option<String>,
        timezone: &str,
    ) -> Result<(), EngineError> {
        if self.providers.len() >= MAX_PROVIDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if let Some(ref n) = name {
            validate_name(n)?;
        }
        let tz = tz::parse_tz(timezone)
            .ok_or_else(|| EngineError::Validation(format!("unknown timezone: {timezone}")))?;
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProviderCreated {
            id,
            name: name.clone(),
            timezone: timezone.to_string(),
        };
        self.wal_append(&event).await?;
        let ps = ProviderState::new(id, name, tz);
        self.providers.insert(id, Arc::new(RwLock::new(ps)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_provider(
        &self,
        id: Ulid,
        name: Option<String>,
        timezone: &str,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name {
            validate_name(n)?;
        }
        tz::parse_tz(timezone)
            .ok_or_else(|| EngineError::Validation(format!("unknown timezone: {timezone}")))?;
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;

        let event = Event::ProviderUpdated {
            id,
            name,
            timezone: timezone.to_string(),
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Deleting a provider drops its calendar, its bookings, and its service
    /// assignments in one step.
    pub async fn delete_provider(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.providers.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ProviderDeleted { id };
        self.wal_append(&event).await?;
        if let Some((_, arc)) = self.providers.remove(&id) {
            let ps = arc.read().await;
            for b in &ps.bookings {
                self.booking_index.remove(&b.id);
            }
        }
        for mut svc in self.services.iter_mut() {
            svc.provider_ids.retain(|p| p != &id);
        }
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Services ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_service(
        &self,
        id: Ulid,
        name: String,
        duration_min: i64,
        buffer_before_min: i64,
        buffer_after_min: i64,
        min_notice_hours: i64,
        max_future_days: i64,
        max_capacity: u32,
    ) -> Result<(), EngineError> {
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        validate_name(&name)?;
        validate_service_fields(
            duration_min,
            buffer_before_min,
            buffer_after_min,
            min_notice_hours,
            max_future_days,
            max_capacity,
        )?;
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceCreated {
            id,
            name: name.clone(),
            duration_min,
            buffer_before_min,
            buffer_after_min,
            min_notice_hours,
            max_future_days,
            max_capacity,
        };
        self.wal_append(&event).await?;
        self.services.insert(
            id,
            Service {
                id,
                name,
                duration_min,
                buffer_before_min,
                buffer_after_min,
                min_notice_hours,
                max_future_days,
                max_capacity,
                provider_ids: Vec::new(),
            },
        );
        Ok(())
    }

    /// Edits apply to future bookings only — existing bookings keep their
    /// snapshotted duration and buffers.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_service(
        &self,
        id: Ulid,
        name: String,
        duration_min: i64,
        buffer_before_min: i64,
        buffer_after_min: i64,
        min_notice_hours: i64,
        max_future_days: i64,
        max_capacity: u32,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_service_fields(
            duration_min,
            buffer_before_min,
            buffer_after_min,
            min_notice_hours,
            max_future_days,
            max_capacity,
        )?;
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ServiceUpdated {
            id,
            name: name.clone(),
            duration_min,
            buffer_before_min,
            buffer_after_min,
            min_notice_hours,
            max_future_days,
            max_capacity,
        };
        self.wal_append(&event).await?;
        if let Some(mut svc) = self.services.get_mut(&id) {
            svc.name = name;
            svc.duration_min = duration_min;
            svc.buffer_before_min = buffer_before_min;
            svc.buffer_after_min = buffer_after_min;
            svc.min_notice_hours = min_notice_hours;
            svc.max_future_days = max_future_days;
            svc.max_capacity = max_capacity;
        }
        Ok(())
    }

    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceDeleted { id };
        self.wal_append(&event).await?;
        self.services.remove(&id);
        Ok(())
    }

    pub async fn assign_provider(
        &self,
        service_id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), EngineError> {
        if !self.providers.contains_key(&provider_id) {
            return Err(EngineError::NotFound(provider_id));
        }
        {
            let svc = self
                .services
                .get(&service_id)
                .ok_or(EngineError::NotFound(service_id))?;
            if svc.provider_ids.contains(&provider_id) {
                return Err(EngineError::AlreadyExists(provider_id));
            }
            if svc.provider_ids.len() >= MAX_PROVIDERS_PER_SERVICE {
                return Err(EngineError::LimitExceeded("too many providers on service"));
            }
        }

        let event = Event::ProviderAssigned {
            service_id,
            provider_id,
        };
        self.wal_append(&event).await?;
        if let Some(mut svc) = self.services.get_mut(&service_id)
            && !svc.provider_ids.contains(&provider_id)
        {
            svc.provider_ids.push(provider_id);
        }
        Ok(())
    }

    pub async fn unassign_provider(
        &self,
        service_id: Ulid,
        provider_id: Ulid,
    ) -> Result<(), EngineError> {
        {
            let svc = self
                .services
                .get(&service_id)
                .ok_or(EngineError::NotFound(service_id))?;
            if !svc.provider_ids.contains(&provider_id) {
                return Err(EngineError::NotFound(provider_id));
            }
        }

        let event = Event::ProviderUnassigned {
            service_id,
            provider_id,
        };
        self.wal_append(&event).await?;
        if let Some(mut svc) = self.services.get_mut(&service_id) {
            svc.provider_ids.retain(|p| p != &provider_id);
        }
        Ok(())
    }

    // ── Schedules ─────────────────────────────────────────

    /// Replace the whole set of ranges for one weekday. An empty set clears it.
    pub async fn replace_weekly_day(
        &self,
        provider_id: Ulid,
        day_of_week: u8,
        ranges: Vec<TimeRange>,
    ) -> Result<(), EngineError> {
        if day_of_week > 6 {
            return Err(EngineError::Validation("day_of_week must be 0-6".into()));
        }
        if ranges.len() > MAX_RANGES_PER_DAY {
            return Err(EngineError::LimitExceeded("too many ranges for one day"));
        }
        for r in &ranges {
            if !r.is_valid() {
                return Err(EngineError::Validation(format!(
                    "invalid time range {}-{}",
                    r.start_min, r.end_min
                )));
            }
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;

        let event = Event::WeekdayReplaced {
            provider_id,
            day_of_week,
            ranges,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    pub async fn upsert_override(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        is_available: bool,
        window: Option<TimeRange>,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if is_available && window.is_none() {
            return Err(EngineError::Validation(
                "available override requires a window".into(),
            ));
        }
        if let Some(w) = window
            && !w.is_valid()
        {
            return Err(EngineError::Validation(format!(
                "invalid time range {}-{}",
                w.start_min, w.end_min
            )));
        }
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        // Replacing an existing date never grows the map.
        if !guard.overrides.contains_key(&date)
            && guard.overrides.len() >= MAX_OVERRIDES_PER_PROVIDER
        {
            return Err(EngineError::LimitExceeded("too many overrides on provider"));
        }

        let event = Event::OverrideUpserted {
            provider_id,
            date,
            is_available,
            window,
            reason,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    /// Removing an override restores the weekly rules for that date.
    /// Idempotent — deleting a missing override is a no-op.
    pub async fn delete_override(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if !guard.overrides.contains_key(&date) {
            return Ok(());
        }

        let event = Event::OverrideDeleted { provider_id, date };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    // ── Bookings ──────────────────────────────────────────

    /// Book a slot. `provider_id = None` means "any provider": assigned
    /// providers are tried in assignment order and the first free one wins.
    ///
    /// The winning provider's write lock is held across the re-validation and
    /// the insert, so two racing requests for the last slot serialize — the
    /// loser fails its re-check and gets a `Conflict`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: Ulid,
        service_id: Ulid,
        provider_id: Option<Ulid>,
        start: Ms,
        status: BookingStatus,
        client_name: Option<String>,
        client_email: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.create_booking_at(
            id,
            service_id,
            provider_id,
            start,
            status,
            client_name,
            client_email,
            now_ms(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking_at(
        &self,
        id: Ulid,
        service_id: Ulid,
        provider_id: Option<Ulid>,
        start: Ms,
        status: BookingStatus,
        client_name: Option<String>,
        client_email: Option<String>,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if !matches!(status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::Validation(
                "new bookings must be pending or confirmed".into(),
            ));
        }
        validate_client_field(&client_name)?;
        validate_client_field(&client_email)?;
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let service = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        let span = Span::new(start, start + service.duration_ms());
        validate_span(&span)?;

        let candidates: Vec<Ulid> = match provider_id {
            Some(pid) => {
                if !service.provider_ids.contains(&pid) {
                    return Err(EngineError::SlotUnavailable(SlotRejection::NotAssigned));
                }
                vec![pid]
            }
            None => {
                if service.provider_ids.is_empty() {
                    return Err(EngineError::SlotUnavailable(SlotRejection::NotAssigned));
                }
                service.provider_ids.clone()
            }
        };

        let mut last_err = EngineError::SlotUnavailable(SlotRejection::OutsideAvailability);
        for pid in candidates {
            let Some(ps_arc) = self.get_provider(&pid) else {
                continue;
            };
            let mut guard = ps_arc.write().await;
            match self
                .try_insert_booking(
                    &mut guard,
                    &service,
                    id,
                    pid,
                    span,
                    status,
                    client_name.clone(),
                    client_email.clone(),
                    now,
                )
                .await
            {
                Ok(booking) => return Ok(booking),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// The validate-then-insert critical section, run under `ps`'s write lock.
    #[allow(clippy::too_many_arguments)]
    async fn try_insert_booking(
        &self,
        ps: &mut ProviderState,
        service: &Service,
        id: Ulid,
        provider_id: Ulid,
        span: Span,
        status: BookingStatus,
        client_name: Option<String>,
        client_email: Option<String>,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if ps.bookings.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many bookings on provider"));
        }
        if span.start < now + service.min_notice_ms() || span.start > now + service.horizon_ms() {
            return Err(EngineError::SlotUnavailable(SlotRejection::OutsideWindow));
        }
        if !fits_windows(ps, service, span.start) {
            return Err(EngineError::SlotUnavailable(
                SlotRejection::OutsideAvailability,
            ));
        }
        check_no_conflict(ps, service, &span)?;

        let booking = Booking {
            id,
            service_id: service.id,
            provider_id,
            span,
            status,
            buffer_before_min: service.buffer_before_min,
            buffer_after_min: service.buffer_after_min,
            client_name,
            client_email,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(provider_id, ps, &event).await?;
        Ok(booking)
    }

    /// Move a booking through its lifecycle. Transitions out of a terminal
    /// status are rejected.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.as_str(),
                to: status.as_str(),
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            provider_id,
            status,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    /// Cancellation is a status change, not a delete — the record stays for
    /// history and the slot immediately frees up.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    // ── Retention ─────────────────────────────────────────

    /// Terminal bookings whose appointment ended more than `retention_ms` ago.
    pub fn collect_prunable(&self, now: Ms, retention_ms: Ms) -> Vec<(Ulid, Ulid)> {
        let mut prunable = Vec::new();
        for entry in self.providers.iter() {
            let ps = entry.value().clone();
            if let Ok(guard) = ps.try_read() {
                for b in &guard.bookings {
                    if b.status.is_terminal() && b.span.end + retention_ms <= now {
                        prunable.push((b.id, guard.id));
                    }
                }
            }
        }
        prunable
    }

    pub async fn prune_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (provider_id, mut guard) = self.resolve_booking_write(&id).await?;
        let event = Event::BookingPruned { id, provider_id };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    // ── WAL maintenance ───────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let provider_ids: Vec<Ulid> = self.providers.iter().map(|e| *e.key()).collect();
        for pid in &provider_ids {
            let Some(ps_arc) = self.get_provider(pid) else {
                continue;
            };
            let guard = ps_arc.read().await;
            events.push(Event::ProviderCreated {
                id: guard.id,
                name: guard.name.clone(),
                timezone: guard.tz.name().to_string(),
            });
            for (dow, ranges) in guard.weekly.iter().enumerate() {
                if !ranges.is_empty() {
                    events.push(Event::WeekdayReplaced {
                        provider_id: guard.id,
                        day_of_week: dow as u8,
                        ranges: ranges.clone(),
                    });
                }
            }
            for ov in guard.overrides.values() {
                events.push(Event::OverrideUpserted {
                    provider_id: guard.id,
                    date: ov.date,
                    is_available: ov.is_available,
                    window: ov.window,
                    reason: ov.reason.clone(),
                });
            }
        }

        for entry in self.services.iter() {
            let svc = entry.value();
            events.push(Event::ServiceCreated {
                id: svc.id,
                name: svc.name.clone(),
                duration_min: svc.duration_min,
                buffer_before_min: svc.buffer_before_min,
                buffer_after_min: svc.buffer_after_min,
                min_notice_hours: svc.min_notice_hours,
                max_future_days: svc.max_future_days,
                max_capacity: svc.max_capacity,
            });
            for pid in &svc.provider_ids {
                events.push(Event::ProviderAssigned {
                    service_id: svc.id,
                    provider_id: *pid,
                });
            }
        }

        // BookingCreated carries the full record including status, so one
        // event per booking restores terminal states too.
        for pid in &provider_ids {
            let Some(ps_arc) = self.get_provider(pid) else {
                continue;
            };
            let guard = ps_arc.read().await;
            for b in &guard.bookings {
                events.push(Event::BookingCreated { booking: b.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
