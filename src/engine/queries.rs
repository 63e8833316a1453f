use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tz;

use super::availability::{clamp_booking_window, day_slot_starts};
use super::conflict::{evaluate_slot, now_ms};
use super::{Engine, EngineError, SharedProviderState};

impl Engine {
    /// Resolve availability for a service over a caller-local date range.
    ///
    /// Slot generation runs per provider in the provider's timezone; the
    /// response buckets slots into the *caller's* calendar days, so a slot at
    /// 23:30 caller-time lands on the day the caller sees it on. With no
    /// provider filter, providers free at the same start are merged into one
    /// slot listing all of them.
    pub async fn get_availability(
        &self,
        service_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        caller_tz: Tz,
        provider_filter: Option<Ulid>,
    ) -> Result<AvailabilityResult, EngineError> {
        self.get_availability_at(
            service_id,
            start_date,
            end_date,
            caller_tz,
            provider_filter,
            now_ms(),
        )
        .await
    }

    pub async fn get_availability_at(
        &self,
        service_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        caller_tz: Tz,
        provider_filter: Option<Ulid>,
        now: Ms,
    ) -> Result<AvailabilityResult, EngineError> {
        if end_date < start_date {
            return Err(EngineError::Validation(
                "end_date before start_date".into(),
            ));
        }
        if (end_date - start_date).num_days() >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query range too wide"));
        }
        let service = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;

        let provider_ids: Vec<Ulid> = match provider_filter {
            Some(pid) => {
                if !service.provider_ids.contains(&pid) {
                    return Err(EngineError::Validation(
                        "provider not assigned to service".into(),
                    ));
                }
                vec![pid]
            }
            None => service.provider_ids.clone(),
        };

        // The query window as UTC instants: caller-local midnight to midnight.
        let query = Span::new(
            tz::local_instant(start_date, 0, caller_tz),
            tz::local_instant(end_date + Duration::days(1), 0, caller_tz),
        );

        // caller-date → start → providers free at that start
        let mut buckets: BTreeMap<NaiveDate, BTreeMap<Ms, Vec<Ulid>>> = BTreeMap::new();

        for pid in &provider_ids {
            let Some(ps_arc) = self.get_provider(pid) else {
                continue;
            };
            let ps = ps_arc.read().await;

            // Provider-local dates that intersect the query window. A caller a
            // few timezones away can pull in one extra date on either side.
            let mut date = tz::local_date_of(query.start, ps.tz);
            let last = tz::local_date_of(query.end - 1, ps.tz);
            while date <= last {
                let starts = day_slot_starts(&ps, &service, date);
                let starts = clamp_booking_window(starts, &service, now);
                for s in starts {
                    if s < query.start || s >= query.end {
                        continue;
                    }
                    buckets
                        .entry(tz::local_date_of(s, caller_tz))
                        .or_default()
                        .entry(s)
                        .or_default()
                        .push(*pid);
                }
                date += Duration::days(1);
            }
        }

        let duration = service.duration_ms();
        let mut days = Vec::new();
        let mut total_slots = 0;
        let mut date = start_date;
        while date <= end_date {
            let slots: Vec<Slot> = buckets
                .remove(&date)
                .map(|by_start| {
                    by_start
                        .into_iter()
                        .map(|(start, provider_ids)| Slot {
                            span: Span::new(start, start + duration),
                            provider_ids,
                        })
                        .collect()
                })
                .unwrap_or_default();
            total_slots += slots.len();
            days.push(DayAvailability {
                date,
                has_availability: !slots.is_empty(),
                slots,
            });
            date += Duration::days(1);
        }

        Ok(AvailabilityResult {
            days,
            total_slots,
            any_provider: provider_filter.is_none(),
        })
    }

    /// Validate one exact (service, provider, start) combination.
    pub async fn check_slot(
        &self,
        service_id: Ulid,
        provider_id: Ulid,
        start: Ms,
    ) -> Result<SlotCheck, EngineError> {
        self.check_slot_at(service_id, provider_id, start, now_ms())
            .await
    }

    pub async fn check_slot_at(
        &self,
        service_id: Ulid,
        provider_id: Ulid,
        start: Ms,
        now: Ms,
    ) -> Result<SlotCheck, EngineError> {
        let service = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        let ps_arc = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        if !service.provider_ids.contains(&provider_id) {
            return Ok(SlotCheck {
                available: false,
                reason: Some(SlotRejection::NotAssigned),
            });
        }
        let ps = ps_arc.read().await;
        Ok(evaluate_slot(&ps, &service, start, now))
    }

    /// All assigned providers free for a service at an exact start — the
    /// assignment step of an "any provider" booking.
    pub async fn providers_for_slot(
        &self,
        service_id: Ulid,
        start: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        self.providers_for_slot_at(service_id, start, now_ms()).await
    }

    pub async fn providers_for_slot_at(
        &self,
        service_id: Ulid,
        start: Ms,
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        let service = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        let mut free = Vec::new();
        for pid in &service.provider_ids {
            let Some(ps_arc) = self.get_provider(pid) else {
                continue;
            };
            let ps = ps_arc.read().await;
            if evaluate_slot(&ps, &service, start, now).available {
                free.push(*pid);
            }
        }
        Ok(free)
    }

    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let arcs: Vec<SharedProviderState> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let ps = arc.read().await;
            out.push(ProviderInfo {
                id: ps.id,
                name: ps.name.clone(),
                timezone: ps.tz.name().to_string(),
            });
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut out: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn get_weekly_rules(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<WeeklyRuleInfo>, EngineError> {
        let ps_arc = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let ps = ps_arc.read().await;
        let mut out = Vec::new();
        for (dow, ranges) in ps.weekly.iter().enumerate() {
            for range in ranges {
                out.push(WeeklyRuleInfo {
                    provider_id,
                    day_of_week: dow as u8,
                    range: *range,
                });
            }
        }
        Ok(out)
    }

    /// Date overrides for one provider, optionally restricted to a
    /// closed date range. An unset bound is open on that side.
    pub async fn get_overrides(
        &self,
        provider_id: Ulid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<OverrideInfo>, EngineError> {
        let ps_arc = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let ps = ps_arc.read().await;
        Ok(ps
            .overrides
            .values()
            .filter(|ov| {
                start_date.is_none_or(|d| ov.date >= d) && end_date.is_none_or(|d| ov.date <= d)
            })
            .map(|ov| OverrideInfo {
                provider_id,
                date: ov.date,
                is_available: ov.is_available,
                window: ov.window,
                reason: ov.reason.clone(),
            })
            .collect())
    }

    /// All bookings for one provider, sorted by start time.
    pub async fn get_bookings(&self, provider_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ps_arc = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let ps = ps_arc.read().await;
        Ok(ps.bookings.clone())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let provider_id = self
            .provider_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let ps_arc = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let ps = ps_arc.read().await;
        ps.booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }
}
