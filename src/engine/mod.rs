mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    compute_saturated_spans, day_slot_starts, effective_windows, merge_overlapping,
    slot_starts, subtract_intervals,
};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::tz;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    /// Per-provider calendars, each behind its own lock. Bookings against one
    /// provider never contend with another provider's.
    pub providers: DashMap<Ulid, SharedProviderState>,
    /// Service catalog. No per-entity lock — services are read-mostly and
    /// their edits are whole-value swaps under the DashMap shard lock.
    pub(super) services: DashMap<Ulid, Service>,
    /// Reverse lookup: booking id → provider id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a provider-scoped event to state (no locking — caller holds the lock).
fn apply_to_provider(
    ps: &mut ProviderState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ProviderUpdated { name, timezone, .. } => {
            ps.name = name.clone();
            if let Some(tz) = tz::parse_tz(timezone) {
                ps.tz = tz;
            }
        }
        Event::WeekdayReplaced {
            day_of_week, ranges, ..
        } => {
            if let Some(day) = ps.weekly.get_mut(*day_of_week as usize) {
                *day = ranges.clone();
            }
        }
        Event::OverrideUpserted {
            date,
            is_available,
            window,
            reason,
            ..
        } => {
            ps.overrides.insert(
                *date,
                DateOverride {
                    date: *date,
                    is_available: *is_available,
                    window: *window,
                    reason: reason.clone(),
                },
            );
        }
        Event::OverrideDeleted { date, .. } => {
            ps.overrides.remove(date);
        }
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.provider_id);
            ps.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = *status;
            }
        }
        Event::BookingPruned { id, .. } => {
            ps.remove_booking(*id);
            booking_index.remove(id);
        }
        // Provider create/delete and all service events live at the map level.
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            providers: DashMap::new(),
            services: DashMap::new(),
            booking_index: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ProviderCreated { id, name, timezone } => {
                let tz = tz::parse_tz(timezone).unwrap_or(chrono_tz::UTC);
                let ps = ProviderState::new(*id, name.clone(), tz);
                self.providers.insert(*id, Arc::new(RwLock::new(ps)));
            }
            Event::ProviderDeleted { id } => {
                if let Some((_, arc)) = self.providers.remove(id) {
                    let ps = arc.try_read().expect("replay: uncontended read");
                    for b in &ps.bookings {
                        self.booking_index.remove(&b.id);
                    }
                }
                for mut svc in self.services.iter_mut() {
                    svc.provider_ids.retain(|p| p != id);
                }
            }
            Event::ServiceCreated {
                id,
                name,
                duration_min,
                buffer_before_min,
                buffer_after_min,
                min_notice_hours,
                max_future_days,
                max_capacity,
            } => {
                self.services.insert(
                    *id,
                    Service {
                        id: *id,
                        name: name.clone(),
                        duration_min: *duration_min,
                        buffer_before_min: *buffer_before_min,
                        buffer_after_min: *buffer_after_min,
                        min_notice_hours: *min_notice_hours,
                        max_future_days: *max_future_days,
                        max_capacity: *max_capacity,
                        provider_ids: Vec::new(),
                    },
                );
            }
            Event::ServiceUpdated {
                id,
                name,
                duration_min,
                buffer_before_min,
                buffer_after_min,
                min_notice_hours,
                max_future_days,
                max_capacity,
            } => {
                if let Some(mut svc) = self.services.get_mut(id) {
                    svc.name = name.clone();
                    svc.duration_min = *duration_min;
                    svc.buffer_before_min = *buffer_before_min;
                    svc.buffer_after_min = *buffer_after_min;
                    svc.min_notice_hours = *min_notice_hours;
                    svc.max_future_days = *max_future_days;
                    svc.max_capacity = *max_capacity;
                }
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
            Event::ProviderAssigned {
                service_id,
                provider_id,
            } => {
                if let Some(mut svc) = self.services.get_mut(service_id)
                    && !svc.provider_ids.contains(provider_id)
                {
                    svc.provider_ids.push(*provider_id);
                }
            }
            Event::ProviderUnassigned {
                service_id,
                provider_id,
            } => {
                if let Some(mut svc) = self.services.get_mut(service_id) {
                    svc.provider_ids.retain(|p| p != provider_id);
                }
            }
            other => {
                if let Some(provider_id) = event_provider_id(other)
                    && let Some(entry) = self.providers.get(&provider_id)
                {
                    let ps_arc = entry.clone();
                    let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                    apply_to_provider(&mut guard, other, &self.booking_index);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    /// Services are small — cloned out rather than borrowed across awaits.
    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn provider_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        provider_id: Ulid,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_provider(ps, event, &self.booking_index);
        self.notify.send(provider_id, event);
        Ok(())
    }

    /// Lookup booking → provider, get provider, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderState>), EngineError> {
        let provider_id = self
            .provider_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.write_owned().await;
        Ok((provider_id, guard))
    }
}

/// Extract the provider id from a provider-scoped event.
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ProviderUpdated { id, .. } => Some(*id),
        Event::WeekdayReplaced { provider_id, .. }
        | Event::OverrideUpserted { provider_id, .. }
        | Event::OverrideDeleted { provider_id, .. }
        | Event::BookingStatusChanged { provider_id, .. }
        | Event::BookingPruned { provider_id, .. } => Some(*provider_id),
        Event::BookingCreated { booking } => Some(booking.provider_id),
        _ => None,
    }
}
