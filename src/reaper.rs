use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Ms;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Background task that prunes terminal bookings whose appointment ended
/// more than `retention_ms` ago.
pub async fn run_sweeper(engine: Arc<Engine>, retention_ms: Ms) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let prunable = engine.collect_prunable(now_ms(), retention_ms);
        for (booking_id, _provider_id) in prunable {
            match engine.prune_booking(booking_id).await {
                Ok(()) => info!("pruned booking {booking_id}"),
                Err(e) => {
                    // May already be gone — that's fine
                    tracing::debug!("sweeper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    const DAY_MS: Ms = 24 * HOUR_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_collects_only_old_terminal_bookings() {
        let path = test_wal_path("sweeper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let pid = Ulid::new();
        let sid = Ulid::new();
        engine.create_provider(pid, None, "UTC").await.unwrap();
        // Open every day so bookings land regardless of weekday.
        for dow in 0..7 {
            engine
                .replace_weekly_day(pid, dow, vec![TimeRange::new(0, 1439)])
                .await
                .unwrap();
        }
        engine
            .create_service(sid, "Call".into(), 60, 0, 0, 0, 30, 1)
            .await
            .unwrap();
        engine.assign_provider(sid, pid).await.unwrap();

        // Tuesday 2026-03-10 00:00 UTC, treated as "now" for booking clocks.
        let now: Ms = 1_773_100_800_000;
        let old_id = Ulid::new();
        let recent_id = Ulid::new();
        engine
            .create_booking_at(old_id, sid, Some(pid), now + 10 * HOUR_MS, BookingStatus::Confirmed, None, None, now)
            .await
            .unwrap();
        engine
            .create_booking_at(recent_id, sid, Some(pid), now + DAY_MS + 10 * HOUR_MS, BookingStatus::Confirmed, None, None, now)
            .await
            .unwrap();
        engine.cancel_booking(old_id).await.unwrap();
        engine.cancel_booking(recent_id).await.unwrap();

        // Retention of 30 days, observed 40 days later: only the booking
        // whose appointment ended before the retention cutoff is prunable.
        let observed = now + 40 * DAY_MS;
        let retention = 30 * DAY_MS;
        let prunable = engine.collect_prunable(observed, retention);
        assert_eq!(prunable.len(), 2);

        let observed = now + 30 * DAY_MS + 12 * HOUR_MS;
        let prunable = engine.collect_prunable(observed, retention);
        assert_eq!(prunable.len(), 1);
        assert_eq!(prunable[0].0, old_id);

        engine.prune_booking(old_id).await.unwrap();
        let prunable = engine.collect_prunable(observed, retention);
        assert!(prunable.is_empty());
    }
}
