//! Background timers for the schedule consolidator.
//!
//! Grouping and promotion fire once a day at a fixed local hour; the expiry
//! sweep runs hourly. Each run only logs its failures and waits for the next
//! tick, since every job is safe to repeat.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use tokio::task::JoinHandle;

use crate::services::consolidator;
use crate::AppState;

/// How often stale schedules are expired.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(3600);

/// First instant strictly after `now` at which the local clock reads `hour:00`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, offset: FixedOffset) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let local_date = now.with_timezone(&offset).date_naive();
    let shift = TimeDelta::seconds(i64::from(offset.local_minus_utc()));

    let today = (local_date.and_time(at) - shift).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

async fn sleep_until_local_hour(hour: u32, offset: FixedOffset) {
    let now = Utc::now();
    let wait = (next_daily_run(now, hour, offset) - now)
        .to_std()
        .unwrap_or(Duration::from_secs(1));
    tokio::time::sleep(wait).await;
}

async fn nightly_grouping(state: AppState) {
    let hour = state.settings().nightly_grouping_hour;
    let offset = state.settings().local_offset();
    tracing::info!(hour, "nightly grouping job started");

    loop {
        sleep_until_local_hour(hour, offset).await;
        if let Err(err) = consolidator::run_nightly_grouping(&state, Utc::now()).await {
            tracing::error!(error = %err, "nightly grouping failed");
        }
    }
}

async fn morning_promotion(state: AppState) {
    let hour = state.settings().morning_promotion_hour;
    let offset = state.settings().local_offset();
    tracing::info!(hour, "morning promotion job started");

    loop {
        sleep_until_local_hour(hour, offset).await;
        if let Err(err) = consolidator::promote_overnight_queue(&state).await {
            tracing::error!(error = %err, "overnight promotion failed");
        }
    }
}

async fn expiry_sweep(state: AppState) {
    tracing::info!(interval_secs = EXPIRY_INTERVAL.as_secs(), "expiry sweep job started");
    let mut interval = tokio::time::interval(EXPIRY_INTERVAL);

    loop {
        interval.tick().await;
        match consolidator::expire_stale_schedules(&state, Utc::now()).await {
            Ok(report) if report.schedules_expired > 0 => {
                tracing::info!(
                    expired = report.schedules_expired,
                    cancelled = report.bookings_cancelled,
                    "expiry sweep purged stale schedules"
                );
            }
            Ok(_) => tracing::debug!("expiry sweep found nothing to expire"),
            Err(err) => tracing::error!(error = %err, "expiry sweep failed"),
        }
    }
}

/// Start all consolidator timers on the current runtime.
pub fn spawn_all(state: &AppState) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(nightly_grouping(state.clone())),
        tokio::spawn(morning_promotion(state.clone())),
        tokio::spawn(expiry_sweep(state.clone())),
    ]
}
