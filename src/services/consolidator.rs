//! Batch jobs over pre-booked rides: nightly grouping into schedules,
//! morning promotion of the overnight queue, hourly expiry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeDelta, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::entities::schedule::{self, ScheduleStatus};
use crate::entities::user;
use crate::error::AppResult;
use crate::notify::{self, Notification, Recipient};
use crate::services::zones::ZoneClassifier;
use crate::AppState;

/// `[start, end)` of the local calendar day after `now`, in UTC.
pub fn operating_day_window(
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> (DateTime<FixedOffset>, DateTime<FixedOffset>) {
    let local_today = now.with_timezone(&offset).date_naive();
    let start_local = local_today
        .checked_add_days(Days::new(1))
        .unwrap_or(local_today)
        .and_time(NaiveTime::MIN);
    let start = (start_local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))).and_utc();
    let end = start + TimeDelta::days(1);
    (start.fixed_offset(), end.fixed_offset())
}

#[derive(Debug, Clone)]
pub struct BookingGroup {
    pub departure: DateTime<Utc>,
    pub zone: String,
    pub members: Vec<booking::Model>,
}

impl BookingGroup {
    pub fn total_passengers(&self) -> i32 {
        self.members.iter().map(|b| b.passengers).sum()
    }

    /// Synthesized pickup summary; members keep their own origins.
    pub fn origin_area(&self) -> String {
        let origins: BTreeSet<String> = self
            .members
            .iter()
            .map(|b| b.origin.trim().to_lowercase())
            .collect();
        format!("Pickup group ({} locations)", origins.len())
    }
}

/// Group bookings by (exact departure, destination zone).
///
/// A group bigger than one vehicle is cut into consecutive chunks that each
/// fit `capacity`, in booking creation order. Bookings without a departure
/// are skipped. Output order is deterministic: departure, then zone.
pub fn group_bookings(
    bookings: Vec<booking::Model>,
    zones: &dyn ZoneClassifier,
    capacity: i32,
) -> Vec<BookingGroup> {
    let mut keyed: BTreeMap<(DateTime<Utc>, String), Vec<booking::Model>> = BTreeMap::new();
    for booking in bookings {
        let Some(departure) = booking.scheduled_departure else {
            continue;
        };
        let zone = zones.classify(&booking.destination);
        keyed
            .entry((departure.with_timezone(&Utc), zone))
            .or_default()
            .push(booking);
    }

    let mut groups = Vec::new();
    for ((departure, zone), mut members) in keyed {
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut chunk: Vec<booking::Model> = Vec::new();
        let mut seats = 0;
        for booking in members {
            if !chunk.is_empty() && seats + booking.passengers > capacity {
                groups.push(BookingGroup {
                    departure,
                    zone: zone.clone(),
                    members: std::mem::take(&mut chunk),
                });
                seats = 0;
            }
            seats += booking.passengers;
            chunk.push(booking);
        }
        if !chunk.is_empty() {
            groups.push(BookingGroup {
                departure,
                zone,
                members: chunk,
            });
        }
    }
    groups
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupingReport {
    pub schedules_created: usize,
    pub bookings_linked: u64,
}

/// Turn tomorrow's unlinked SCHEDULED bookings into AVAILABLE schedules.
///
/// Only bookings with no schedule link are picked up, and linking is
/// conditional on that, so re-running after a partial run only groups what is
/// left.
pub async fn run_nightly_grouping(state: &AppState, now: DateTime<Utc>) -> AppResult<GroupingReport> {
    let settings = state.settings();
    let (start, end) = operating_day_window(now, settings.local_offset());

    let bookings = booking::Entity::find()
        .filter(booking::Column::Status.eq(BookingStatus::Scheduled))
        .filter(booking::Column::ScheduleId.is_null())
        .filter(booking::Column::ScheduledDeparture.gte(start))
        .filter(booking::Column::ScheduledDeparture.lt(end))
        .order_by_asc(booking::Column::CreatedAt)
        .all(&state.db)
        .await?;

    let groups = group_bookings(bookings, state.zones.as_ref(), settings.trip_capacity);
    let mut report = GroupingReport::default();

    for group in groups {
        if let Some(linked) = persist_group(state, &group).await? {
            report.schedules_created += 1;
            report.bookings_linked += linked;
        }
    }

    tracing::info!(
        window_start = %start,
        schedules = report.schedules_created,
        bookings = report.bookings_linked,
        "nightly grouping finished"
    );
    Ok(report)
}

async fn persist_group(state: &AppState, group: &BookingGroup) -> AppResult<Option<u64>> {
    let txn = state.db.begin().await?;

    let schedule = schedule::ActiveModel {
        id: Set(Uuid::new_v4()),
        departure_time: Set(group.departure.fixed_offset()),
        destination: Set(group.zone.clone()),
        origin_area: Set(group.origin_area()),
        total_passengers: Set(group.total_passengers()),
        status: Set(ScheduleStatus::Available),
        trip_id: Set(None),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(&txn)
    .await?;

    let member_ids: Vec<Uuid> = group.members.iter().map(|b| b.id).collect();
    let linked = booking::Entity::update_many()
        .col_expr(booking::Column::ScheduleId, Expr::value(schedule.id))
        .filter(booking::Column::Id.is_in(member_ids))
        .filter(booking::Column::ScheduleId.is_null())
        .filter(booking::Column::Status.eq(BookingStatus::Scheduled))
        .exec(&txn)
        .await?
        .rows_affected;

    if linked == 0 {
        // Everything was grouped or cancelled meanwhile; drop the empty schedule
        return Ok(None);
    }

    if linked < group.members.len() as u64 {
        let total: i32 = booking::Entity::find()
            .filter(booking::Column::ScheduleId.eq(schedule.id))
            .all(&txn)
            .await?
            .iter()
            .map(|b| b.passengers)
            .sum();
        schedule::Entity::update_many()
            .col_expr(schedule::Column::TotalPassengers, Expr::value(total))
            .filter(schedule::Column::Id.eq(schedule.id))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;
    tracing::debug!(schedule_id = %schedule.id, zone = %group.zone, linked, "schedule created");
    Ok(Some(linked))
}

/// QUEUED_OVERNIGHT -> SCHEDULED for every queued booking.
pub async fn promote_overnight_queue(state: &AppState) -> AppResult<u64> {
    let promoted = booking::Entity::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Scheduled))
        .filter(booking::Column::Status.eq(BookingStatus::QueuedOvernight))
        .exec(&state.db)
        .await?
        .rows_affected;

    tracing::info!(promoted, "overnight queue promoted");
    Ok(promoted)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub schedules_expired: usize,
    pub bookings_cancelled: u64,
}

/// Expire AVAILABLE schedules whose departure has passed and cancel their
/// still-SCHEDULED members. Riders are told afterwards.
pub async fn expire_stale_schedules(state: &AppState, now: DateTime<Utc>) -> AppResult<ExpiryReport> {
    let now = now.fixed_offset();
    let stale = schedule::Entity::find()
        .filter(schedule::Column::Status.eq(ScheduleStatus::Available))
        .filter(schedule::Column::DepartureTime.lt(now))
        .all(&state.db)
        .await?;

    let mut report = ExpiryReport::default();
    for schedule in stale {
        let txn = state.db.begin().await?;

        let expired = schedule::Entity::update_many()
            .col_expr(schedule::Column::Status, Expr::value(ScheduleStatus::Expired))
            .filter(schedule::Column::Id.eq(schedule.id))
            .filter(schedule::Column::Status.eq(ScheduleStatus::Available))
            .filter(schedule::Column::DepartureTime.lt(now))
            .exec(&txn)
            .await?;
        if expired.rows_affected == 0 {
            // Claimed between the scan and now
            continue;
        }

        let cancellable = BookingStatus::sources_of(BookingStatus::Cancelled);
        let riders: Vec<user::Model> = booking::Entity::find()
            .filter(booking::Column::ScheduleId.eq(schedule.id))
            .filter(booking::Column::Status.is_in(cancellable.clone()))
            .find_also_related(user::Entity)
            .all(&txn)
            .await?
            .into_iter()
            .filter_map(|(_, rider)| rider)
            .collect();

        let cancelled = booking::Entity::update_many()
            .col_expr(booking::Column::Status, Expr::value(BookingStatus::Cancelled))
            .filter(booking::Column::ScheduleId.eq(schedule.id))
            .filter(booking::Column::Status.is_in(cancellable))
            .exec(&txn)
            .await?
            .rows_affected;

        txn.commit().await?;

        report.schedules_expired += 1;
        report.bookings_cancelled += cancelled;
        tracing::info!(schedule_id = %schedule.id, cancelled, "schedule expired unclaimed");

        let departure = schedule
            .departure_time
            .with_timezone(&state.settings().local_offset())
            .format("%d %b %H:%M");
        let message = Notification::text(format!(
            "Sorry, no driver took the {departure} ride to {}. Your booking was cancelled, please book again.",
            schedule.destination
        ));
        for rider in riders {
            notify::deliver(state.notifier.as_ref(), &Recipient::Chat(rider.phone), &message).await;
        }
    }

    Ok(report)
}
