//! Check-in ingestion
//!
//! Validates a scan against an open window, classifies its timing, persists
//! the attendance record, scores it, and only then hands the fully-scored
//! record to the presence room for broadcast.
//!
//! Duplicate submissions are resolved by the storage-layer UNIQUE constraint
//! on (window_code, subject_user_id): the first writer wins and every other
//! submitter gets the existing record back, never an error.

use chrono::{DateTime, Utc};
use koino_common::db::models::{AttendanceRecord, CheckinWindow, Classification, RecordStatus};
use koino_common::events::{AttendanceView, KoinoEvent};
use koino_common::{Error, Result};
use tracing::warn;
use uuid::Uuid;

use crate::scoring::{badges, levels, streaks};
use crate::state::SharedState;

/// Result of a submission: the record plus whether this call created it
#[derive(Debug)]
pub struct SubmitOutcome {
    pub record: AttendanceRecord,
    pub created: bool,
    pub view: AttendanceView,
}

/// Classify a scan against the window's open minute
///
/// Windows without an open minute (manual entry) classify everything as
/// on-time. Any arrival strictly before the open minute is early; there is
/// no early margin.
fn classify(window: &CheckinWindow, minute_of_day: i64) -> Classification {
    match window.open_minute {
        None => Classification::OnTime,
        Some(open) => {
            let delta = minute_of_day - open;
            if delta < 0 {
                Classification::Early
            } else if delta <= window.late_margin_min {
                Classification::OnTime
            } else {
                Classification::Late
            }
        }
    }
}

/// Submit a scan against a window
///
/// Fails with `WindowNotFound` for unknown or expired codes. Re-submissions
/// for an already-recorded (window, subject) pair return the existing record.
pub async fn submit(
    state: &SharedState,
    window_code: &str,
    subject_user_id: Option<&str>,
    timestamp: DateTime<Utc>,
) -> Result<SubmitOutcome> {
    let window = fetch_window(state, window_code).await?;

    let local_date = state.calendar.local_date(timestamp);
    if local_date > window.event_date {
        return Err(Error::WindowNotFound(format!("{} (expired)", window_code)));
    }

    if let Some(user_id) = subject_user_id {
        if let Some(existing) = find_record(state, window_code, user_id).await? {
            // A scan against a still-pending manual entry confirms it
            if existing.status == RecordStatus::Pending {
                let view = confirm(state, &existing.id).await?;
                let record = AttendanceRecord {
                    status: RecordStatus::Confirmed,
                    ..existing
                };
                return Ok(SubmitOutcome {
                    record,
                    created: false,
                    view,
                });
            }
            // Idempotent return; re-running the grant here is a no-op that
            // heals a submission interrupted between insert and scoring
            score_and_follow_up(state, &existing, &window).await?;
            let view = build_view(state, &existing).await?;
            return Ok(SubmitOutcome {
                record: existing,
                created: false,
                view,
            });
        }
    }

    let classification = classify(&window, state.calendar.minute_of_day(timestamp));
    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        window_code: window_code.to_string(),
        subject_user_id: subject_user_id.map(str::to_string),
        recorded_at: timestamp,
        classification,
        status: RecordStatus::Confirmed,
    };

    let inserted = insert_record(state, &record).await?;
    let record = match inserted {
        Some(record) => record,
        None => {
            // Lost the race against a concurrent duplicate; the constraint
            // guarantees the winner's record exists
            let user_id = subject_user_id.ok_or_else(|| {
                Error::Internal("anonymous record insert conflicted".to_string())
            })?;
            let existing = find_record(state, window_code, user_id).await?.ok_or_else(|| {
                Error::Internal(format!(
                    "attendance for ({}, {}) vanished after conflict",
                    window_code, user_id
                ))
            })?;
            let view = build_view(state, &existing).await?;
            return Ok(SubmitOutcome {
                record: existing,
                created: false,
                view,
            });
        }
    };

    score_and_follow_up(state, &record, &window).await?;

    // Broadcast strictly after scoring: the room never sees a record with
    // missing point totals
    let view = build_view(state, &record).await?;
    state
        .rooms
        .publish(
            window_code,
            KoinoEvent::NewAttendance {
                window_code: window_code.to_string(),
                record: view.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

    Ok(SubmitOutcome {
        record,
        created: true,
        view,
    })
}

/// Record a manual (leader-entered) attendance as pending
///
/// Pending records are not scored; `confirm` promotes them. The room still
/// hears about the new record so rosters stay live.
pub async fn record_manual(
    state: &SharedState,
    window_code: &str,
    subject_user_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<SubmitOutcome> {
    let window = fetch_window(state, window_code).await?;

    if let Some(existing) = find_record(state, window_code, subject_user_id).await? {
        let view = build_view(state, &existing).await?;
        return Ok(SubmitOutcome {
            record: existing,
            created: false,
            view,
        });
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        window_code: window.code.clone(),
        subject_user_id: Some(subject_user_id.to_string()),
        recorded_at: timestamp,
        classification: Classification::OnTime,
        status: RecordStatus::Pending,
    };

    let record = match insert_record(state, &record).await? {
        Some(record) => record,
        None => {
            let existing = find_record(state, window_code, subject_user_id)
                .await?
                .ok_or_else(|| Error::Internal("pending record vanished after conflict".to_string()))?;
            let view = build_view(state, &existing).await?;
            return Ok(SubmitOutcome {
                record: existing,
                created: false,
                view,
            });
        }
    };

    let view = build_view(state, &record).await?;
    state
        .rooms
        .publish(
            window_code,
            KoinoEvent::NewAttendance {
                window_code: window_code.to_string(),
                record: view.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

    Ok(SubmitOutcome {
        record,
        created: true,
        view,
    })
}

/// Confirm a pending record, score it, and broadcast the update
///
/// Confirming an already-confirmed record is an idempotent no-op.
pub async fn confirm(state: &SharedState, record_id: &str) -> Result<AttendanceView> {
    let record = sqlx::query_as::<_, AttendanceRecord>("SELECT * FROM attendance_records WHERE id = ?")
        .bind(record_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("attendance record {}", record_id)))?;

    if record.status == RecordStatus::Confirmed {
        return build_view(state, &record).await;
    }

    sqlx::query("UPDATE attendance_records SET status = 'confirmed' WHERE id = ?")
        .bind(record_id)
        .execute(&state.db)
        .await?;
    let record = AttendanceRecord {
        status: RecordStatus::Confirmed,
        ..record
    };

    let window = fetch_window(state, &record.window_code).await?;
    score_and_follow_up(state, &record, &window).await?;

    let view = build_view(state, &record).await?;
    state
        .rooms
        .publish(
            &record.window_code,
            KoinoEvent::AttendanceUpdated {
                window_code: record.window_code.clone(),
                record: view.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

    Ok(view)
}

/// Publish a new check-in window
pub async fn create_window(
    state: &SharedState,
    code: &str,
    event_id: &str,
    event_date: chrono::NaiveDate,
    open_minute: Option<i64>,
    late_margin_min: Option<i64>,
) -> Result<CheckinWindow> {
    let window = CheckinWindow {
        code: code.to_string(),
        event_id: event_id.to_string(),
        event_date,
        open_minute,
        late_margin_min: late_margin_min.unwrap_or(state.config.default_late_margin_min),
        created_at: Utc::now(),
    };
    let inserted = sqlx::query(
        r#"
        INSERT INTO checkin_windows (code, event_id, event_date, open_minute, late_margin_min, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(code) DO NOTHING
        "#,
    )
    .bind(&window.code)
    .bind(&window.event_id)
    .bind(window.event_date)
    .bind(window.open_minute)
    .bind(window.late_margin_min)
    .bind(window.created_at)
    .execute(&state.db)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(Error::InvalidInput(format!("window code '{}' already exists", code)));
    }
    Ok(window)
}

/// Grant attendance points and run the derived-state follow-ups
///
/// Leveling, streak, and badge updates are best-effort: each is idempotent
/// and safely retried by the next triggering event, so a failure is logged
/// and never rolls back the point grant.
async fn score_and_follow_up(
    state: &SharedState,
    record: &AttendanceRecord,
    window: &CheckinWindow,
) -> Result<()> {
    let Some(user_id) = record.subject_user_id.as_deref() else {
        // Anonymous scans persist and broadcast, but grant nothing
        return Ok(());
    };

    let rule_code = match record.classification {
        Classification::Early => "attendance_early",
        Classification::OnTime => "attendance_on_time",
        Classification::Late => "attendance_late",
    };
    let period = state.scoring.active_period_id().await?;
    state
        .scoring
        .grant(user_id, rule_code, &record.id, "attendance", period.as_deref())
        .await?;

    let week_start = state.calendar.week_start(window.event_date);
    if let Err(e) = streaks::on_confirmed_attendance(&state.scoring, user_id, week_start).await {
        warn!("Streak update for {} failed (will retry next attendance): {}", user_id, e);
    }
    if let Err(e) = levels::resolve(&state.scoring, user_id, &state.event_tx).await {
        warn!("Level resolution for {} failed (will retry next grant): {}", user_id, e);
    }
    if let Err(e) = badges::evaluate(&state.scoring, user_id).await {
        warn!("Badge evaluation for {} failed (will retry next grant): {}", user_id, e);
    }

    Ok(())
}

async fn fetch_window(state: &SharedState, code: &str) -> Result<CheckinWindow> {
    sqlx::query_as::<_, CheckinWindow>("SELECT * FROM checkin_windows WHERE code = ?")
        .bind(code)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| Error::WindowNotFound(code.to_string()))
}

async fn find_record(
    state: &SharedState,
    window_code: &str,
    user_id: &str,
) -> Result<Option<AttendanceRecord>> {
    let record = sqlx::query_as::<_, AttendanceRecord>(
        "SELECT * FROM attendance_records WHERE window_code = ? AND subject_user_id = ?",
    )
    .bind(window_code)
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;
    Ok(record)
}

async fn insert_record(state: &SharedState, record: &AttendanceRecord) -> Result<Option<AttendanceRecord>> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO attendance_records (id, window_code, subject_user_id, recorded_at, classification, status)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(window_code, subject_user_id) DO NOTHING
        "#,
    )
    .bind(&record.id)
    .bind(&record.window_code)
    .bind(record.subject_user_id.as_deref())
    .bind(record.recorded_at)
    .bind(record.classification)
    .bind(record.status)
    .execute(&state.db)
    .await?;
    if inserted.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(record.clone()))
    }
}

/// Assemble the broadcast view of a record with its granted points and the
/// profile's current totals
async fn build_view(state: &SharedState, record: &AttendanceRecord) -> Result<AttendanceView> {
    let entry = state.scoring.find_by_source(&record.id, "attendance").await?;
    let profile = match record.subject_user_id.as_deref() {
        Some(user_id) => state.scoring.profile(user_id).await?,
        None => None,
    };
    Ok(AttendanceView {
        id: record.id.clone(),
        window_code: record.window_code.clone(),
        subject_user_id: record.subject_user_id.clone(),
        recorded_at: record.recorded_at,
        classification: record.classification,
        status: record.status,
        points_granted: entry.as_ref().map(|e| e.points),
        xp_granted: entry.as_ref().map(|e| e.xp),
        points_total: profile.as_ref().map(|p| p.points_total),
        xp_total: profile.as_ref().map(|p| p.xp_total),
    })
}
