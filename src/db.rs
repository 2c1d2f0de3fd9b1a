use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Alert, AlertStatus, Event, EventStatus, Severity, Signal, SignalType};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Serializes all writers touching one location key. Released at commit.
pub async fn lock_location_key<'e>(
    ex: impl PgExecutor<'e>,
    location_key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(location_key)
        .execute(ex)
        .await?;
    Ok(())
}

fn parse_col<T>(row: &PgRow, col: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(col)?;
    raw.parse().map_err(|value: String| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: format!("unrecognized value: {value}").into(),
    })
}

fn signal_from_row(row: &PgRow) -> Result<Signal, sqlx::Error> {
    Ok(Signal {
        id: row.try_get("id")?,
        signal_type: parse_col(row, "signal_type")?,
        location: row.try_get("location")?,
        location_key: row.try_get("location_key")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        severity: parse_col(row, "severity")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        event_id: row.try_get("event_id")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        location: row.try_get("location")?,
        location_key: row.try_get("location_key")?,
        event_type: parse_col(row, "event_type")?,
        severity: parse_col(row, "severity")?,
        status: parse_col(row, "status")?,
        signal_count: row.try_get("signal_count")?,
        description: row.try_get("description")?,
        first_signal_at: row.try_get("first_signal_at")?,
        last_signal_at: row.try_get("last_signal_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert, sqlx::Error> {
    Ok(Alert {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        title: row.try_get("title")?,
        location: row.try_get("location")?,
        severity: parse_col(row, "severity")?,
        event_status: parse_col(row, "event_status")?,
        status: parse_col(row, "status")?,
        issued_at: row.try_get("issued_at")?,
    })
}

pub async fn insert_signal<'e>(
    ex: impl PgExecutor<'e>,
    signal: &Signal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO epiwatch.signals
        (id, signal_type, location, location_key, latitude, longitude,
         severity, notes, created_at, event_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(signal.id)
    .bind(signal.signal_type.as_str())
    .bind(&signal.location)
    .bind(&signal.location_key)
    .bind(signal.latitude)
    .bind(signal.longitude)
    .bind(signal.severity.as_str())
    .bind(&signal.notes)
    .bind(signal.created_at)
    .bind(signal.event_id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn fetch_open_events<'e>(
    ex: impl PgExecutor<'e>,
    location_key: &str,
) -> Result<Vec<Event>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM epiwatch.events
        WHERE location_key = $1 AND status IN ('monitoring', 'active')
        ORDER BY updated_at DESC
        "#,
    )
    .bind(location_key)
    .fetch_all(ex)
    .await?;

    rows.iter().map(event_from_row).collect()
}

pub async fn fetch_event<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Event>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM epiwatch.events WHERE id = $1")
        .bind(id)
        .fetch_optional(ex)
        .await?;

    row.as_ref().map(event_from_row).transpose()
}

pub async fn fetch_unattributed_signals<'e>(
    ex: impl PgExecutor<'e>,
    location_key: &str,
) -> Result<Vec<Signal>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM epiwatch.signals
        WHERE location_key = $1 AND event_id IS NULL
        ORDER BY created_at
        "#,
    )
    .bind(location_key)
    .fetch_all(ex)
    .await?;

    rows.iter().map(signal_from_row).collect()
}

pub async fn fetch_members<'e>(
    ex: impl PgExecutor<'e>,
    event_id: Uuid,
) -> Result<Vec<Signal>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM epiwatch.signals WHERE event_id = $1 ORDER BY created_at",
    )
    .bind(event_id)
    .fetch_all(ex)
    .await?;

    rows.iter().map(signal_from_row).collect()
}

pub async fn count_members_since<'e>(
    ex: impl PgExecutor<'e>,
    event_id: Uuid,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT count(*) AS n FROM epiwatch.signals WHERE event_id = $1 AND created_at >= $2",
    )
    .bind(event_id)
    .bind(since)
    .fetch_one(ex)
    .await?;
    row.try_get("n")
}

pub async fn insert_event<'e>(ex: impl PgExecutor<'e>, event: &Event) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO epiwatch.events
        (id, title, location, location_key, event_type, severity, status,
         signal_count, description, first_signal_at, last_signal_at,
         created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(event.id)
    .bind(&event.title)
    .bind(&event.location)
    .bind(&event.location_key)
    .bind(event.event_type.as_str())
    .bind(event.severity.as_str())
    .bind(event.status.as_str())
    .bind(event.signal_count)
    .bind(&event.description)
    .bind(event.first_signal_at)
    .bind(event.last_signal_at)
    .bind(event.created_at)
    .bind(event.updated_at)
    .execute(ex)
    .await?;
    Ok(())
}

/// Writes back every derived field. created_at is included because a
/// merge keeps the earliest created_at of the merged events.
pub async fn update_event<'e>(ex: impl PgExecutor<'e>, event: &Event) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE epiwatch.events
        SET title = $2, location = $3, event_type = $4, severity = $5,
            status = $6, signal_count = $7, description = $8,
            first_signal_at = $9, last_signal_at = $10, created_at = $11,
            updated_at = $12
        WHERE id = $1
        "#,
    )
    .bind(event.id)
    .bind(&event.title)
    .bind(&event.location)
    .bind(event.event_type.as_str())
    .bind(event.severity.as_str())
    .bind(event.status.as_str())
    .bind(event.signal_count)
    .bind(&event.description)
    .bind(event.first_signal_at)
    .bind(event.last_signal_at)
    .bind(event.created_at)
    .bind(event.updated_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn assign_signals<'e>(
    ex: impl PgExecutor<'e>,
    signal_ids: &[Uuid],
    event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE epiwatch.signals SET event_id = $1 WHERE id = ANY($2)")
        .bind(event_id)
        .bind(signal_ids)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn reassign_event_signals<'e>(
    ex: impl PgExecutor<'e>,
    from_event: Uuid,
    to_event: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE epiwatch.signals SET event_id = $1 WHERE event_id = $2")
        .bind(to_event)
        .bind(from_event)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn delete_event<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM epiwatch.events WHERE id = $1")
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn mark_event_resolved<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE epiwatch.events SET status = 'resolved', updated_at = $2 WHERE id = $1")
        .bind(id)
        .bind(now)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn fetch_active_alert<'e>(
    ex: impl PgExecutor<'e>,
    event_id: Uuid,
) -> Result<Option<Alert>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM epiwatch.alerts WHERE event_id = $1 AND status = 'active'",
    )
    .bind(event_id)
    .fetch_optional(ex)
    .await?;

    row.as_ref().map(alert_from_row).transpose()
}

pub async fn insert_alert<'e>(ex: impl PgExecutor<'e>, alert: &Alert) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO epiwatch.alerts
        (id, event_id, title, location, severity, event_status, status, issued_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(alert.id)
    .bind(alert.event_id)
    .bind(&alert.title)
    .bind(&alert.location)
    .bind(alert.severity.as_str())
    .bind(alert.event_status.as_str())
    .bind(alert.status.as_str())
    .bind(alert.issued_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn mark_alert<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    status: AlertStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE epiwatch.alerts SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(ex)
        .await?;
    Ok(())
}

/// Propagates an event's resolution to its standing alert, in place.
/// Resolution never issues a new alert.
pub async fn resolve_event_alerts<'e>(
    ex: impl PgExecutor<'e>,
    event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE epiwatch.alerts
        SET status = 'resolved', event_status = 'resolved'
        WHERE event_id = $1 AND status = 'active'
        "#,
    )
    .bind(event_id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn list_events(
    pool: &PgPool,
    status: Option<EventStatus>,
    severity: Option<Severity>,
    limit: i64,
) -> Result<Vec<Event>, sqlx::Error> {
    let mut query = String::from("SELECT * FROM epiwatch.events WHERE TRUE");
    let mut arg = 0;

    if status.is_some() {
        arg += 1;
        query.push_str(&format!(" AND status = ${arg}"));
    }
    if severity.is_some() {
        arg += 1;
        query.push_str(&format!(" AND severity = ${arg}"));
    }
    query.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", arg + 1));

    let mut rows = sqlx::query(&query);
    if let Some(status) = status {
        rows = rows.bind(status.as_str());
    }
    if let Some(severity) = severity {
        rows = rows.bind(severity.as_str());
    }

    let records = rows.bind(limit).fetch_all(pool).await?;
    records.iter().map(event_from_row).collect()
}

pub async fn list_signals(
    pool: &PgPool,
    location: Option<&str>,
    signal_type: Option<SignalType>,
    severity: Option<Severity>,
    limit: i64,
) -> Result<Vec<Signal>, sqlx::Error> {
    let mut query = String::from("SELECT * FROM epiwatch.signals WHERE TRUE");
    let mut arg = 0;

    if location.is_some() {
        arg += 1;
        query.push_str(&format!(" AND location_key = ${arg}"));
    }
    if signal_type.is_some() {
        arg += 1;
        query.push_str(&format!(" AND signal_type = ${arg}"));
    }
    if severity.is_some() {
        arg += 1;
        query.push_str(&format!(" AND severity = ${arg}"));
    }
    query.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", arg + 1));

    let mut rows = sqlx::query(&query);
    if let Some(location) = location {
        rows = rows.bind(crate::cluster::location_key(location));
    }
    if let Some(signal_type) = signal_type {
        rows = rows.bind(signal_type.as_str());
    }
    if let Some(severity) = severity {
        rows = rows.bind(severity.as_str());
    }

    let records = rows.bind(limit).fetch_all(pool).await?;
    records.iter().map(signal_from_row).collect()
}

pub async fn list_alerts(pool: &PgPool, limit: i64) -> Result<Vec<Alert>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM epiwatch.alerts ORDER BY issued_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(alert_from_row).collect()
}

pub async fn delete_signal(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM epiwatch.signals WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Open events whose cached last signal is older than the cool-down
/// cutoff. Candidates only; the sweep re-checks recency under the
/// location-key lock before committing a resolution.
pub async fn stale_open_events(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Event>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM epiwatch.events
        WHERE status IN ('monitoring', 'active') AND last_signal_at < $1
        ORDER BY last_signal_at
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter().map(event_from_row).collect()
}

/// Current span of an event's members, straight from the signals table so
/// administrative deletions are reflected. None when no members remain.
pub async fn member_span<'e>(
    ex: impl PgExecutor<'e>,
    event_id: Uuid,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, i64)>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT min(created_at) AS first, max(created_at) AS last, count(*) AS n
        FROM epiwatch.signals WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .fetch_one(ex)
    .await?;

    let first: Option<DateTime<Utc>> = row.try_get("first")?;
    let last: Option<DateTime<Utc>> = row.try_get("last")?;
    let n: i64 = row.try_get("n")?;
    Ok(match (first, last) {
        (Some(first), Some(last)) => Some((first, last, n)),
        _ => None,
    })
}
