use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{
        coordinate_from_columns, format_datetime, parse_datetime, parse_optional_datetime, to_i64,
        to_u32, to_u8,
    },
    models::TripRecord,
};
use crate::trip::{Coordinate, TripState};

const TRIP_COLUMNS: &str = "id, start_time, end_time, duration_secs, distance_m, average_speed_mph,
    max_speed_mph, start_latitude, start_longitude, end_latitude, end_longitude, route_json,
    apps_blocked, safety_score, distractions, is_active, trip_state, speed_history_json";

fn row_to_trip(row: &Row) -> Result<TripRecord> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let route_json: String = row.get("route_json")?;
    let apps_blocked: i64 = row.get("apps_blocked")?;
    let safety_score: i64 = row.get("safety_score")?;
    let distractions: i64 = row.get("distractions")?;
    let is_active: i64 = row.get("is_active")?;
    let trip_state: Option<String> = row.get("trip_state")?;
    let speed_history_json: Option<String> = row.get("speed_history_json")?;

    let route: Vec<Coordinate> =
        serde_json::from_str(&route_json).context("failed to parse route_json")?;
    let speed_history = speed_history_json
        .map(|raw| serde_json::from_str::<Vec<f64>>(&raw))
        .transpose()
        .context("failed to parse speed_history_json")?;

    Ok(TripRecord {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        duration_secs: row.get("duration_secs")?,
        distance_m: row.get("distance_m")?,
        average_speed_mph: row.get("average_speed_mph")?,
        max_speed_mph: row.get("max_speed_mph")?,
        start_location: coordinate_from_columns(
            row.get("start_latitude")?,
            row.get("start_longitude")?,
        ),
        end_location: coordinate_from_columns(row.get("end_latitude")?, row.get("end_longitude")?),
        route,
        apps_blocked: to_u32(apps_blocked, "apps_blocked")?,
        safety_score: to_u8(safety_score, "safety_score")?,
        distractions: to_u32(distractions, "distractions")?,
        is_active_trip: is_active != 0,
        trip_state: trip_state.as_deref().map(TripState::parse).transpose()?,
        speed_history,
    })
}

fn insert_trip(conn: &Connection, record: &TripRecord) -> Result<()> {
    let route_json = serde_json::to_string(&record.route)?;
    let speed_history_json = record
        .speed_history
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT OR REPLACE INTO trips (
            id, start_time, end_time, duration_secs, distance_m, average_speed_mph,
            max_speed_mph, start_latitude, start_longitude, end_latitude, end_longitude,
            route_json, apps_blocked, safety_score, distractions, is_active, trip_state,
            speed_history_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            record.id,
            format_datetime(&record.start_time),
            record.end_time.as_ref().map(format_datetime),
            record.duration_secs,
            record.distance_m,
            record.average_speed_mph,
            record.max_speed_mph,
            record.start_location.map(|c| c.latitude),
            record.start_location.map(|c| c.longitude),
            record.end_location.map(|c| c.latitude),
            record.end_location.map(|c| c.longitude),
            route_json,
            i64::from(record.apps_blocked),
            i64::from(record.safety_score),
            i64::from(record.distractions),
            i64::from(record.is_active_trip),
            record.trip_state.map(|state| state.as_str()),
            speed_history_json,
            format_datetime(&Utc::now()),
        ],
    )
    .with_context(|| format!("failed to write trip {}", record.id))?;
    Ok(())
}

fn collect_trips(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TripRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut trips = Vec::new();
    while let Some(row) = rows.next()? {
        trips.push(row_to_trip(row)?);
    }
    Ok(trips)
}

impl Database {
    /// Replaces whatever active row exists with `record` in one transaction.
    pub async fn upsert_active_trip(&self, record: TripRecord) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute("DELETE FROM trips WHERE is_active = 1", [])?;
            insert_trip(tx, &record)
        })
        .await
        .context("failed to save active trip")
    }

    pub async fn get_active_trip(&self) -> Result<Option<TripRecord>> {
        self.execute(|conn| {
            let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE is_active = 1 LIMIT 1");
            let mut trips = collect_trips(conn, &sql, [])?;
            Ok(trips.pop())
        })
        .await
    }

    /// Drops the active row and stores the finished one atomically.
    pub async fn complete_trip(&self, record: TripRecord) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute("DELETE FROM trips WHERE is_active = 1", [])?;
            insert_trip(tx, &record)
        })
        .await
        .context("failed to save completed trip")
    }

    pub async fn delete_active_trip(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM trips WHERE is_active = 1", [])?;
            Ok(())
        })
        .await
    }

    pub async fn list_trips_paginated(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TripRecord>> {
        let limit = to_i64(limit as u64)?;
        let offset = to_i64(offset as u64)?;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {TRIP_COLUMNS} FROM trips
                 WHERE is_active = 0
                 ORDER BY start_time DESC
                 LIMIT ?1 OFFSET ?2"
            );
            collect_trips(conn, &sql, params![limit, offset])
        })
        .await
    }

    pub async fn list_trips_since(&self, since: DateTime<Utc>) -> Result<Vec<TripRecord>> {
        let since = format_datetime(&since);
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {TRIP_COLUMNS} FROM trips
                 WHERE is_active = 0 AND start_time >= ?1
                 ORDER BY start_time DESC"
            );
            collect_trips(conn, &sql, params![since])
        })
        .await
    }

    /// Number of active rows; never more than one.
    pub async fn count_active_trips(&self) -> Result<u32> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM trips WHERE is_active = 1", [], |row| {
                    row.get(0)
                })?;
            to_u32(count, "active trip count")
        })
        .await
    }
}
