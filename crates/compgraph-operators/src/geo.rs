//! Geo and time mappers for trip/edge data.

use chrono::{Datelike, NaiveDateTime, Timelike};
use compgraph_core::types::Row;
use compgraph_core::Error;

use crate::traits::{Mapper, OpError};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two `[lon, lat]` points given
/// in decimal degrees.
pub fn haversine_km(start: [f64; 2], end: [f64; 2]) -> f64 {
    let (lon1, lat1) = (start[0].to_radians(), start[1].to_radians());
    let (lon2, lat2) = (end[0].to_radians(), end[1].to_radians());
    let dlon = lon2 - lon1;
    let dlat = lat2 - lat1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

fn point(row: &Row, field: &str) -> Result<[f64; 2], OpError> {
    match row.get_list(field)? {
        [lon, lat] => Ok([*lon, *lat]),
        other => Err(Error::Parse(format!(
            "'{field}' must be [lon, lat], got {} values",
            other.len()
        ))
        .into()),
    }
}

/// Writes the haversine length of the segment between two coordinate fields.
#[derive(Debug, Clone)]
pub struct StreetLength {
    start: String,
    end: String,
    result: String,
}

impl StreetLength {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            result: "length".into(),
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }
}

impl Mapper for StreetLength {
    fn name(&self) -> &'static str {
        "street_length"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let km = haversine_km(point(&row, &self.start)?, point(&row, &self.end)?);
        row.insert(self.result.clone(), km);
        Ok(vec![row])
    }
}

/// Accepted timestamp layouts, tried in order. `%.f` also matches no fraction.
const TIMESTAMP_FORMATS: &[&str] = &["%Y%m%dT%H%M%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, Error> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| Error::Parse(format!("unrecognized timestamp '{s}'")))
}

/// From enter/leave timestamps, writes the trip duration in hours plus the
/// weekday (`Mon`..`Sun`) and hour of day of the enter time.
#[derive(Debug, Clone)]
pub struct ProcessDate {
    enter: String,
    leave: String,
    weekday: String,
    hour: String,
    duration: String,
}

impl ProcessDate {
    pub fn new(enter: impl Into<String>, leave: impl Into<String>) -> Self {
        Self {
            enter: enter.into(),
            leave: leave.into(),
            weekday: "weekday".into(),
            hour: "hour".into(),
            duration: "duration".into(),
        }
    }

    pub fn with_outputs(
        mut self,
        weekday: impl Into<String>,
        hour: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        self.weekday = weekday.into();
        self.hour = hour.into();
        self.duration = duration.into();
        self
    }
}

impl Mapper for ProcessDate {
    fn name(&self) -> &'static str {
        "process_date"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let start = parse_timestamp(row.get_str(&self.enter)?)?;
        let end = parse_timestamp(row.get_str(&self.leave)?)?;
        let micros = (end - start)
            .num_microseconds()
            .ok_or_else(|| Error::Numeric(format!("'{}' overflows", self.duration)))?;
        row.insert(self.duration.clone(), micros as f64 / 3_600_000_000.0);
        row.insert(self.weekday.clone(), start.weekday().to_string());
        row.insert(self.hour.clone(), start.hour());
        Ok(vec![row])
    }
}
