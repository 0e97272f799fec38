//! Daily metric aggregation.
//!
//! Flat summation of digest records into per-day totals. Only the six
//! tracked quantity kinds contribute; records with an unknown kind, an
//! unparsable value, or a malformed start date are skipped.

use super::HealthRecord;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Per-day running totals, in the source units (count, km, kcal, minutes).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyTotals {
    pub steps: f64,
    pub distance: f64,
    pub active: f64,
    pub basal: f64,
    pub flights: f64,
    pub exercise: f64,
}

/// The closed set of record kinds that feed a daily total.
enum Metric {
    Steps,
    Distance,
    Active,
    Basal,
    Flights,
    Exercise,
}

impl Metric {
    fn of(kind: &str) -> Option<Self> {
        match kind {
            "HKQuantityTypeIdentifierStepCount" => Some(Self::Steps),
            "HKQuantityTypeIdentifierDistanceWalkingRunning" => Some(Self::Distance),
            "HKQuantityTypeIdentifierActiveEnergyBurned" => Some(Self::Active),
            "HKQuantityTypeIdentifierBasalEnergyBurned" => Some(Self::Basal),
            "HKQuantityTypeIdentifierFlightsClimbed" => Some(Self::Flights),
            "HKQuantityTypeIdentifierAppleExerciseTime" => Some(Self::Exercise),
            _ => None,
        }
    }

    fn apply(&self, totals: &mut DailyTotals, value: f64) {
        match self {
            Self::Steps => totals.steps += value,
            Self::Distance => totals.distance += value,
            Self::Active => totals.active += value,
            Self::Basal => totals.basal += value,
            Self::Flights => totals.flights += value,
            Self::Exercise => totals.exercise += value,
        }
    }
}

/// Sum records into per-day totals, keyed by `YYYY-MM-DD`.
pub fn aggregate_daily(records: &[HealthRecord]) -> BTreeMap<String, DailyTotals> {
    let mut days: BTreeMap<String, DailyTotals> = BTreeMap::new();
    for record in records {
        let Some(metric) = Metric::of(&record.kind) else {
            continue;
        };
        let Some(day) = day_of(&record.start_date) else {
            continue;
        };
        let Some(value) = numeric_value(record.value.as_ref()) else {
            continue;
        };
        metric.apply(days.entry(day).or_default(), value);
    }
    days
}

/// Render per-day totals as wire-format summary objects, date ascending.
///
/// Counts round to whole numbers; continuous metrics keep four decimal
/// places so float noise from summation does not leak onto the wire.
pub fn build_summaries(days: &BTreeMap<String, DailyTotals>, export_date: &str) -> Vec<Value> {
    days.iter()
        .map(|(date, t)| {
            json!({
                "date": date,
                "steps": t.steps.round() as i64,
                "flights": t.flights.round() as i64,
                "distance": round4(t.distance),
                "active": round4(t.active),
                "basal": round4(t.basal),
                "exercise": round4(t.exercise),
                "exportDate": export_date,
            })
        })
        .collect()
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Extract the `YYYY-MM-DD` prefix of a record timestamp, if valid.
fn day_of(start_date: &str) -> Option<String> {
    let prefix: String = start_date
        .trim()
        .split(['T', ' '])
        .next()
        .unwrap_or(start_date)
        .chars()
        .take(10)
        .collect();
    chrono::NaiveDate::parse_from_str(&prefix, "%Y-%m-%d").ok()?;
    Some(prefix)
}

/// Coerce a digest value (number or numeric string) to f64.
fn numeric_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
