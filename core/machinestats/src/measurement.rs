//! Measurements and the accumulator that sources write them to.
//!
//! Every stat source produces zero or more [`Measurement`]s per poll.
//! A measurement is a named value with a [`StatKind`] that tells the metrics backend
//! how to aggregate it.
//!
//! # Producing measurements
//!
//! ```
//! use machinestats::measurement::{Measurement, MeasurementAccumulator};
//!
//! let mut acc = MeasurementAccumulator::new();
//! acc.push(Measurement::gauge("connections", 42u64));
//! acc.push(Measurement::gauge("cpu-load.total", 0.25));
//! assert_eq!(acc.len(), 2);
//! ```

use std::fmt;

use serde::Serialize;

/// How a measurement should be aggregated by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// An instantaneous value, the last one wins.
    Gauge,
    /// A value that is added to the previous ones.
    Counter,
}

/// A measured value, either an integer or a floating-point number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    U64(u64),
    F64(f64),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MeasurementValue::U64(v) => *v as f64,
            MeasurementValue::F64(v) => *v,
        }
    }

    /// Returns `false` if the value is NaN or infinite.
    ///
    /// Integers are always finite.
    pub fn is_finite(&self) -> bool {
        match self {
            MeasurementValue::U64(_) => true,
            MeasurementValue::F64(v) => v.is_finite(),
        }
    }
}

impl From<u64> for MeasurementValue {
    fn from(value: u64) -> Self {
        MeasurementValue::U64(value)
    }
}

impl From<f64> for MeasurementValue {
    fn from(value: f64) -> Self {
        MeasurementValue::F64(value)
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::U64(v) => write!(f, "{v}"),
            MeasurementValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// A value that has been measured, with its name and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub kind: StatKind,
    pub value: MeasurementValue,
}

impl Measurement {
    pub fn new(name: impl Into<String>, kind: StatKind, value: impl Into<MeasurementValue>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.into(),
        }
    }

    /// Creates a new gauge measurement.
    pub fn gauge(name: impl Into<String>, value: impl Into<MeasurementValue>) -> Self {
        Self::new(name, StatKind::Gauge, value)
    }

    /// Creates a new counter measurement.
    pub fn counter(name: impl Into<String>, value: impl Into<MeasurementValue>) -> Self {
        Self::new(name, StatKind::Counter, value)
    }
}

/// Collects the measurements produced by one source during one poll.
#[derive(Debug, Default)]
pub struct MeasurementAccumulator(Vec<Measurement>);

impl MeasurementAccumulator {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, point: Measurement) {
        self.0.push(point);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.0.iter()
    }

    /// Finds the first measurement with the given name.
    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.0.iter().find(|m| m.name == name)
    }
}

impl IntoIterator for MeasurementAccumulator {
    type Item = Measurement;
    type IntoIter = std::vec::IntoIter<Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Measurement, MeasurementValue, StatKind};

    #[test]
    fn finite_values() {
        assert!(MeasurementValue::U64(u64::MAX).is_finite());
        assert!(MeasurementValue::F64(0.5).is_finite());
        assert!(!MeasurementValue::F64(f64::NAN).is_finite());
        assert!(!MeasurementValue::F64(f64::INFINITY).is_finite());
    }

    #[test]
    fn constructors() {
        let m = Measurement::counter("requests", 3u64);
        assert_eq!(m.kind, StatKind::Counter);
        assert_eq!(m.value.as_f64(), 3.0);
        assert_eq!(Measurement::gauge("load", 0.5).value, MeasurementValue::F64(0.5));
    }
}
