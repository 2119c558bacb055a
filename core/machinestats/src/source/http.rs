//! Numeric fields of a JSON document served over HTTP.

use std::time::Duration;

use anyhow::{Context, anyhow};
use serde_json::{Map, Value};

use crate::measurement::{Measurement, MeasurementAccumulator};

use super::error::MeasureError;

/// Fetches a JSON object and emits each of its numeric fields as a gauge.
///
/// Nested objects are flattened: `{"a": {"b": 1}}` gives `a.b = 1`.
pub struct HttpJsonStat {
    name: String,
    url: String,
    prefix: Option<String>,
    client: reqwest::Client,
}

impl HttpJsonStat {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        prefix: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build the http client")?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            prefix: prefix.filter(|p| !p.is_empty()),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let object = self.fetch().await.map_err(MeasureError::Http)?;
        let mut values = Vec::new();
        flatten_map(&object, self.prefix.as_deref(), &mut values);
        for (name, value) in values {
            acc.push(Measurement::gauge(name, value));
        }
        Ok(())
    }

    async fn fetch(&self) -> anyhow::Result<Map<String, Value>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .error_for_status()?;
        let body = response.bytes().await.context("failed to read the response body")?;
        match serde_json::from_slice::<Value>(&body).context("invalid json")? {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!("expected a json object, got: {other}")),
        }
    }
}

/// Flattens the numeric and boolean leaves of `map` into `out`.
///
/// Keys are joined with `.`, and prefixed with `prefix` if there is one.
/// Booleans become 0 or 1. Strings, arrays and nulls are skipped.
pub fn flatten_map(map: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<(String, f64)>) {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => out.push((name, v)),
                None => log::debug!("{name}: number not representable as f64, skipped"),
            },
            Value::Bool(b) => out.push((name, if *b { 1.0 } else { 0.0 })),
            Value::Object(inner) => flatten_map(inner, Some(&name), out),
            Value::String(_) | Value::Array(_) | Value::Null => (),
        }
    }
}
