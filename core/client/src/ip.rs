//! IP-based geolocation providers.

use attendance_daemon_protocol::valid_coordinates;
use serde_json::Value;
use std::time::Duration;

pub trait IpProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Returns `(latitude, longitude)` from a structurally valid response.
    fn lookup(&self, timeout: Duration) -> Result<(f64, f64), String>;
}

/// A JSON geolocation endpoint described by its URL and coordinate fields.
pub struct HttpIpProvider {
    name: String,
    url: String,
    latitude_field: String,
    longitude_field: String,
}

impl HttpIpProvider {
    pub fn new(name: &str, url: &str, latitude_field: &str, longitude_field: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            latitude_field: latitude_field.to_string(),
            longitude_field: longitude_field.to_string(),
        }
    }
}

impl IpProvider for HttpIpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, timeout: Duration) -> Result<(f64, f64), String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("client build failed: {}", err))?;
        let body: Value = client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| format!("request failed: {}", err))?
            .json()
            .map_err(|err| format!("invalid JSON: {}", err))?;
        coordinates_from_json(&body, &self.latitude_field, &self.longitude_field)
            .ok_or_else(|| "response carried no usable coordinates".to_string())
    }
}

pub fn default_providers() -> Vec<Box<dyn IpProvider>> {
    vec![
        Box::new(HttpIpProvider::new(
            "ipapi.co",
            "https://ipapi.co/json/",
            "latitude",
            "longitude",
        )),
        Box::new(HttpIpProvider::new(
            "ipwho.is",
            "https://ipwho.is/",
            "latitude",
            "longitude",
        )),
        Box::new(HttpIpProvider::new(
            "ip-api.com",
            "http://ip-api.com/json/",
            "lat",
            "lon",
        )),
        Box::new(HttpIpProvider::new(
            "freeipapi.com",
            "https://freeipapi.com/api/json",
            "latitude",
            "longitude",
        )),
    ]
}

/// Reads both fields as numbers or numeric strings and range-checks them.
pub fn coordinates_from_json(
    body: &Value,
    latitude_field: &str,
    longitude_field: &str,
) -> Option<(f64, f64)> {
    let latitude = numeric_field(body, latitude_field)?;
    let longitude = numeric_field(body, longitude_field)?;
    valid_coordinates(latitude, longitude).then_some((latitude, longitude))
}

fn numeric_field(body: &Value, field: &str) -> Option<f64> {
    match body.get(field)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
