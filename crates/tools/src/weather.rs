//! Weather lookup tool with deterministic offline data.
//!
//! Readings are derived from a hash of the location so repeated lookups agree
//! and the loop can be exercised end-to-end without network access.

use async_trait::async_trait;
use reagent_core::error::ToolError;
use reagent_core::tool::Tool;
use serde::Serialize;
use serde_json::Value;

pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a city. Returns temperature, conditions, humidity and wind."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name, e.g. 'Paris'"
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "default": "metric"
                }
            },
            "required": ["city"]
        })
    }

    fn group(&self) -> Option<&str> {
        Some("weather")
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        // Older prompts call the argument "location".
        let city = arguments
            .get("city")
            .or_else(|| arguments.get("location"))
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'city' argument".into()))?;

        let units = arguments.get("units").and_then(Value::as_str).unwrap_or("metric");
        let reading = Reading::for_city(city.trim(), units);
        tracing::debug!(city, units, "Weather lookup");

        serde_json::to_value(reading).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "get_weather".into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct Reading {
    city: String,
    temperature: f64,
    units: &'static str,
    conditions: &'static str,
    humidity: u32,
    wind_kph: f64,
}

const CONDITIONS: [&str; 6] = [
    "Clear",
    "Partly cloudy",
    "Overcast",
    "Light rain",
    "Thunderstorms",
    "Fog",
];

impl Reading {
    fn for_city(city: &str, units: &str) -> Self {
        let hash = city
            .to_lowercase()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));

        let celsius = f64::from(hash % 35) - 5.0;
        let (temperature, label) = if units == "imperial" {
            (celsius * 9.0 / 5.0 + 32.0, "°F")
        } else {
            (celsius, "°C")
        };

        Self {
            city: city.to_string(),
            temperature: (temperature * 10.0).round() / 10.0,
            units: label,
            conditions: CONDITIONS[(hash as usize / 7) % CONDITIONS.len()],
            humidity: 30 + hash % 60,
            wind_kph: f64::from(hash % 30) + 3.0,
        }
    }
}
