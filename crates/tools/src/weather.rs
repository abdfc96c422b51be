//! Weather lookup: deterministic mock weather for a location.
//!
//! No weather API key is configured for the search server, so the report is
//! derived from a hash of the location name. The same location always yields
//! the same report, which keeps the weather scenario testable offline.

use async_trait::async_trait;
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolOutput};

use crate::http::required_str;

pub struct WeatherSearchTool;

#[async_trait]
impl Tool for WeatherSearchTool {
    fn name(&self) -> &str {
        "weather_search"
    }

    fn description(&self) -> &str {
        "天気情報を検索して取得する"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "場所（都市名、地域名など）"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let location = required_str(&arguments, "location")?;
        tracing::debug!(location = %location, "Weather search");
        Ok(ToolOutput::text(mock_weather(location).render()))
    }
}

struct WeatherReport<'a> {
    location: &'a str,
    conditions: &'static str,
    temperature_c: f64,
    humidity: u32,
    wind_kmh: u32,
    wind_direction: &'static str,
}

impl WeatherReport<'_> {
    fn render(&self) -> String {
        format!(
            "{}の天気情報（モックデータ）\n\n天気: {}\n気温: {:.1}°C\n湿度: {}%\n風: {} {}km/h\n\n注意: 実際の気象APIではなく、地名から生成した参考値です。",
            self.location,
            self.conditions,
            self.temperature_c,
            self.humidity,
            self.wind_direction,
            self.wind_kmh,
        )
    }
}

fn mock_weather(location: &str) -> WeatherReport<'_> {
    let hash: u32 = location
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    const CONDITIONS: [&str; 8] = ["快晴", "晴れ", "薄曇り", "曇り", "小雨", "雨", "雷雨", "霧"];
    const DIRECTIONS: [&str; 8] = ["北", "北東", "東", "南東", "南", "南西", "西", "北西"];

    WeatherReport {
        location,
        conditions: CONDITIONS[(hash as usize / 7) % CONDITIONS.len()],
        // -5.0 to 34.5
        temperature_c: ((hash % 80) as f64) / 2.0 - 5.0,
        humidity: 30 + (hash % 60),
        wind_kmh: 2 + (hash % 30),
        wind_direction: DIRECTIONS[(hash as usize / 3) % DIRECTIONS.len()],
    }
}
