//! `get_weather`: current conditions from the wttr.in JSON API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::types::{Tool, ToolArgs, ToolError, required_str};

/// Default wttr.in endpoint.
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://wttr.in";

#[derive(Debug, Deserialize)]
struct WttrReport {
    current_condition: Vec<WttrCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WttrCondition {
    #[serde(rename = "temp_F")]
    temp_f: String,
    #[serde(rename = "precipMM", default)]
    precip_mm: String,
    #[serde(default)]
    weather_desc: Vec<WttrValue>,
}

#[derive(Debug, Deserialize)]
struct WttrValue {
    value: String,
}

/// Looks up current weather for a location (imperial units).
pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherTool {
    /// Create a tool talking to `base_url` (normally [`DEFAULT_WEATHER_BASE_URL`]).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn fetch(&self, location: &str) -> Result<Value, ToolError> {
        let url = format!("{}/{}", self.base_url, urlencoding::encode(location));
        let response = self
            .client
            .get(&url)
            .query(&[("format", "j1")])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::Upstream(format!("HTTP {}", response.status())));
        }
        let report: WttrReport = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("malformed weather report: {e}")))?;
        let current = report
            .current_condition
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Upstream("no current conditions".into()))?;

        let temp: Value = current
            .temp_f
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(current.temp_f));
        let precipitation: Value = current
            .precip_mm
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(Value::String(current.precip_mm));
        let description = current
            .weather_desc
            .into_iter()
            .map(|d| d.value.trim().to_owned())
            .find(|d| !d.is_empty())
            .unwrap_or_default();

        Ok(json!({
            "location": location,
            "current_temp_f": temp,
            "precipitation": precipitation,
            "description": description,
        }))
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new(DEFAULT_WEATHER_BASE_URL)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather conditions (temperature, precipitation, description) for a \
         specified city and state/country (e.g., 'Vinings, GA', 'London, UK')."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g., San Francisco, CA or Vinings, GA"
                }
            },
            "required": ["location"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let location = required_str(&args, "location")?;
        match self.fetch(location).await {
            Ok(weather) => {
                debug!(location, %weather, "weather fetched");
                Ok(weather)
            }
            Err(e) => {
                warn!(location, "weather lookup failed: {e}");
                Ok(json!({ "error": format!("Could not fetch weather for {location}.") }))
            }
        }
    }
}
