//! `get_travel_duration`: Google Maps Directions lookup.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::types::{Tool, ToolArgs, ToolError, optional_str, required_str};

/// Default Directions API endpoint.
pub const DEFAULT_DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

const MISSING_KEY: &str = "Error: Missing or invalid Google Maps API Key configuration.";

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    duration: Option<TextValue>,
    duration_in_traffic: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    text: String,
}

/// Estimates travel time between two places.
pub struct TravelTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl TravelTool {
    /// Create a tool. A `None` or blank key makes every call report a
    /// configuration error.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    async fn lookup(
        &self,
        key: &str,
        origin: &str,
        destination: &str,
        mode: &str,
    ) -> Result<String, ToolError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("origin", origin),
                ("destination", destination),
                ("mode", mode),
                ("departure_time", "now"),
                ("key", key),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        let body: DirectionsResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("malformed directions response: {e}")))?;

        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" | "NOT_FOUND" => {
                return Ok(format!(
                    "Could not find a route from {origin} to {destination} via {mode}."
                ));
            }
            "REQUEST_DENIED" if body.error_message.is_none() => return Ok(MISSING_KEY.into()),
            status => {
                let detail = body.error_message.unwrap_or_else(|| status.to_owned());
                return Err(ToolError::Upstream(detail));
            }
        }

        let Some(leg) = body.routes.into_iter().flat_map(|r| r.legs).next() else {
            return Ok(format!(
                "Could not find a route from {origin} to {destination} via {mode}."
            ));
        };
        Ok(describe_leg(&leg, mode))
    }
}

fn describe_leg(leg: &Leg, mode: &str) -> String {
    match (&leg.duration_in_traffic, &leg.duration) {
        (Some(traffic), _) if mode == "driving" => format!(
            "Estimated travel duration ({mode}, with current traffic): {}",
            traffic.text
        ),
        (_, Some(duration)) => format!("Estimated travel duration ({mode}): {}", duration.text),
        _ => format!("Duration information not found in response for {mode}."),
    }
}

#[async_trait]
impl Tool for TravelTool {
    fn name(&self) -> &str {
        "get_travel_duration"
    }

    fn description(&self) -> &str {
        "Calculates the estimated travel duration between a specified origin and destination \
         using Google Maps. Considers current traffic for driving mode."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "origin": {
                    "type": "string",
                    "description": "The starting address or place name."
                },
                "destination": {
                    "type": "string",
                    "description": "The destination address or place name."
                },
                "mode": {
                    "type": "string",
                    "description": "Optional: Mode of transport ('driving', 'walking', etc.). Defaults to 'driving'."
                }
            },
            "required": ["origin", "destination"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let origin = required_str(&args, "origin")?;
        let destination = required_str(&args, "destination")?;
        let mode = optional_str(&args, "mode").unwrap_or("driving");

        let Some(key) = self.api_key.as_deref() else {
            warn!("travel lookup without a maps API key");
            return Ok(json!({ "duration_result": MISSING_KEY }));
        };

        let result = match self.lookup(key, origin, destination, mode).await {
            Ok(text) => text,
            Err(e) => {
                warn!(origin, destination, mode, "directions lookup failed: {e}");
                format!("Error contacting Google Maps: {e}")
            }
        };
        debug!(origin, destination, mode, result = %result, "travel duration");
        Ok(json!({ "duration_result": result }))
    }
}
