//! Built-in tool tests against mock upstream services.
//!
//! Each tool is pointed at a wiremock server and invoked through the
//! [`Tool`] trait, the way the orchestrator calls it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ada::tools::{Tool, ToolArgs, ToolResult, TravelTool, WeatherTool, WebSearchTool};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn args(pairs: &[(&str, &str)]) -> ToolArgs {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), json!(v)))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// get_weather
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_weather_reports_current_conditions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Reno%2C%20NV"))
        .and(query_param("format", "j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current_condition": [{
                "temp_F": "68",
                "precipMM": "0.0",
                "weatherDesc": [{"value": "Sunny "}]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tool = WeatherTool::new(server.uri());
    let value = tool.invoke(args(&[("location", "Reno, NV")])).await.unwrap();
    assert_eq!(
        value,
        json!({
            "location": "Reno, NV",
            "current_temp_f": 68,
            "precipitation": 0.0,
            "description": "Sunny"
        })
    );
}

#[tokio::test]
async fn test_weather_upstream_failure_is_an_error_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tool = WeatherTool::new(server.uri());
    let value = tool.invoke(args(&[("location", "Atlantis")])).await.unwrap();
    assert_eq!(value, json!({"error": "Could not fetch weather for Atlantis."}));

    let result = ToolResult::from_output("call_1", tool.name(), value);
    assert!(result.is_error);
}

#[tokio::test]
async fn test_weather_empty_report_is_an_error_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"current_condition": []})))
        .mount(&server)
        .await;

    let tool = WeatherTool::new(server.uri());
    let value = tool.invoke(args(&[("location", "Nowhere")])).await.unwrap();
    assert!(value.get("error").is_some());
}

// ────────────────────────────────────────────────────────────────────────────
// get_travel_duration
// ────────────────────────────────────────────────────────────────────────────

fn directions(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

#[tokio::test]
async fn test_travel_sends_route_parameters_and_reports_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directions/json"))
        .and(query_param("origin", "Reno, NV"))
        .and(query_param("destination", "Lake Tahoe, CA"))
        .and(query_param("mode", "driving"))
        .and(query_param("departure_time", "now"))
        .and(query_param("key", "maps-key"))
        .respond_with(directions(json!({
            "status": "OK",
            "routes": [{"legs": [{
                "duration": {"text": "55 mins", "value": 3300},
                "duration_in_traffic": {"text": "1 hour 5 mins", "value": 3900}
            }]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tool = TravelTool::new(
        format!("{}/directions/json", server.uri()),
        Some("maps-key".into()),
    );
    let value = tool
        .invoke(args(&[("origin", "Reno, NV"), ("destination", "Lake Tahoe, CA")]))
        .await
        .unwrap();
    assert_eq!(
        value,
        json!({
            "duration_result":
                "Estimated travel duration (driving, with current traffic): 1 hour 5 mins"
        })
    );
}

#[tokio::test]
async fn test_travel_zero_results_is_reported_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("mode", "walking"))
        .respond_with(directions(json!({"status": "ZERO_RESULTS", "routes": []})))
        .mount(&server)
        .await;

    let tool = TravelTool::new(server.uri(), Some("maps-key".into()));
    let value = tool
        .invoke(args(&[
            ("origin", "Reno, NV"),
            ("destination", "Honolulu, HI"),
            ("mode", "walking"),
        ]))
        .await
        .unwrap();
    assert_eq!(
        value["duration_result"],
        json!("Could not find a route from Reno, NV to Honolulu, HI via walking.")
    );
}

#[tokio::test]
async fn test_travel_request_denied_with_detail_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(directions(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid."
        })))
        .mount(&server)
        .await;

    let tool = TravelTool::new(server.uri(), Some("bad-key".into()));
    let value = tool
        .invoke(args(&[("origin", "A"), ("destination", "B")]))
        .await
        .unwrap();
    let text = value["duration_result"].as_str().unwrap();
    assert!(text.starts_with("Error contacting Google Maps"));
    assert!(text.contains("The provided API key is invalid."));
}

#[tokio::test]
async fn test_travel_without_key_never_calls_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(directions(json!({"status": "OK", "routes": []})))
        .expect(0)
        .mount(&server)
        .await;

    let tool = TravelTool::new(server.uri(), None);
    let value = tool
        .invoke(args(&[("origin", "A"), ("destination", "B")]))
        .await
        .unwrap();
    assert_eq!(
        value["duration_result"],
        json!("Error: Missing or invalid Google Maps API Key configuration.")
    );
}

// ────────────────────────────────────────────────────────────────────────────
// get_search_results
// ────────────────────────────────────────────────────────────────────────────

fn results_page(urls: &[String]) -> String {
    let results: String = urls
        .iter()
        .map(|u| {
            format!(
                r#"<div class="result results_links results_links_deep web-result">
                   <a class="result__a" href="{u}">result</a></div>"#
            )
        })
        .collect();
    format!("<html><body>{results}</body></html>")
}

#[tokio::test]
async fn test_search_fetches_and_summarizes_result_pages() {
    let server = MockServer::start().await;
    let pages = vec![
        format!("{}/pages/tahoe", server.uri()),
        format!("{}/pages/missing", server.uri()),
    ];
    Mock::given(method("POST"))
        .and(path("/html/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&pages)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/tahoe"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>Lake Tahoe</title>
               <meta name="description" content="Alpine lake on the state line.">
               </head><body><p>Lake Tahoe is a freshwater lake.</p></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pages/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tool = WebSearchTool::new(format!("{}/html/", server.uri()));
    let value = tool.invoke(args(&[("query", "lake tahoe")])).await.unwrap();

    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 1, "unreachable pages are skipped");
    assert_eq!(results[0]["url"], json!(pages[0]));
    assert_eq!(results[0]["title"], json!("Lake Tahoe"));
    assert_eq!(results[0]["meta_snippet"], json!("Alpine lake on the state line."));
    assert_eq!(
        results[0]["page_content_summary"],
        json!("Lake Tahoe is a freshwater lake.")
    );
}

#[tokio::test]
async fn test_search_with_no_results_returns_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(&[])))
        .mount(&server)
        .await;

    let tool = WebSearchTool::new(server.uri());
    let value = tool.invoke(args(&[("query", "zzzz")])).await.unwrap();
    assert_eq!(value, json!({"results": []}));
}

#[tokio::test]
async fn test_search_engine_failure_is_an_error_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tool = WebSearchTool::new(server.uri());
    let value = tool.invoke(args(&[("query", "rust")])).await.unwrap();
    let error = value["error"].as_str().unwrap();
    assert!(error.starts_with("Failed to execute web search with page content"));
}
