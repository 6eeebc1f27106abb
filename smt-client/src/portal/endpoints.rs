//! Portal paths, headers and wire shapes.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://www.smartmetertexas.com";

pub const AUTHENTICATE: &str = "/commonapi/user/authenticate";
pub const DASHBOARD: &str = "/api/dashboard";
pub const ON_DEMAND_READ: &str = "/api/ondemandread";
pub const LATEST_ODR_READ: &str = "/api/usage/latestodrread";
pub const INTERVAL_USAGE: &str = "/api/usage/interval";

pub const ODR_SUBMITTED: &str = "Request submitted successfully for further processing";
/// The portal allows two on-demand reads per ESIID per hour.
pub const ODR_RATE_LIMITED: &str = "You have reached the limit of two On Demand Read request";

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                          (KHTML, like Gecko) Version/18.0 Safari/605.1.15";

/// The portal rejects requests that do not look like they came from its own web app.
pub fn browser_headers(base_url: &str, referer_path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    if let Ok(v) = HeaderValue::from_str(base_url) {
        headers.insert(ORIGIN, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{base_url}{referer_path}")) {
        headers.insert(REFERER, v);
    }
    headers
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DashboardResponse {
    pub data: Option<DashboardData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub default_meter_details: Option<MeterDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterDetails {
    pub esiid: String,
    pub meter_number: String,
}

#[derive(Debug, Deserialize)]
pub struct OnDemandReadResponse {
    pub data: Option<OnDemandReadData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandReadData {
    pub status_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LatestReadResponse {
    pub data: Option<LatestReadData>,
}

/// `odrread` arrives as a number or a string depending on the portal release.
#[derive(Debug, Deserialize)]
pub struct LatestReadData {
    pub odrread: Option<Value>,
    pub odrdate: Option<String>,
    pub odrstatus: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntervalResponse {
    #[serde(default)]
    pub intervaldata: Vec<IntervalRow>,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRow {
    pub date: String,
    pub starttime: String,
    pub consumption: Option<Value>,
}
