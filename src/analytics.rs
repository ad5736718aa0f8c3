//! Site analytics summary backed by the Google Analytics Data API.
//!
//! The route only talks to [`AnalyticsProvider`]; [`GoogleAnalytics`] is the
//! production implementation and tests plug in canned reports.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::config::AnalyticsConfig;

const DATA_API_BASE: &str = "https://analyticsdata.googleapis.com/v1beta";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const PAGE_PATH: &str = "pagePath";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedField {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricOrder {
    pub metric_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBy {
    pub metric: MetricOrder,
    pub desc: bool,
}

/// Body of a `runReport` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub date_ranges: Vec<DateRange>,
    pub dimensions: Vec<NamedField>,
    pub metrics: Vec<NamedField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_bys: Vec<OrderBy>,
}

impl ReportRequest {
    fn new(start_date: &str, dimensions: &[&str], metrics: &[&str]) -> Self {
        Self {
            date_ranges: vec![DateRange { start_date: start_date.to_string(), end_date: "today".to_string() }],
            dimensions: dimensions.iter().map(|d| NamedField { name: d.to_string() }).collect(),
            metrics: metrics.iter().map(|m| NamedField { name: m.to_string() }).collect(),
            order_bys: Vec::new(),
        }
    }

    fn order_by_desc(mut self, metric: &str) -> Self {
        self.order_bys.push(OrderBy { metric: MetricOrder { metric_name: metric.to_string() }, desc: true });
        self
    }

    /// Site-wide totals over the last week.
    pub fn basic() -> Self {
        Self::new("7daysAgo", &[], &["screenPageViews", "totalUsers", "newUsers", "engagementRate"])
    }

    /// Most viewed pages over the last month.
    pub fn popular() -> Self {
        Self::new("30daysAgo", &[PAGE_PATH, "pageTitle"], &["screenPageViews"]).order_by_desc("screenPageViews")
    }

    /// Most viewed pages since yesterday.
    pub fn trending() -> Self {
        Self::new("1daysAgo", &[PAGE_PATH, "pageTitle"], &["screenPageViews"]).order_by_desc("screenPageViews")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportValue {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(default)]
    pub dimension_values: Vec<ReportValue>,
    #[serde(default)]
    pub metric_values: Vec<ReportValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportResponse {
    #[serde(default)]
    pub rows: Vec<ReportRow>,
}

#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    async fn run_report(&self, request: &ReportRequest) -> anyhow::Result<ReportResponse>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSummary {
    pub basic: Map<String, Value>,
    pub popular: Vec<Map<String, Value>>,
    pub trending: Vec<Map<String, Value>>,
}

/// Runs the three reports concurrently. A failing report is logged and leaves its
/// section empty.
pub async fn summarize(provider: &dyn AnalyticsProvider) -> AnalyticsSummary {
    let (basic, popular, trending) = (ReportRequest::basic(), ReportRequest::popular(), ReportRequest::trending());
    let (basic_res, popular_res, trending_res) = futures::join!(
        run_logged(provider, "basic", &basic),
        run_logged(provider, "popular", &popular),
        run_logged(provider, "trending", &trending),
    );

    AnalyticsSummary {
        basic: basic_res.map(|r| basic_totals(&r)).unwrap_or_default(),
        popular: popular_res.map(|r| page_entries(&popular, &r)).unwrap_or_default(),
        trending: trending_res.map(|r| page_entries(&trending, &r)).unwrap_or_default(),
    }
}

async fn run_logged(provider: &dyn AnalyticsProvider, alias: &str, request: &ReportRequest) -> Option<ReportResponse> {
    match provider.run_report(request).await {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::error!(report = alias, "Analytics report failed: {:#}", e);
            None
        }
    }
}

fn metric_or_null(row: &ReportRow, idx: usize) -> Value {
    row.metric_values
        .get(idx)
        .map(|v| v.value.clone())
        .filter(|v| !v.is_empty())
        .map(Value::String)
        .unwrap_or(Value::Null)
}

/// `{pageViews, totalVisitors, newVisitors, engagementRate}` from the basic report.
pub fn basic_totals(response: &ReportResponse) -> Map<String, Value> {
    let mut totals = Map::new();
    if let Some(row) = response.rows.last() {
        totals.insert("pageViews".into(), metric_or_null(row, 0));
        totals.insert("totalVisitors".into(), metric_or_null(row, 1));
        totals.insert("newVisitors".into(), metric_or_null(row, 2));
        totals.insert("engagementRate".into(), metric_or_null(row, 3));
    }
    totals
}

/// Strips the trailing slash of every path except the root.
pub fn normalize_page_path(path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }
    path.strip_suffix('/').unwrap_or(path).to_string()
}

/// One entry per page path, carrying the other dimensions and the metrics by name.
/// A path seen twice keeps its first position and its latest values.
pub fn page_entries(request: &ReportRequest, response: &ReportResponse) -> Vec<Map<String, Value>> {
    let mut entries: Vec<(String, Map<String, Value>)> = Vec::new();

    for row in &response.rows {
        if row.dimension_values.is_empty() {
            continue;
        }
        let mut item = Map::new();
        let mut path = String::new();
        for (dimension, value) in request.dimensions.iter().zip(&row.dimension_values) {
            if dimension.name == PAGE_PATH {
                path = normalize_page_path(&value.value);
            } else {
                item.insert(dimension.name.clone(), Value::String(value.value.clone()));
            }
        }
        for (metric, value) in request.metrics.iter().zip(&row.metric_values) {
            item.insert(metric.name.clone(), Value::String(value.value.clone()));
        }
        item.insert("path".into(), Value::String(path.clone()));

        match entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, existing)) => *existing = item,
            None => entries.push((path, item)),
        }
    }

    entries.into_iter().map(|(_, item)| item).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Google Analytics Data API client authenticated as a service account.
pub struct GoogleAnalytics {
    client: reqwest::Client,
    property_id: String,
    key: ServiceAccountKey,
    token: Mutex<Option<(String, Instant)>>,
}

impl GoogleAnalytics {
    pub fn new(property_id: String, key: ServiceAccountKey) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, property_id, key, token: Mutex::new(None) })
    }

    /// Builds the provider from configuration; `Ok(None)` when analytics are not set up.
    pub fn from_config(cfg: &AnalyticsConfig) -> anyhow::Result<Option<Arc<dyn AnalyticsProvider>>> {
        let path = match (&cfg.credentials_path, cfg.property_id.trim().is_empty()) {
            (Some(path), false) => path,
            _ => return Ok(None),
        };
        let key = load_key(path)?;
        Ok(Some(Arc::new(Self::new(cfg.property_id.trim().to_string(), key)?)))
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() + Duration::from_secs(60) < *expires {
                return Ok(token.clone());
            }
        }

        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims { iss: &self.key.client_email, scope: READONLY_SCOPE, aud: token_uri, iat: now, exp: now + 3600 };
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?,
        )?;

        let response: TokenResponse = self
            .client
            .post(token_uri)
            .json(&serde_json::json!({
                "grant_type": "urn:ietf:params:oauth:grant-type:jwt-bearer",
                "assertion": assertion,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let expires = Instant::now() + Duration::from_secs(response.expires_in);
        *cached = Some((response.access_token.clone(), expires));
        Ok(response.access_token)
    }
}

#[async_trait]
impl AnalyticsProvider for GoogleAnalytics {
    async fn run_report(&self, request: &ReportRequest) -> anyhow::Result<ReportResponse> {
        let token = self.access_token().await?;
        let url = format!("{}/properties/{}:runReport", DATA_API_BASE, self.property_id);
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<ReportResponse>()
            .await?;
        Ok(response)
    }
}

fn load_key(path: &Path) -> anyhow::Result<ServiceAccountKey> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read analytics credentials {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}
