//! YARN application ids, `yarn-site.xml` discovery and ResourceManager metrics.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use st_types::{ClusterError, ClusterUsage};

static APP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"application_\d+_\d+").expect("Invalid application id regex"));

static PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<property>(.*?)</property>").expect("Invalid property regex")
});

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<name>\s*(.*?)\s*</name>").expect("Invalid name regex"));

static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<value>\s*(.*?)\s*</value>").expect("Invalid value regex"));

/// First YARN application id in the launcher's stderr, else its stdout.
pub fn extract_app_id(stderr: &str, stdout: &str) -> Option<String> {
    APP_ID_RE
        .find(stderr)
        .or_else(|| APP_ID_RE.find(stdout))
        .map(|m| m.as_str().to_string())
}

pub const YARN_SITE: &str = "yarn-site.xml";

const RM_ADDR: &str = "yarn.resourcemanager.address";
const RM_WEBAPP_ADDR: &str = "yarn.resourcemanager.webapp.address";
const RM_HA_ENABLED: &str = "yarn.resourcemanager.ha.enabled";
const HTTP_POLICY: &str = "yarn.http.policy";

/// Properties of a `yarn-site.xml` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YarnSite {
    properties: HashMap<String, String>,
}

impl YarnSite {
    /// Locate `yarn-site.xml` under `YARN_CONF_DIR`, then `HADOOP_CONF_DIR`.
    /// `Ok(None)` when neither holds one.
    pub fn discover() -> Result<Option<Self>, ClusterError> {
        let dirs = ["YARN_CONF_DIR", "HADOOP_CONF_DIR"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(PathBuf::from);
        Self::discover_in(dirs)
    }

    pub fn discover_in<I>(dirs: I) -> Result<Option<Self>, ClusterError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for dir in dirs {
            let path = dir.join(YARN_SITE);
            if path.is_file() {
                debug!(path = %path.display(), "found yarn-site.xml");
                return Self::from_file(&path).map(Some);
            }
        }
        Ok(None)
    }

    pub fn from_file(path: &Path) -> Result<Self, ClusterError> {
        let xml = std::fs::read_to_string(path).map_err(|e| ClusterError::SiteConfig {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Ok(Self::parse(&xml))
    }

    /// Collect `<name>`/`<value>` pairs of every `<property>` element.
    pub fn parse(xml: &str) -> Self {
        let properties = PROPERTY_RE
            .captures_iter(xml)
            .filter_map(|block| {
                let body = block.get(1)?.as_str();
                let name = NAME_RE.captures(body)?.get(1)?.as_str();
                let value = VALUE_RE
                    .captures(body)
                    .and_then(|c| c.get(1))
                    .map_or("", |m| m.as_str());
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Self { properties }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn protocol(&self) -> &'static str {
        match self.get(HTTP_POLICY) {
            Some(policy) if policy.eq_ignore_ascii_case("HTTPS_ONLY") => "https",
            _ => "http",
        }
    }

    pub fn webapp_port(&self) -> u16 {
        if self.protocol() == "https" {
            8090
        } else {
            8088
        }
    }

    pub fn is_ha(&self) -> bool {
        self.get(RM_HA_ENABLED)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// ResourceManager host with any port stripped.
    pub fn rm_host(&self) -> Result<&str, ClusterError> {
        let addr = self
            .get(RM_WEBAPP_ADDR)
            .or_else(|| self.get(RM_ADDR))
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ClusterError::NotConfigured {
                message: format!("no {RM_WEBAPP_ADDR} or {RM_ADDR} in {YARN_SITE}"),
            })?;
        Ok(addr.trim().split(':').next().unwrap_or(addr))
    }

    /// `protocol://host:port` of the ResourceManager web service.
    pub fn base_url(&self) -> Result<String, ClusterError> {
        if self.is_ha() {
            return Err(ClusterError::Unsupported {
                message: "high-availability ResourceManagers are not supported".to_string(),
            });
        }
        Ok(format!(
            "{}://{}:{}",
            self.protocol(),
            self.rm_host()?,
            self.webapp_port()
        ))
    }
}

/// Per-application usage reported by a cluster resource manager.
#[async_trait]
pub trait ClusterMetrics: Send + Sync {
    async fn app_usage(&self, app_id: &str) -> Result<ClusterUsage, ClusterError>;
}

/// Client for the YARN ResourceManager REST API.
#[derive(Debug, Clone)]
pub struct YarnClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl YarnClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn from_site(site: &YarnSite) -> Result<Self, ClusterError> {
        Ok(Self::new(site.base_url()?))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, route: &str) -> Result<serde_json::Value, ClusterError> {
        let url = format!("{}{route}", self.base_url);
        debug!(%url, "querying resource manager");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClusterError::Request {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClusterError::Request {
                message: format!("HTTP error: {status}"),
            });
        }
        if !status.is_success() {
            return Err(ClusterError::Response {
                message: format!("HTTP error: {status}"),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        if !is_json {
            return Err(ClusterError::Response {
                message: format!("expected a JSON response from {url}"),
            });
        }

        response.json().await.map_err(|e| ClusterError::Response {
            message: format!("Failed to parse JSON response: {e}"),
        })
    }

    /// `GET /ws/v1/cluster/info`; used to confirm the ResourceManager is up.
    pub async fn cluster_info(&self) -> Result<serde_json::Value, ClusterError> {
        let info = self.get_json("/ws/v1/cluster/info").await?;
        info!(base_url = %self.base_url, "resource manager reachable");
        Ok(info)
    }
}

#[async_trait]
impl ClusterMetrics for YarnClient {
    async fn app_usage(&self, app_id: &str) -> Result<ClusterUsage, ClusterError> {
        let body = self.get_json(&format!("/ws/v1/cluster/apps/{app_id}")).await?;
        parse_app_usage(&body)
    }
}

/// Read `memorySeconds`, `vcoreSeconds` and `elapsedTime` from an app report.
pub fn parse_app_usage(body: &serde_json::Value) -> Result<ClusterUsage, ClusterError> {
    let app = body.get("app").ok_or_else(|| ClusterError::Response {
        message: "response has no 'app' object".to_string(),
    })?;
    let field = |name: &str| app.get(name).and_then(serde_json::Value::as_f64);

    let memory_mb_seconds = field("memorySeconds").ok_or_else(|| ClusterError::Response {
        message: "app report has no memorySeconds".to_string(),
    })?;
    Ok(ClusterUsage {
        memory_mb_seconds,
        vcore_seconds: field("vcoreSeconds").unwrap_or(0.0),
        elapsed_secs: field("elapsedTime").unwrap_or(0.0) / 1000.0,
    })
}
