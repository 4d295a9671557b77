//! Market registry client: search and detail over a remote MCP catalog.

use std::time::Duration;

use {
    serde::Serialize,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    ssrf::SsrfGuard,
};

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.smithery.ai";
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketItem {
    pub qualified_name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPagination {
    pub current_page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPage {
    pub items: Vec<MarketItem>,
    pub pagination: MarketPagination,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketConnection {
    #[serde(rename = "type")]
    pub kind: String,
    pub deployment_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetail {
    pub qualified_name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub connections: Vec<MarketConnection>,
}

/// SSRF-guarded HTTP client against a registry.
pub struct MarketClient {
    http: reqwest::Client,
    guard: SsrfGuard,
    base_url: String,
}

impl MarketClient {
    pub fn new(base_url: Option<String>, guard: SsrfGuard) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REGISTRY_TIMEOUT)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            guard,
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
        })
    }

    /// `GET {base}/servers?q=…&page=…&pageSize=…`
    pub async fn search(
        &self,
        query: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<MarketPage> {
        let mut url = format!(
            "{}/servers?page={}&pageSize={}",
            self.base_url.trim_end_matches('/'),
            page.max(1),
            page_size.clamp(1, 100),
        );
        if let Some(q) = query {
            if !q.trim().is_empty() {
                url.push_str("&q=");
                url.push_str(&urlencode(q.trim()));
            }
        }
        let body = self.fetch(&url).await?;

        let servers = body
            .get("servers")
            .or_else(|| body.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let items: Vec<MarketItem> = servers.iter().filter_map(parse_item).collect();

        let p = body.get("pagination").cloned().unwrap_or_default();
        let pagination = MarketPagination {
            current_page: p.get("currentPage").and_then(Value::as_u64).unwrap_or(page),
            page_size: p.get("pageSize").and_then(Value::as_u64).unwrap_or(page_size),
            total_pages: p.get("totalPages").and_then(Value::as_u64).unwrap_or(1),
            total_count: p
                .get("totalCount")
                .and_then(Value::as_u64)
                .unwrap_or(items.len() as u64),
        };
        debug!(count = items.len(), "market search results");
        Ok(MarketPage { items, pagination })
    }

    /// `GET {base}/servers/{qualifiedName}`
    pub async fn detail(&self, qualified_name: &str) -> Result<MarketDetail> {
        let url = format!(
            "{}/servers/{}",
            self.base_url.trim_end_matches('/'),
            urlencode(qualified_name)
        );
        let body = self.fetch(&url).await?;
        parse_detail(&body)
            .ok_or_else(|| Error::Protocol(format!("registry returned no server '{qualified_name}'")))
    }

    async fn fetch(&self, url: &str) -> Result<Value> {
        self.guard.check_url(url).await?;
        let resp = self.http.get(url).send().await.map_err(Error::Http)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Protocol(format!(
                "registry returned HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        resp.json().await.map_err(Error::Http)
    }
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            },
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn parse_item(value: &Value) -> Option<MarketItem> {
    let qualified_name = value.get("qualifiedName")?.as_str()?.to_string();
    let display_name = value
        .get("displayName")
        .and_then(Value::as_str)
        .unwrap_or(&qualified_name)
        .to_string();
    Some(MarketItem {
        qualified_name,
        display_name,
        description: value
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        icon_url: value
            .get("iconUrl")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_detail(value: &Value) -> Option<MarketDetail> {
    let item = parse_item(value)?;
    let connections = value
        .get("connections")
        .and_then(Value::as_array)
        .map(|conns| {
            conns
                .iter()
                .filter_map(|c| {
                    // Only HTTP connections are supported.
                    let kind = c.get("type").and_then(Value::as_str).unwrap_or("http");
                    if kind != "http" {
                        return None;
                    }
                    let deployment_url = c
                        .get("deploymentUrl")
                        .or_else(|| c.get("url"))
                        .and_then(Value::as_str)?
                        .to_string();
                    Some(MarketConnection {
                        kind: "http".into(),
                        deployment_url,
                        auth_type: c
                            .get("authType")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        config_schema: c.get("configSchema").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(MarketDetail {
        qualified_name: item.qualified_name,
        display_name: item.display_name,
        description: item.description,
        icon_url: item.icon_url,
        connections,
    })
}
