//! http_request - outbound HTTP request

use crate::{Tool, ToolContext, ToolDef, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use warden_foundation::{Error, Result};

/// Maximum response body returned to the caller
const MAX_BODY_LENGTH: usize = 100_000;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct HttpRequestTool {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct HttpParams {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse_url(raw: &str) -> Result<url::Url> {
        let url = url::Url::parse(raw)
            .map_err(|e| Error::InvalidInput(format!("invalid url '{}': {}", raw, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::InvalidInput(format!(
                "unsupported url scheme '{}'",
                other
            ))),
        }
    }

    fn parse_method(raw: &str) -> Result<reqwest::Method> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(reqwest::Method::GET),
            "POST" => Ok(reqwest::Method::POST),
            "PUT" => Ok(reqwest::Method::PUT),
            "PATCH" => Ok(reqwest::Method::PATCH),
            "DELETE" => Ok(reqwest::Method::DELETE),
            "HEAD" => Ok(reqwest::Method::HEAD),
            other => Err(Error::InvalidInput(format!("unsupported method '{}'", other))),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("http_request", "Send an HTTP request and return the response body")
            .string_param("url", "Absolute http(s) URL", true)
            .enum_param(
                "method",
                "HTTP method (default: GET)",
                vec!["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"],
                false,
            )
            .object_param("headers", "Request headers", false)
            .string_param("body", "Request body", false)
            .integer_param("timeout", "Timeout in seconds (default: 30)", false)
            .build()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: HttpParams = serde_json::from_value(args)
            .map_err(|e| Error::InvalidInput(format!("http_request: invalid parameters: {}", e)))?;

        let url = Self::parse_url(&params.url)?;
        let method = Self::parse_method(&params.method)?;
        let timeout = Duration::from_secs(params.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1));

        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in &params.headers {
            request = request.header(name, value);
        }
        if let Some(body) = params.body {
            request = request.body(body);
        }

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("request failed: {}", e))),
        };

        let status = response.status();
        let mut body = response
            .text()
            .await
            .map_err(|e| Error::tool_execution("http_request", e.to_string()))?;
        if body.len() > MAX_BODY_LENGTH {
            let mut cut = MAX_BODY_LENGTH;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("\n... [truncated]");
        }

        let metadata = serde_json::json!({ "status": status.as_u16() });
        if status.is_success() {
            Ok(ToolResult::success_with_metadata(body, metadata))
        } else {
            Ok(ToolResult {
                success: false,
                content: body,
                metadata: Some(metadata),
                error: Some(format!("HTTP {}", status)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(HttpRequestTool::parse_url("https://example.com/a?b=1").is_ok());
        assert!(HttpRequestTool::parse_url("file:///etc/passwd").is_err());
        assert!(HttpRequestTool::parse_url("not a url").is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpRequestTool::parse_method("post").unwrap(), reqwest::Method::POST);
        assert!(HttpRequestTool::parse_method("TRACE").is_err());
    }

    #[test]
    fn test_definition() {
        let def = HttpRequestTool::new().definition();
        assert_eq!(def.name, "http_request");
        assert_eq!(def.parameters.required, vec!["url".to_string()]);
    }
}
