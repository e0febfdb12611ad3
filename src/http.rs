use std::thread;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};

use crate::config::ClientArgs;
use crate::error::ProvisionError;

const PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformTag {
    SevenBridges,
    Tower,
    Synapse,
}

impl PlatformTag {
    fn http_error(self, message: String) -> ProvisionError {
        match self {
            PlatformTag::SevenBridges => ProvisionError::SbgHttp(message),
            PlatformTag::Tower => ProvisionError::TowerHttp(message),
            PlatformTag::Synapse => ProvisionError::SynapseHttp(message),
        }
    }

    fn status_error(self, status: u16, message: String) -> ProvisionError {
        match self {
            PlatformTag::SevenBridges => ProvisionError::SbgStatus { status, message },
            PlatformTag::Tower => ProvisionError::TowerStatus { status, message },
            PlatformTag::Synapse => ProvisionError::SynapseStatus { status, message },
        }
    }
}

/// Blocking JSON transport shared by the platform clients: bearer-token auth,
/// bounded retry on transient failures, and `max`/`offset` pagination over a
/// `totalSize` response envelope.
pub struct Transport {
    client: Client,
    base_url: String,
    token: String,
    tag: PlatformTag,
}

impl Transport {
    pub fn new(args: &ClientArgs, tag: PlatformTag) -> Result<Self, ProvisionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bioprov/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| tag.http_error(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| tag.http_error(err.to_string()))?;
        Ok(Self {
            client,
            base_url: args.endpoint.trim_end_matches('/').to_string(),
            token: args.auth_token.clone(),
            tag,
        })
    }

    pub fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ProvisionError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.send_with_retries(|| {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .query(params);
            if let Some(body) = body {
                request = request.json(body);
            }
            request
        })?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(self.tag.status_error(status.as_u16(), message));
        }
        let text = response
            .text()
            .map_err(|err| self.tag.http_error(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&text).map_err(|err| self.tag.http_error(err.to_string()))
    }

    /// Collects every item across pages of a list endpoint. Each page carries
    /// a `totalSize` field and a single items field (named differently per
    /// endpoint), so the items field is discovered rather than hardcoded.
    pub fn paged(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, ProvisionError> {
        let mut items = Vec::new();
        let mut total_size = 1usize;
        while items.len() < total_size {
            let mut page_params = params.to_vec();
            page_params.push(("max".to_string(), PAGE_SIZE.to_string()));
            page_params.push(("offset".to_string(), items.len().to_string()));
            let response = self.request(Method::GET, endpoint, &page_params, None)?;
            total_size = response
                .get("totalSize")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let page = extract_items(&response)
                .ok_or_else(|| self.tag.http_error("paged response has no items field".into()))?;
            if page.is_empty() {
                break;
            }
            items.extend(page.iter().cloned());
        }
        Ok(items)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, ProvisionError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(self.tag.http_error(err.to_string()));
                }
            }
        }
    }
}

fn extract_items(response: &Value) -> Option<&Vec<Value>> {
    let object = response.as_object()?;
    if let Some(items) = object.get("items").and_then(Value::as_array) {
        return Some(items);
    }
    object
        .iter()
        .filter(|(key, _)| *key != "totalSize")
        .find_map(|(_, value)| value.as_array())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_items_field() {
        let response = json!({"totalSize": 2, "items": [1, 2]});
        assert_eq!(extract_items(&response).unwrap().len(), 2);
    }

    #[test]
    fn extracts_named_items_field() {
        let response = json!({"totalSize": 1, "workflows": [{"id": "w1"}]});
        assert_eq!(extract_items(&response).unwrap().len(), 1);
    }

    #[test]
    fn no_items_field() {
        let response = json!({"totalSize": 0});
        assert!(extract_items(&response).is_none());
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }
}
