//! Generic HTTP webhook notifier.
//!
//! Delivers alert notifications as JSON payloads to configured webhook URLs
//! with optional custom headers.

use std::collections::HashMap;

use crate::traits::{Notification, Notifier, NotifyError};

/// Delivers notifications as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookNotifier {
    /// Target URL (env vars already resolved).
    url: String,
    method: reqwest::Method,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier. `method` defaults to `POST`.
    ///
    /// Missing env vars referenced by `url` or a header value produce a
    /// [`NotifyError::Config`] error.
    pub fn new(
        client: reqwest::Client,
        url: &str,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
    ) -> Result<Self, NotifyError> {
        let resolved_url = resolve_env_vars(url)?;

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            client,
        })
    }

    /// Construct from config-level strings. `method` is parsed
    /// case-insensitively (e.g. `"post"`, `"PUT"`).
    pub fn from_config(
        client: reqwest::Client,
        url: &str,
        method: Option<&str>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self, NotifyError> {
        let parsed_method = method
            .map(|m| {
                m.to_uppercase()
                    .parse::<reqwest::Method>()
                    .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {m}")))
            })
            .transpose()?;

        Self::new(client, url, parsed_method, headers.unwrap_or_default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .json(notification);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(url = %self.url, %status, body = %body, "webhook returned non-2xx status");
            return Err(NotifyError::Rejected {
                service: "webhook".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %self.url, method = %self.method, %status, "webhook notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Expand `${NAME}` references from the process environment.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find('}')
            .ok_or_else(|| NotifyError::Config(format!("unclosed env var reference in: {input}")))?;
        let name = &after[..close];
        let value =
            std::env::var(name).map_err(|_| NotifyError::Config(format!("env var not found: {name}")))?;
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[test]
    fn resolve_env_vars_multiple() {
        std::env::set_var("WARDEN_WH_PROTO", "https");
        std::env::set_var("WARDEN_WH_HOST", "hooks.test");
        let result = resolve_env_vars("${WARDEN_WH_PROTO}://${WARDEN_WH_HOST}/alerts").unwrap();
        assert_eq!(result, "https://hooks.test/alerts");
        std::env::remove_var("WARDEN_WH_PROTO");
        std::env::remove_var("WARDEN_WH_HOST");
    }

    #[test]
    fn resolve_env_vars_missing() {
        match resolve_env_vars("https://${WARDEN_WH_NOT_SET_31337}/hook") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("WARDEN_WH_NOT_SET_31337")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_env_vars_unclosed() {
        match resolve_env_vars("https://${UNCLOSED/hook") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("unclosed")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn plain_urls_pass_through() {
        let notifier = WebhookNotifier::from_config(client(), "https://plain.example.com/hook", None, None).unwrap();
        assert_eq!(notifier.url(), "https://plain.example.com/hook");
        assert_eq!(notifier.method, reqwest::Method::POST);
        assert_eq!(notifier.channel_name(), "webhook");
    }

    #[test]
    fn from_config_case_insensitive_method() {
        let notifier = WebhookNotifier::from_config(client(), "https://example.com", Some("put"), None).unwrap();
        assert_eq!(notifier.method, reqwest::Method::PUT);
    }

    #[test]
    fn from_config_invalid_method() {
        let result = WebhookNotifier::from_config(client(), "https://example.com", Some("NOT A METHOD"), None);
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[test]
    fn from_config_resolves_header_values() {
        std::env::set_var("WARDEN_WH_TOKEN", "secret-key-123");
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer ${WARDEN_WH_TOKEN}".to_string()),
            ("X-Static".to_string(), "fixed-value".to_string()),
        ]);
        let notifier = WebhookNotifier::from_config(client(), "https://example.com", None, Some(headers)).unwrap();
        assert_eq!(notifier.headers["Authorization"], "Bearer secret-key-123");
        assert_eq!(notifier.headers["X-Static"], "fixed-value");
        std::env::remove_var("WARDEN_WH_TOKEN");
    }
}
