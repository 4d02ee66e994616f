use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::config::RemoteSettings;
use crate::credentials::Token;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_text;

const API_MESSAGE_MAX_CHARS: usize = 200;

/// Where a freshly created remote resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub id: String,
    pub url: String,
}

/// The remote key-value resource the backup is written to.
///
/// `exists` never fails: anything short of a confirmed `200` is `false`, which is what lets
/// a run recover from a resource deleted out-of-band.
pub trait RemoteStore {
    fn create(&self, content: &str) -> Result<RemoteRef>;
    /// Returns a fresh display URL when the service reports one.
    fn update(&self, id: &str, content: &str) -> Result<Option<String>>;
    fn exists(&self, id: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct GistBody {
    id: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

pub struct GistClient {
    client: Client,
    api_base: String,
    description: String,
    filename: String,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl GistClient {
    pub fn new(token: &Token, settings: &RemoteSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("token {}", token.expose()))
            .map_err(|_| Error::auth("access token contains characters not allowed in a header"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let client = Client::builder()
            .user_agent(concat!("brewfile-backup/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::api(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim().trim_end_matches('/').to_string(),
            description: settings.description.clone(),
            filename: settings.filename.clone(),
            request_timeout: settings.request_timeout(),
            probe_timeout: settings.probe_timeout(),
        })
    }

    fn gist_url(&self, id: &str) -> String {
        format!("{}/gists/{}", self.api_base, id)
    }

    fn files_payload(&self, content: &str) -> serde_json::Value {
        let mut files = serde_json::Map::new();
        files.insert(
            self.filename.clone(),
            serde_json::json!({ "content": content }),
        );
        serde_json::Value::Object(files)
    }

    fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        req.timeout(self.request_timeout).send().map_err(|e| {
            let msg = if e.is_timeout() {
                format!(
                    "Request to {what} timed out after {} seconds",
                    self.request_timeout.as_secs()
                )
            } else {
                format!("Network error while trying to {what}: {e}")
            };
            tracing::error!("{msg}");
            Error::api(msg)
        })
    }
}

impl RemoteStore for GistClient {
    fn create(&self, content: &str) -> Result<RemoteRef> {
        tracing::info!("creating new Gist");
        let payload = serde_json::json!({
            "description": self.description,
            "public": false,
            "files": self.files_payload(content),
        });
        let req = self
            .client
            .post(format!("{}/gists", self.api_base))
            .json(&payload);
        let res = self.send(req, "create Gist")?;
        if res.status() != StatusCode::CREATED {
            return Err(api_error(res, "create Gist"));
        }

        let body: GistBody = res
            .json()
            .map_err(|e| Error::api(format!("invalid response creating Gist: {e}")))?;
        let (Some(id), Some(url)) = (body.id, body.html_url) else {
            return Err(Error::api(
                "invalid response creating Gist: missing id or html_url",
            ));
        };
        tracing::info!(id = %id, "created Gist");
        tracing::debug!(url = %url, "Gist URL");
        Ok(RemoteRef { id, url })
    }

    fn update(&self, id: &str, content: &str) -> Result<Option<String>> {
        if !is_valid_id(id) {
            return Err(Error::api(format!("invalid Gist id: {id:?}")));
        }
        tracing::info!(id = %id, "updating Gist");
        let payload = serde_json::json!({ "files": self.files_payload(content) });
        let req = self.client.patch(self.gist_url(id)).json(&payload);
        let res = self.send(req, &format!("update Gist {id}"))?;
        if res.status() != StatusCode::OK {
            return Err(api_error(res, "update Gist"));
        }
        tracing::info!("Gist updated successfully");

        // The URL is informational; a body we cannot read does not undo the update.
        let url = res.json::<GistBody>().ok().and_then(|b| b.html_url);
        Ok(url.filter(|u| !u.trim().is_empty()))
    }

    fn exists(&self, id: &str) -> bool {
        if !is_valid_id(id) {
            tracing::warn!(id = %id, "stored Gist id is malformed; treating as missing");
            return false;
        }
        tracing::debug!(id = %id, "checking if Gist exists");
        let res = self
            .client
            .get(self.gist_url(id))
            .timeout(self.probe_timeout)
            .send();
        match res {
            Ok(r) if r.status() == StatusCode::OK => {
                tracing::debug!("Gist exists and is accessible");
                true
            }
            Ok(r) if r.status() == StatusCode::NOT_FOUND => {
                tracing::debug!("Gist not found (may have been deleted)");
                false
            }
            Ok(r) => {
                tracing::warn!(status = %r.status(), "unexpected status checking Gist");
                false
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!("request to check Gist timed out");
                false
            }
            Err(e) => {
                tracing::warn!("error checking if Gist exists: {e}");
                false
            }
        }
    }
}

/// Gist ids are hex today; accept the URL-safe superset and nothing else.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn api_error(res: Response, operation: &str) -> Error {
    let status = res.status();
    let body = res.text().unwrap_or_default();
    let msg = describe_failure(status, &body, operation);
    tracing::error!("{msg}");
    Error::api(msg)
}

fn describe_failure(status: StatusCode, body: &str, operation: &str) -> String {
    let api_message = serde_json::from_str::<ApiMessage>(body)
        .ok()
        .and_then(|m| m.message)
        .map(|m| sanitize_text(&m, API_MESSAGE_MAX_CHARS))
        .unwrap_or_else(|| {
            let text = sanitize_text(body, API_MESSAGE_MAX_CHARS);
            if text.is_empty() {
                "No response body".to_string()
            } else {
                text
            }
        });
    let code = status.as_u16();

    match code {
        401 => format!(
            "Authentication failed ({code}): {api_message}\n\n\
             Your GitHub token may be invalid or expired.\n\
             Please re-authenticate:\n  gh auth login --scopes gist\n\
             Or generate a new token at:\n  https://github.com/settings/tokens"
        ),
        403 => format!(
            "Permission denied ({code}): {api_message}\n\n\
             Your token may not have the 'gist' scope.\n\
             Please re-authenticate with the correct scope:\n  gh auth login --scopes gist"
        ),
        404 => format!(
            "Gist not found ({code}): {api_message}\n\n\
             The Gist may have been deleted.\n\
             A new Gist will be created on the next run."
        ),
        422 => format!(
            "Validation failed ({code}): {api_message}\n\nThe request data was invalid."
        ),
        429 => format!(
            "Rate limit exceeded ({code}): {api_message}\n\n\
             GitHub API rate limit reached.\nPlease try again later."
        ),
        c if c >= 500 => format!(
            "GitHub server error ({code}): {api_message}\n\n\
             GitHub's servers are experiencing issues.\nPlease try again later."
        ),
        _ => format!("Failed to {operation} ({code}): {api_message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_url_safe() {
        assert!(is_valid_id("aa5a315d61ae9438b18d"));
        assert!(is_valid_id("g1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../users"));
        assert!(!is_valid_id("a b"));
    }

    #[test]
    fn failure_messages_carry_remediation() {
        let m = describe_failure(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"Bad credentials"}"#,
            "create Gist",
        );
        assert!(m.starts_with("Authentication failed (401): Bad credentials"));
        assert!(m.contains("gh auth login --scopes gist"));

        let m = describe_failure(StatusCode::FORBIDDEN, "{}", "create Gist");
        assert!(m.starts_with("Permission denied (403): {}"));
        assert!(m.contains("'gist' scope"));

        let m = describe_failure(
            StatusCode::BAD_GATEWAY,
            "<html>\nupstream\n</html>",
            "update Gist",
        );
        assert!(m.starts_with("GitHub server error (502): <html> upstream </html>"));

        let m = describe_failure(StatusCode::CONFLICT, "", "update Gist");
        assert_eq!(m, "Failed to update Gist (409): No response body");
    }
}
