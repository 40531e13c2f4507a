//! Thin HTTP client for the doorwardd API.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("doorward/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// `<base>/members/<name>`, with the name percent-encoded as one path
    /// segment.
    pub fn member_url(&self, name: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base).with_context(|| format!("invalid daemon URL {}", self.base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("daemon URL {} cannot take a path", self.base))?
            .pop_if_empty()
            .push("members")
            .push(name);
        Ok(url)
    }

    pub async fn enroll(&self, name: &str, photo: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(photo)
            .await
            .with_context(|| format!("reading {}", photo.display()))?;
        let file_name = photo
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_owned());
        let form = Form::new()
            .text("name", name.to_owned())
            .part("photo", Part::bytes(bytes).file_name(file_name));
        let response = self.http.post(self.url("/enroll")).multipart(form).send().await?;
        json_or_error(response).await
    }

    pub async fn recognize(&self, image: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("reading {}", image.display()))?;
        let response = self
            .http
            .post(self.url("/recognize"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        json_or_error(response).await
    }

    pub async fn members(&self) -> Result<Value> {
        json_or_error(self.http.get(self.url("/members")).send().await?).await
    }

    pub async fn remove(&self, name: &str) -> Result<Value> {
        let url = self.member_url(name)?;
        json_or_error(self.http.delete(url).send().await?).await
    }

    pub async fn rebuild(&self) -> Result<Value> {
        json_or_error(self.http.post(self.url("/rebuild")).send().await?).await
    }

    pub async fn status(&self) -> Result<Value> {
        json_or_error(self.http.get(self.url("/status")).send().await?).await
    }
}

async fn json_or_error(response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(body);
    }
    bail!("{}", error_message(status, &body))
}

fn error_message(status: StatusCode, body: &Value) -> String {
    match body.get("error").and_then(Value::as_str) {
        Some(error) => format!("daemon returned {status}: {error}"),
        None => format!("daemon returned {status}"),
    }
}
