use std::time::Duration;

use base64::Engine;
use futures::StreamExt;
use reqwest::{Client, StatusCode};

use super::{ProtocolStrategy, SegmentStream};
use crate::config::SchedulerConfig;
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::model::{HeaderData, ProbeResult, SegmentRange};

/// HTTP(S) implementation of `ProtocolStrategy`. Probing issues a `HEAD`
/// request; segment fetches use `Range` requests.
pub struct HttpStrategy {
    client: Client,
    probe_timeout: Duration,
    read_timeout: Duration,
}

impl HttpStrategy {
    pub fn new(client: Client, config: &SchedulerConfig) -> Self {
        Self {
            client,
            probe_timeout: config.probe_timeout,
            read_timeout: config.read_timeout,
        }
    }
}

impl Default for HttpStrategy {
    fn default() -> Self {
        Self::new(Client::new(), &SchedulerConfig::default())
    }
}

/// Applies custom headers, cookies, and precomputed auth to a request
/// builder. Skips any caller-supplied `Range` header — this strategy sets
/// its own per segment, and a stray one would collide with it.
fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    header_data: &HeaderData,
    precomputed_auth: Option<&str>,
) -> reqwest::RequestBuilder {
    for (key, values) in &header_data.headers {
        if key.eq_ignore_ascii_case("range") {
            continue;
        }
        for value in values {
            builder = builder.header(key, value);
        }
    }
    if let Some(cookies) = &header_data.cookies {
        builder = builder.header("Cookie", cookies);
    }
    if let Some(auth_value) = precomputed_auth {
        builder = builder.header("Authorization", auth_value);
    }
    builder
}

fn precompute_auth(header_data: &HeaderData) -> Option<String> {
    header_data.authentication.as_ref().map(|auth| {
        let credentials = format!("{}:{}", auth.username, auth.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&credentials);
        format!("Basic {}", encoded)
    })
}

#[async_trait::async_trait]
impl ProtocolStrategy for HttpStrategy {
    fn validate_context(&self, context: &DownloadContext) -> Result<(), DownloadError> {
        context.validate()
    }

    /// Sends a `HEAD` request and inspects the response: `Content-Length`
    /// gives the total size, `Accept-Ranges: bytes` means the server
    /// supports byte ranges. Absence of `Content-Length`, or an explicit
    /// `Content-Length: 0`, is a failure rather than something to fall
    /// back on.
    async fn probe(&self, context: &DownloadContext) -> Result<ProbeResult, DownloadError> {
        let header_data = context.header_data();
        let auth_header = precompute_auth(&header_data);

        let builder = self.client.head(&context.url).timeout(self.probe_timeout);
        let builder = apply_headers(builder, &header_data, auth_header.as_deref());

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::from_status(response.status()));
        }

        let file_size = response.content_length().ok_or(DownloadError::TaskContextInvalid(
            "server did not report Content-Length".into(),
        ))?;
        if file_size == 0 {
            return Err(DownloadError::TaskContextInvalid(
                "server reported a zero-byte resource".into(),
            ));
        }

        let resumable = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        Ok(ProbeResult { file_size, resumable })
    }

    /// `resumable == false` means the caller is requesting the entire body
    /// in one segment; no `Range` header is sent in that case.
    async fn open_segment(
        &self,
        context: &DownloadContext,
        range: SegmentRange,
        resumable: bool,
    ) -> Result<SegmentStream, DownloadError> {
        let header_data = context.header_data();
        let auth_header = precompute_auth(&header_data);

        let mut builder = self.client.get(&context.url).timeout(self.read_timeout);
        builder = apply_headers(builder, &header_data, auth_header.as_deref());
        if resumable {
            builder = builder.header("Range", format!("bytes={}-{}", range.from, range.to));
        }

        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(DownloadError::RangeNotSatisfiable);
        }
        if resumable && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::from_status(status));
        }
        if !resumable && !status.is_success() {
            return Err(DownloadError::from_status(status));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::from));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(url: String) -> DownloadContext {
        DownloadContext::builder(url, "/tmp/rangedl-http-test/out.bin").build()
    }

    #[tokio::test]
    async fn probe_detects_resumable_server() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "1000")
                    .insert_header("accept-ranges", "bytes"),
            )
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let result = strategy
            .probe(&ctx(format!("{}/file", server.uri())))
            .await
            .unwrap();

        assert!(result.resumable);
        assert_eq!(result.file_size, 1000);
    }

    #[tokio::test]
    async fn probe_detects_non_resumable_server() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "50"))
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let result = strategy
            .probe(&ctx(format!("{}/file", server.uri())))
            .await
            .unwrap();

        assert!(!result.resumable);
        assert_eq!(result.file_size, 50);
    }

    #[tokio::test]
    async fn probe_rejects_missing_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let result = strategy.probe(&ctx(format!("{}/file", server.uri()))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn probe_rejects_zero_byte_resource() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let result = strategy.probe(&ctx(format!("{}/file", server.uri()))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn probe_does_not_retry_a_404() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let err = strategy.probe(&ctx(format!("{}/file", server.uri()))).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn open_segment_rejects_200_when_range_was_expected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
            .mount(&server)
            .await;

        let strategy = HttpStrategy::default();
        let context = ctx(format!("{}/file", server.uri()));
        let range = SegmentRange { index: 0, from: 0, to: 9 };

        let result = strategy.open_segment(&context, range, true).await;
        assert!(result.is_err());
    }
}
