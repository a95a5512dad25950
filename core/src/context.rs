use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;
use crate::model::{AuthenticationInfo, HeaderData, ProxyInfo};

/// Immutable input to a `DownloadTask`, validated on submission to the
/// scheduler and never mutated afterward.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub url: String,
    pub target_path: PathBuf,
    pub max_segments: u8,
    pub expected_size: Option<u64>,
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: Option<String>,
    pub authentication: Option<AuthenticationInfo>,
    pub proxy: Option<ProxyInfo>,
}

impl DownloadContext {
    pub fn builder(url: impl Into<String>, target_path: impl Into<PathBuf>) -> DownloadContextBuilder {
        DownloadContextBuilder::new(url, target_path)
    }

    pub fn header_data(&self) -> HeaderData {
        HeaderData {
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            authentication: self.authentication.clone(),
            proxy: self.proxy.clone(),
        }
    }

    /// Validates the context the way the HTTP Protocol Strategy's
    /// `validate_context` contract requires: URL scheme, segment bound,
    /// and a target directory that exists or can be created.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(DownloadError::InvalidUrl(self.url.clone()));
        }
        if self.max_segments == 0 {
            return Err(DownloadError::ArgumentOutOfRange(
                "max_segments must be in 1..=255".into(),
            ));
        }
        let dir = self.target_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                DownloadError::PathNotFound(format!("{}: {}", dir.display(), e))
            })?;
        }
        if self.target_path.file_name().is_none() {
            return Err(DownloadError::TaskContextInvalid(
                "target_path has no file name component".into(),
            ));
        }
        Ok(())
    }

    pub fn target_dir(&self) -> PathBuf {
        self.target_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub struct DownloadContextBuilder {
    ctx: DownloadContext,
}

impl DownloadContextBuilder {
    pub fn new(url: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            ctx: DownloadContext {
                url: url.into(),
                target_path: target_path.into(),
                max_segments: 8,
                expected_size: None,
                headers: HashMap::new(),
                cookies: None,
                authentication: None,
                proxy: None,
            },
        }
    }

    pub fn max_segments(mut self, n: u8) -> Self {
        self.ctx.max_segments = n;
        self
    }

    pub fn expected_size(mut self, size: u64) -> Self {
        self.ctx.expected_size = Some(size);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.headers.insert(key.into(), vec![value.into()]);
        self
    }

    pub fn cookies(mut self, cookies: impl Into<String>) -> Self {
        self.ctx.cookies = Some(cookies.into());
        self
    }

    pub fn authentication(mut self, auth: AuthenticationInfo) -> Self {
        self.ctx.authentication = Some(auth);
        self
    }

    pub fn proxy(mut self, proxy: ProxyInfo) -> Self {
        self.ctx.proxy = Some(proxy);
        self
    }

    pub fn build(self) -> DownloadContext {
        self.ctx
    }
}
