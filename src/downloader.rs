use crate::config::DownloadConfig;
use crate::error::{AppError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_DISPOSITION, REFERER};
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Some station data hosts reject requests that do not look like a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const FALLBACK_FILE_NAME: &str = "download.bin";

pub struct Downloader {
    client: Client,
    max_retries: u32,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(browser_headers())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Stream `url` into `destination`, returning the saved path.
    ///
    /// The file name comes from the `Content-Disposition` header, else the
    /// URL's last path segment. The body is written to a `.part` file first so
    /// an interrupted download never looks like a pending archive. Transient
    /// failures while sending or while streaming the body restart the whole
    /// fetch.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::InvalidData(format!("Invalid URL '{}': {}", url, e)))?;

        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(AppError::InvalidData(format!(
                "URL must use http or https, got: {}",
                parsed.scheme()
            )));
        }

        tokio::fs::create_dir_all(destination).await?;

        debug!("Downloading file from {}", url);

        let parsed = &parsed;
        retry_with_backoff(self.max_retries, || self.fetch_once(parsed, url, destination)).await
    }

    async fn fetch_once(&self, parsed: &Url, url: &str, destination: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(parsed.clone())
            .header(REFERER, url)
            .send()
            .await?
            .error_for_status()?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(parsed))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());

        let file_path = destination.join(&file_name);
        let part_path = destination.join(format!("{}.part", file_name));

        let written = match write_body(response, &part_path, &file_path).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup_err) = tokio::fs::remove_file(&part_path).await {
                    debug!("No partial file removed at {}: {}", part_path.display(), cleanup_err);
                }
                return Err(e);
            }
        };

        info!("Downloaded {} ({} bytes) to {}", url, written, file_path.display());
        Ok(file_path)
    }
}

/// Write the body to `part_path` chunk by chunk, then rename it to `file_path`.
async fn write_body(mut response: Response, part_path: &Path, file_path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part_path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(part_path, file_path).await?;
    Ok(written)
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers
}

/// Extract `filename=` from a `Content-Disposition` value.
///
/// Quotes are stripped and any directory components dropped.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let (_, raw) = value.rsplit_once("filename=")?;
    let raw = raw.split(';').next().unwrap_or(raw).trim().trim_matches('"');
    sanitize_file_name(raw)
}

/// The last non-empty path segment of `url`.
pub fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .and_then(sanitize_file_name)
}

fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Retry a future with exponential backoff
async fn retry_with_backoff<F, Fut, T>(max_retries: u32, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                retries += 1;

                if retries > max_retries {
                    return Err(e);
                }

                // Check if error is transient (retryable)
                let should_retry = match &e {
                    AppError::Http(reqwest_err) => {
                        // Retry on connection errors, timeouts, server errors (5xx)
                        reqwest_err.is_timeout()
                            || reqwest_err.is_connect()
                            || reqwest_err
                                .status()
                                .map(|s| s.is_server_error())
                                .unwrap_or(false)
                    }
                    AppError::Io(_) => true,
                    _ => false,
                };

                if !should_retry {
                    return Err(e);
                }

                let delay = Duration::from_secs(2u64.pow(retries.saturating_sub(1)));
                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                    retries, max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_content_disposition() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"IDCJAC0009_001006_1800.zip\""),
            Some("IDCJAC0009_001006_1800.zip".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=001006_rainfall.zip; size=10"),
            Some("001006_rainfall.zip".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("http://www.example.com/climate/data/001006_rainfall.zip").unwrap();
        assert_eq!(filename_from_url(&url), Some("001006_rainfall.zip".to_string()));

        let url = Url::parse("http://www.example.com/jsp/ncc/cdio/weatherData/av?p_stn_num=001006")
            .unwrap();
        assert_eq!(filename_from_url(&url), Some("av".to_string()));

        let url = Url::parse("http://www.example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }
}
