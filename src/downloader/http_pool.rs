use std::path::Path;
use std::time::Duration;
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::io::AsyncWriteExt;
use crate::errors::{AppError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared HTTP client for page scraping and streamed downloads.
///
/// `timeout` bounds page requests and each wait for the next body chunk of a
/// transfer; whole transfers are bounded by the caller's limit instead.
#[derive(Clone)]
pub struct HttpPool {
    client: Client,
    max_connections: usize,
    timeout: Duration,
}

/// What a HEAD request told us about a remote file.
#[derive(Debug, Clone, Default)]
pub struct RemoteFileInfo {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl RemoteFileInfo {
    pub fn is_audio(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("audio/"))
            .unwrap_or(false)
    }
}

impl HttpPool {
    pub fn new(max_connections: usize, timeout: Duration) -> Result<Self> {
        let client = Self::builder(max_connections, timeout).build()?;
        Ok(Self {
            client,
            max_connections,
            timeout,
        })
    }

    fn builder(max_connections: usize, timeout: Duration) -> ClientBuilder {
        ClientBuilder::new()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .connect_timeout(timeout.min(Duration::from_secs(15)))
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
    }

    pub fn with_proxy(mut self, proxy_url: &str) -> Result<Self> {
        let proxy = Proxy::all(proxy_url)?;
        self.client = Self::builder(self.max_connections, self.timeout).proxy(proxy).build()?;
        Ok(self)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn head(&self, url: &str) -> Result<RemoteFileInfo> {
        let response = self.client.head(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Download(format!("HTTP error: {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(RemoteFileInfo {
            content_type,
            content_length: response.content_length(),
        })
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Download(format!("HTTP error: {}", response.status())));
        }
        Ok(response.text().await?)
    }

    /// Streams `url` into `path`, retrying up to three times within `limit`.
    ///
    /// A transfer that keeps receiving bytes may run until `limit`; one that
    /// stalls for longer than the pool timeout is retried. `progress` receives
    /// `(downloaded, total)`; `total` is 0 when unknown. A partially written
    /// `path` is removed on final failure.
    pub async fn download_to_file<F>(&self, url: &str, path: &Path, limit: Duration, mut progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send,
    {
        const MAX_RETRIES: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        let attempts = async {
            let mut attempt = 1;
            loop {
                log::info!("🌐 [HTTP] Attempt {} of {} for URL: {}", attempt, MAX_RETRIES, url);
                match self.try_download(url, path, &mut progress).await {
                    Ok(bytes) => {
                        log::info!("✅ [HTTP] Downloaded {} bytes on attempt {}", bytes, attempt);
                        return Ok(bytes);
                    }
                    Err(e) if attempt < MAX_RETRIES => {
                        log::warn!("⚠️ [HTTP] Attempt {} failed: {}", attempt, e);
                        log::info!("🔄 [HTTP] Retrying in {:?}...", RETRY_DELAY);
                        tokio::time::sleep(RETRY_DELAY).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        log::error!("❌ [HTTP] All {} attempts failed: {}", MAX_RETRIES, e);
                        return Err(e);
                    }
                }
            }
        };

        let outcome = match tokio::time::timeout(limit, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::error!("⏱️ [HTTP] Transfer of {} exceeded {}s", url, limit.as_secs());
                Err(AppError::Download(format!("transfer exceeded {}s", limit.as_secs())))
            }
        };
        if outcome.is_err() {
            let _ = tokio::fs::remove_file(path).await;
        }
        outcome
    }

    async fn try_download<F>(&self, url: &str, path: &Path, progress: &mut F) -> Result<u64>
    where
        F: FnMut(u64, u64) + Send,
    {
        let request = self
            .client
            .get(url)
            .header("Accept", "audio/webm,audio/*,*/*;q=0.9")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| AppError::Download(format!("no response within {}s", self.timeout.as_secs())))??;

        if !response.status().is_success() {
            return Err(AppError::Download(format!("HTTP error: {}", response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        let mut downloaded = 0u64;
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = match tokio::time::timeout(self.timeout, stream.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => {
                    return Err(AppError::Download(format!(
                        "transfer stalled for {}s after {} bytes",
                        self.timeout.as_secs(),
                        downloaded
                    )))
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }
        file.flush().await?;

        if downloaded == 0 {
            return Err(AppError::Download("server returned an empty body".to_string()));
        }
        if total > 0 && downloaded < total {
            return Err(AppError::Download(format!(
                "connection closed after {} of {} bytes",
                downloaded, total
            )));
        }
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_file_info_is_audio() {
        let info = RemoteFileInfo {
            content_type: Some("Audio/MPEG".to_string()),
            content_length: Some(10),
        };
        assert!(info.is_audio());
        assert!(!RemoteFileInfo::default().is_audio());
        let html = RemoteFileInfo {
            content_type: Some("text/html; charset=utf-8".to_string()),
            content_length: None,
        };
        assert!(!html.is_audio());
    }

    #[test]
    fn test_pool_builds_with_and_without_proxy() {
        let pool = HttpPool::new(4, Duration::from_secs(5)).unwrap();
        assert!(pool.with_proxy("socks5://127.0.0.1:9050").is_ok());
    }

    /// Local server that answers every request with `body_len` bytes, one
    /// byte per `interval`.
    async fn trickle_server(body_len: usize, interval: Duration) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body_len
                    );
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    for _ in 0..body_len {
                        if socket.write_all(b"a").await.is_err() || socket.flush().await.is_err() {
                            return;
                        }
                        tokio::time::sleep(interval).await;
                    }
                });
            }
        });
        format!("http://{}/song.mp3", addr)
    }

    #[tokio::test]
    async fn test_slow_transfer_outlives_pool_timeout() {
        let url = trickle_server(10, Duration::from_millis(150)).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.part");
        let pool = HttpPool::new(2, Duration::from_millis(600)).unwrap();

        let bytes = pool
            .download_to_file(&url, &path, Duration::from_secs(20), |_, _| {})
            .await
            .unwrap();
        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&path).unwrap(), b"aaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_transfer_limit_stops_endless_stream() {
        let url = trickle_server(1_000, Duration::from_millis(100)).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.part");
        let pool = HttpPool::new(2, Duration::from_secs(5)).unwrap();

        let started = std::time::Instant::now();
        let result = pool
            .download_to_file(&url, &path, Duration::from_millis(800), |_, _| {})
            .await;
        assert!(matches!(result, Err(AppError::Download(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!path.exists());
    }
}
