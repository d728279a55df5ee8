use super::{
    ActiveTransfer, DownloadSession, HandleId, SessionCallback, SessionError, TransferError,
    TransferSpec,
};
use crate::core::model::TimeRange;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HttpSessionConfig {
    pub out_dir: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./downloads"),
            user_agent: "mediakeep/0.1".to_string(),
            timeout_secs: 60,
            retries: 2,
            retry_backoff_ms: 400,
        }
    }
}

struct TransferTask {
    identity_tag: String,
    source: Url,
    cancel: CancellationToken,
}

/// Download session over plain HTTP(S). Each transfer streams into a
/// per-asset package directory; follow-up selection passes land as extra
/// track files inside the same package.
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    config: HttpSessionConfig,
    callbacks: mpsc::Sender<SessionCallback>,
    tasks: Arc<Mutex<HashMap<HandleId, TransferTask>>>,
}

impl HttpSession {
    pub fn new(config: HttpSessionConfig, callbacks: mpsc::Sender<SessionCallback>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("reqwest client");
        Self {
            client,
            config,
            callbacks,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let base = self.config.retry_backoff_ms.max(1);
        let shift = attempt.min(16);
        let mul = 1u64 << shift;
        let ms = base.saturating_mul(mul).min(30_000);
        sleep(Duration::from_millis(ms)).await;
    }

    fn package_dir(&self, identity_tag: &str) -> PathBuf {
        self.config
            .out_dir
            .join(format!("{}.pkg", sanitize_filename::sanitize(identity_tag)))
    }

    async fn fetch_with_retry(
        &self,
        source: &Url,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TransferError> {
        let mut last_err: Option<TransferError> = None;

        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = self.sleep_backoff(attempt - 1) => {}
                }
            }

            let request = self
                .client
                .get(source.clone())
                .header(USER_AGENT, &self.config.user_agent)
                .timeout(Duration::from_secs(self.config.timeout_secs));

            let resp = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                r = request.send() => r,
            };

            match resp {
                Ok(r) if r.status().is_success() => return Ok(r),
                Ok(r) if Self::should_retry_status(r.status()) => {
                    last_err = Some(TransferError::Failed(format!("http status {}", r.status())));
                }
                Ok(r) => return Err(TransferError::Failed(format!("http status {}", r.status()))),
                Err(e) => {
                    last_err = Some(TransferError::Failed(format!("request error: {e}")));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransferError::Failed("request timed out".to_string())))
    }

    async fn run_transfer(
        &self,
        handle: HandleId,
        spec: &TransferSpec,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        let package = self.package_dir(&spec.identity_tag);
        tokio::fs::create_dir_all(&package)
            .await
            .map_err(|e| TransferError::Failed(format!("create package dir: {e}")))?;

        // The destination is known as soon as the package exists, well before
        // completion; the manager relies on this ordering.
        let _ = self
            .callbacks
            .send(SessionCallback::DestinationResolved {
                handle,
                path: package.clone(),
            })
            .await;

        let file_name = match &spec.selection {
            Some(selection) => format!(
                "track-{}.bin",
                sanitize_filename::sanitize(&selection.option.name)
            ),
            None => "primary.bin".to_string(),
        };
        let dest = package.join(file_name);

        let resp = self.fetch_with_retry(&spec.source, &cancel).await?;
        let total = resp.content_length();

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| TransferError::Failed(format!("create {}: {e}", dest.display())))?;

        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                c = stream.next() => c,
            };

            let chunk: bytes::Bytes = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(TransferError::Failed(format!("read body: {e}"))),
                None => break,
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::Failed(format!("write {}: {e}", dest.display())))?;
            written += chunk.len() as u64;

            if let Some(total) = total {
                if total > 0 {
                    let _ = self
                        .callbacks
                        .send(SessionCallback::Progress {
                            handle,
                            loaded: vec![TimeRange::new(0.0, written as f64)],
                            expected: TimeRange::new(0.0, total as f64),
                        })
                        .await;
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| TransferError::Failed(format!("flush {}: {e}", dest.display())))?;

        Ok(())
    }
}

#[async_trait]
impl DownloadSession for HttpSession {
    async fn active_transfers(&self) -> Vec<ActiveTransfer> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|(handle, task)| ActiveTransfer {
                handle: *handle,
                identity_tag: task.identity_tag.clone(),
                source: task.source.clone(),
            })
            .collect()
    }

    async fn start_transfer(&self, spec: &TransferSpec) -> Result<HandleId, SessionError> {
        match spec.source.scheme() {
            "http" | "https" => {}
            other => return Err(SessionError::UnsupportedScheme(other.to_string())),
        }

        let handle = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(
                handle,
                TransferTask {
                    identity_tag: spec.identity_tag.clone(),
                    source: spec.source.clone(),
                    cancel: cancel.clone(),
                },
            );
        }
        debug!(
            handle = %handle,
            source = %spec.source,
            quality_floor_bps = spec.quality_floor_bps,
            selection = spec.selection.as_ref().map(|s| s.option.name.as_str()),
            "transfer started"
        );

        let session = self.clone();
        let spec = spec.clone();
        tokio::spawn(async move {
            let error = session.run_transfer(handle, &spec, cancel).await.err();
            session.tasks.lock().await.remove(&handle);
            let _ = session
                .callbacks
                .send(SessionCallback::Completed { handle, error })
                .await;
        });

        Ok(handle)
    }

    async fn cancel(&self, handle: HandleId) {
        if let Some(task) = self.tasks.lock().await.get(&handle) {
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (HttpSession, mpsc::Receiver<SessionCallback>) {
        let (tx, rx) = mpsc::channel(16);
        (HttpSession::new(HttpSessionConfig::default(), tx), rx)
    }

    #[tokio::test]
    async fn rejects_non_http_sources() {
        let (session, _rx) = session();
        let spec = TransferSpec {
            source: Url::parse("ftp://example.com/a.bin").unwrap(),
            identity_tag: "a".to_string(),
            quality_floor_bps: 265_000,
            selection: None,
        };

        assert!(matches!(
            session.start_transfer(&spec).await,
            Err(SessionError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
        assert!(session.active_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn cancelling_an_unknown_handle_is_a_noop() {
        let (session, _rx) = session();
        session.cancel(Uuid::new_v4()).await;
    }

    #[test]
    fn package_dir_sanitizes_identity_tags() {
        let (tx, _rx) = mpsc::channel(1);
        let session = HttpSession::new(
            HttpSessionConfig {
                out_dir: PathBuf::from("/media"),
                ..HttpSessionConfig::default()
            },
            tx,
        );

        let dir = session.package_dir("my/asset");
        assert_eq!(dir, PathBuf::from("/media/myasset.pkg"));
    }

    #[test]
    fn retry_classification_matches_transient_statuses() {
        assert!(HttpSession::should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(HttpSession::should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!HttpSession::should_retry_status(StatusCode::NOT_FOUND));
        assert!(!HttpSession::should_retry_status(StatusCode::FORBIDDEN));
    }
}
