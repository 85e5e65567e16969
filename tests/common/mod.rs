//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use archive_dispatch::backend::{ArchiveBackend, ArchiveReceipt, BackendError, FailureKind};
use archive_dispatch::dispatch::WorkItem;

/// One scripted response of a [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub enum Step {
    Archive(String),
    Fail(FailureKind, String),
    Panic(String),
}

/// In-process backend that replays scripted responses.
///
/// Scripted steps are consumed in call order; once exhausted every call
/// gets the default step. Tracks call count and peak concurrency.
pub struct ScriptedBackend {
    id: String,
    available: bool,
    delay: Duration,
    script: Mutex<VecDeque<Step>>,
    default: Step,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    pub fn succeeding(id: &str) -> Self {
        Self::with_default(id, Step::Archive(format!("https://{id}.archive.example/capture")))
    }

    pub fn failing(id: &str, kind: FailureKind, message: &str) -> Self {
        Self::with_default(id, Step::Fail(kind, message.to_string()))
    }

    fn with_default(id: &str, default: Step) -> Self {
        Self {
            id: id.to_string(),
            available: true,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Responses for the first calls, before falling back to the default.
    pub fn then(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Archived URL this backend returns by default.
    pub fn capture_url(&self) -> String {
        format!("https://{}.archive.example/capture", self.id)
    }
}

#[async_trait]
impl ArchiveBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn archive(&self, item: &WorkItem) -> Result<ArchiveReceipt, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Archive(url) => Ok(ArchiveReceipt::new(url)),
            Step::Fail(kind, message) => Err(BackendError::new(kind, message)),
            Step::Panic(message) => panic!("{} while archiving {}", message, item.key),
        }
    }
}

pub fn items(n: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem::new(format!("item-{i}"), format!("https://example.org/page/{i}")))
        .collect()
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` receives the request head and returns status, extra headers and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<(String, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => head.extend_from_slice(&buf[..n]),
                            }
                        }

                        let (status, headers, body) = f(String::from_utf8_lossy(&head).into_owned()).await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let extra: String = headers
                            .iter()
                            .map(|(name, value)| format!("{name}: {value}\r\n"))
                            .collect();

                        let response = format!(
                            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            extra,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
