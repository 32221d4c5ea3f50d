//! IPC client for communicating with the theftguard daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Request/response handling
//! - Connection retry logic
//! - Timeout handling

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::daemon::ipc::IpcServer;
use crate::types::{DeviceId, DeviceSpec, IpcRequest, IpcResponse, TriggerSource};

// ============================================================================
// Constants
// ============================================================================

/// Connection timeout in seconds
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Read/write timeout in seconds.
///
/// An escalated disarm waits for the auth gate, which may be a biometric
/// prompt.
const IO_TIMEOUT_SECS: u64 = 30;

/// Maximum response size in bytes (64KB)
const MAX_RESPONSE_SIZE: usize = 65536;

/// Maximum connection attempts
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds (base delay, multiplied by attempt number)
const RETRY_DELAY_MS: u64 = 500;

// ============================================================================
// IpcClient
// ============================================================================

/// IPC client for daemon communication.
pub struct IpcClient {
    /// Socket path
    socket_path: PathBuf,
    /// Connection timeout
    timeout: Duration,
}

impl IpcClient {
    /// Creates a new IPC client with the default socket path.
    pub fn new() -> Result<Self> {
        Ok(Self::with_socket_path(IpcServer::default_path()?))
    }

    /// Creates a new IPC client with a custom socket path.
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Arms the system.
    pub async fn arm(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::Arm).await
    }

    /// Disarms the system.
    pub async fn disarm(&self, pin: Option<String>) -> Result<IpcResponse> {
        self.request(&IpcRequest::Disarm { pin }).await
    }

    /// Authenticates to cancel an escalation.
    pub async fn auth(&self, pin: Option<String>) -> Result<IpcResponse> {
        self.request(&IpcRequest::Auth { pin }).await
    }

    /// Queries the daemon status.
    pub async fn status(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::Status).await
    }

    /// Reports a signal sample.
    pub async fn sample(
        &self,
        device_id: DeviceId,
        rssi: Option<i16>,
        connected: bool,
    ) -> Result<IpcResponse> {
        self.request(&IpcRequest::Sample {
            device_id,
            rssi,
            connected,
        })
        .await
    }

    /// Reports a trigger.
    pub async fn trigger(&self, source: TriggerSource) -> Result<IpcResponse> {
        self.request(&IpcRequest::Trigger { source }).await
    }

    /// Adds a trusted device.
    pub async fn device_add(&self, device: DeviceSpec) -> Result<IpcResponse> {
        self.request(&IpcRequest::DeviceAdd { device }).await
    }

    /// Removes a trusted device.
    pub async fn device_remove(&self, id: DeviceId) -> Result<IpcResponse> {
        self.request(&IpcRequest::DeviceRemove { id }).await
    }

    /// Sends a request and turns an error response into an error.
    async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let response = self.send_request_with_retry(request).await?;
        if !response.is_success() {
            anyhow::bail!("{}", response.message);
        }
        Ok(response)
    }

    /// Sends a request to the daemon with retry logic.
    ///
    /// Only failures to reach the daemon are retried; a request that was
    /// delivered is never sent twice.
    async fn send_request_with_retry(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.connect().await {
                Ok(stream) => return self.send_request(stream, request).await,
                Err(e) => {
                    tracing::warn!("接続失敗 (試行 {}/{}): {:#}", attempt, MAX_RETRIES, e);
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        let delay = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Daemonに接続できません")))
    }

    async fn connect(&self) -> Result<UnixStream> {
        timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("Daemonに接続できません。'theftguard daemon' を起動してください")
    }

    /// Sends a single request over an open connection.
    async fn send_request(&self, mut stream: UnixStream, request: &IpcRequest) -> Result<IpcResponse> {
        let io_timeout = Duration::from_secs(IO_TIMEOUT_SECS);

        let request_json =
            serde_json::to_string(request).context("リクエストのシリアライズに失敗しました")?;

        timeout(io_timeout, stream.write_all(request_json.as_bytes()))
            .await
            .context("書き込みがタイムアウトしました")?
            .context("リクエストの送信に失敗しました")?;

        timeout(io_timeout, stream.flush())
            .await
            .context("フラッシュがタイムアウトしました")?
            .context("フラッシュに失敗しました")?;

        // Shutdown write side to signal end of request
        stream
            .shutdown()
            .await
            .context("シャットダウンに失敗しました")?;

        let mut buffer = Vec::new();
        let n = timeout(
            io_timeout,
            (&mut stream)
                .take(MAX_RESPONSE_SIZE as u64)
                .read_to_end(&mut buffer),
        )
        .await
        .context("読み込みがタイムアウトしました")?
        .context("レスポンスの受信に失敗しました")?;

        if n == 0 {
            anyhow::bail!("Daemonからの応答がありませんでした");
        }

        let response: IpcResponse =
            serde_json::from_slice(&buffer[..n]).context("レスポンスのパースに失敗しました")?;

        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
