//! IPC server for the theftguard daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Request/response handling for guard commands
//! - Translation of requests into coordinator events and configuration
//!   changes

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::auth::{AuthGate, AuthOutcome, AuthRequest};
use crate::monitor::MonitorHub;
use crate::types::{
    DeviceId, DeviceSpec, GuardConfig, IpcRequest, IpcResponse, StatusData, TransitionEvent,
    TriggerSource,
};

use super::coordinator::{ConfigUpdate, CoordinatorHandle};

// ============================================================================
// Constants
// ============================================================================

/// Default socket path, relative to the home directory.
pub const DEFAULT_SOCKET_PATH: &str = ".theftguard/theftguard.sock";

/// Maximum request size in bytes (4KB)
const MAX_REQUEST_SIZE: usize = 4096;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("リクエストの読み込みに失敗しました: {0}")]
    ReadError(String),

    /// The client closed the connection without sending anything
    #[error("クライアントが接続を閉じました")]
    ConnectionClosed,

    /// Timeout error
    #[error("リクエストの受信がタイムアウトしました")]
    Timeout,

    /// Request too large
    #[error("リクエストが大きすぎます (最大{MAX_REQUEST_SIZE}バイト)")]
    RequestTooLarge,
}

impl IpcError {
    /// Returns true if the client can simply retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionClosed)
    }

    /// Returns a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::ReadError(_) | Self::ConnectionClosed => "もう一度実行してください",
            Self::Timeout => "Daemonが応答しているか確認してください",
            Self::RequestTooLarge => "リクエストを小さくしてください",
        }
    }
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("既存のソケットを削除できません: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("ソケットディレクトリを作成できません: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("ソケットをバインドできません: {:?}", socket_path))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Returns the default socket path.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("ホームディレクトリが見つかりません")?;
        Ok(home.join(DEFAULT_SOCKET_PATH))
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("接続を受け付けられません")?;
        Ok(stream)
    }

    /// Receives and deserializes an IPC request from the stream.
    ///
    /// Applies a read timeout to prevent blocking indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or deserialization fails.
    pub async fn receive_request(stream: &mut UnixStream) -> Result<IpcRequest> {
        let mut buffer = vec![0u8; MAX_REQUEST_SIZE + 1];

        let read_result = timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            stream.read(&mut buffer),
        )
        .await;

        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Err(_) => return Err(IpcError::Timeout.into()),
        };

        if n == 0 {
            return Err(IpcError::ConnectionClosed.into());
        }
        if n > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge.into());
        }

        let request: IpcRequest = serde_json::from_slice(&buffer[..n])
            .context("リクエストのパースに失敗しました")?;

        Ok(request)
    }

    /// Serializes and sends an IPC response to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
        let json = serde_json::to_vec(response).context("レスポンスのシリアライズに失敗しました")?;

        stream
            .write_all(&json)
            .await
            .context("レスポンスの送信に失敗しました")?;
        stream.flush().await.context("フラッシュに失敗しました")?;

        Ok(())
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Accepts connections until `shutdown` resolves.
///
/// Each connection carries one request and one response and is handled on
/// its own task.
pub async fn serve<F>(server: &IpcServer, handler: Arc<RequestHandler>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handle_connection(stream, &handler).await;
                    });
                }
                Err(e) => warn!("{:#}", e),
            },
        }
    }
}

async fn handle_connection(mut stream: UnixStream, handler: &RequestHandler) {
    let response = match IpcServer::receive_request(&mut stream).await {
        Ok(request) => handler.handle(request).await,
        Err(e) => {
            debug!("不正なリクエスト: {:#}", e);
            IpcResponse::error(format!("{:#}", e))
        }
    };

    if let Err(e) = IpcServer::send_response(&mut stream, &response).await {
        debug!("{:#}", e);
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Handles IPC requests by forwarding them to the coordinator.
pub struct RequestHandler {
    coordinator: CoordinatorHandle,
    auth: Arc<dyn AuthGate>,
    monitors: Arc<MonitorHub>,
    /// Persisted configuration, kept in step with device changes
    config: Mutex<GuardConfig>,
    config_path: Option<PathBuf>,
}

impl RequestHandler {
    /// Creates a handler that does not persist configuration changes.
    pub fn new(
        coordinator: CoordinatorHandle,
        auth: Arc<dyn AuthGate>,
        monitors: Arc<MonitorHub>,
    ) -> Self {
        Self {
            coordinator,
            auth,
            monitors,
            config: Mutex::new(GuardConfig::default()),
            config_path: None,
        }
    }

    /// Writes device changes back to `path`, starting from `config`.
    #[must_use]
    pub fn with_config_file(mut self, config: GuardConfig, path: PathBuf) -> Self {
        self.config = Mutex::new(config);
        self.config_path = Some(path);
        self
    }

    /// Handles an IPC request and returns the appropriate response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Arm => self.handle_arm().await,
            IpcRequest::Disarm { pin } => self.handle_disarm(pin).await,
            IpcRequest::Auth { pin } => self.handle_auth(pin).await,
            IpcRequest::Status => self.handle_status(),
            IpcRequest::Sample {
                device_id,
                rssi,
                connected,
            } => self.handle_sample(device_id, rssi, connected).await,
            IpcRequest::Trigger { source } => self.handle_trigger(source).await,
            IpcRequest::DeviceAdd { device } => self.handle_device_add(device).await,
            IpcRequest::DeviceRemove { id } => self.handle_device_remove(id).await,
        }
    }

    async fn handle_arm(&self) -> IpcResponse {
        if self.coordinator.snapshot().state.is_guarding() {
            return IpcResponse::error_with_data("既に警備中です", self.status_data());
        }

        match self.send(TransitionEvent::UserArm).await {
            Ok(data) => IpcResponse::success("警備を開始しました", Some(data)),
            Err(response) => response,
        }
    }

    async fn handle_disarm(&self, pin: Option<String>) -> IpcResponse {
        let snapshot = self.coordinator.snapshot();

        if snapshot.state.is_escalated() {
            if let Err(response) = self.authenticate(pin).await {
                return response;
            }
            if let Err(e) = self.coordinator.send(TransitionEvent::AuthSucceeded) {
                return IpcResponse::error(e.to_string());
            }
        } else if !snapshot.state.is_guarding() && !snapshot.grace_pending {
            return IpcResponse::error_with_data("警備していません", self.status_data());
        }

        let message = if snapshot.state.is_guarding() {
            "警備を解除しました"
        } else {
            "自動警備を取り消しました"
        };
        match self.send(TransitionEvent::UserDisarm).await {
            Ok(data) => IpcResponse::success(message, Some(data)),
            Err(response) => response,
        }
    }

    async fn handle_auth(&self, pin: Option<String>) -> IpcResponse {
        if !self.coordinator.snapshot().state.is_escalated() {
            return IpcResponse::error_with_data("認証が必要な状態ではありません", self.status_data());
        }
        if let Err(response) = self.authenticate(pin).await {
            return response;
        }

        match self.send(TransitionEvent::AuthSucceeded).await {
            Ok(data) => IpcResponse::success("警報を解除しました", Some(data)),
            Err(response) => response,
        }
    }

    fn handle_status(&self) -> IpcResponse {
        IpcResponse::success("", Some(self.status_data()))
    }

    async fn handle_sample(
        &self,
        device_id: DeviceId,
        rssi: Option<i16>,
        connected: bool,
    ) -> IpcResponse {
        let known = self
            .coordinator
            .snapshot()
            .devices
            .iter()
            .any(|d| d.id == device_id);
        if !known {
            return IpcResponse::error(format!("未登録のデバイスです: {}", device_id));
        }

        let sent = match (rssi, connected) {
            (None, true) => self.coordinator.record_connected(device_id),
            _ => self.coordinator.record_sample(device_id, rssi),
        };
        if let Err(e) = sent {
            return IpcResponse::error(e.to_string());
        }

        self.coordinator.settle().await;
        IpcResponse::success("サンプルを記録しました", Some(self.status_data()))
    }

    async fn handle_trigger(&self, source: TriggerSource) -> IpcResponse {
        if !self.monitors.report(source) {
            return IpcResponse::error_with_data(
                format!("{}の監視は停止中です", source),
                self.status_data(),
            );
        }

        self.coordinator.settle().await;
        IpcResponse::success(format!("{}を検知しました", source), Some(self.status_data()))
    }

    async fn handle_device_add(&self, device: DeviceSpec) -> IpcResponse {
        if let Err(e) = self
            .coordinator
            .configure(ConfigUpdate::AddDevice(device.clone()))
            .await
        {
            return IpcResponse::error(e.to_string());
        }

        let message = format!("デバイスを追加しました: {}", device.name);
        let saved = self
            .persist(|config| config.devices.push(device))
            .await;
        self.respond_saved(saved, message)
    }

    async fn handle_device_remove(&self, id: DeviceId) -> IpcResponse {
        if let Err(e) = self
            .coordinator
            .configure(ConfigUpdate::RemoveDevice(id.clone()))
            .await
        {
            return IpcResponse::error(e.to_string());
        }

        let message = format!("デバイスを削除しました: {}", id);
        let saved = self
            .persist(|config| config.devices.retain(|d| d.id != id))
            .await;
        self.respond_saved(saved, message)
    }

    /// Sends an event and waits until it has been processed.
    async fn send(&self, event: TransitionEvent) -> Result<StatusData, IpcResponse> {
        self.coordinator
            .send(event)
            .map_err(|e| IpcResponse::error(e.to_string()))?;
        self.coordinator.settle().await;
        Ok(self.status_data())
    }

    /// Runs the auth gate on a blocking thread.
    ///
    /// A failure is reported to the coordinator and turned into an error
    /// response.
    async fn authenticate(&self, pin: Option<String>) -> Result<(), IpcResponse> {
        let gate = Arc::clone(&self.auth);
        let request = AuthRequest::from_pin(pin);

        let outcome = tokio::task::spawn_blocking(move || gate.authenticate(&request))
            .await
            .map_err(|e| IpcResponse::error(format!("認証処理に失敗しました: {}", e)))?;

        match outcome {
            AuthOutcome::Success => {
                info!("認証に成功しました");
                Ok(())
            }
            AuthOutcome::Failure(reason) => {
                let _ = self.coordinator.send(outcome.into_event());
                self.coordinator.settle().await;
                Err(IpcResponse::error_with_data(
                    format!("{} ({})", reason, reason.suggestion()),
                    self.status_data(),
                ))
            }
        }
    }

    async fn persist<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut GuardConfig),
    {
        let mut config = self.config.lock().await;
        change(&mut config);
        match &self.config_path {
            Some(path) => config.save(path),
            None => Ok(()),
        }
    }

    fn respond_saved(&self, saved: Result<()>, message: String) -> IpcResponse {
        match saved {
            Ok(()) => IpcResponse::success(message, Some(self.status_data())),
            Err(e) => {
                warn!("{:#}", e);
                IpcResponse::error_with_data(
                    format!("{}。設定の保存に失敗しました: {:#}", message, e),
                    self.status_data(),
                )
            }
        }
    }

    fn status_data(&self) -> StatusData {
        StatusData::from_snapshot(&self.coordinator.snapshot())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::auth::{AuthFailureReason, MockAuthGate};
    use crate::daemon::runtime::{GuardServices, ServiceOptions};
    use crate::types::TransportKind;

    // ------------------------------------------------------------------------
    // Helper functions
    // ------------------------------------------------------------------------

    fn create_temp_socket_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        (dir, path)
    }

    fn guard_config() -> GuardConfig {
        GuardConfig {
            devices: vec![DeviceSpec::new("phone", "Phone", TransportKind::LowEnergy)],
            pin: Some("2468".to_string()),
            ..GuardConfig::default()
        }
    }

    fn create_handler() -> (GuardServices, Arc<MockAuthGate>, RequestHandler) {
        let services = GuardServices::start(&guard_config(), ServiceOptions::headless()).unwrap();
        let auth = Arc::new(MockAuthGate::new());
        let handler = RequestHandler::new(
            services.coordinator().clone(),
            Arc::clone(&auth) as Arc<dyn AuthGate>,
            Arc::clone(services.monitors()),
        );
        (services, auth, handler)
    }

    async fn escalate(services: &GuardServices, handler: &RequestHandler) {
        handler.handle(IpcRequest::Arm).await;
        services.dispatcher().flush().await;
        let response = handler
            .handle(IpcRequest::Trigger {
                source: TriggerSource::Input,
            })
            .await;
        assert!(response.is_success(), "{}", response.message);
    }

    fn state(response: &IpcResponse) -> Option<String> {
        response.data.as_ref().and_then(|d| d.state.clone())
    }

    // ------------------------------------------------------------------------
    // IpcServer Tests
    // ------------------------------------------------------------------------

    mod ipc_server_tests {
        use super::*;

        #[tokio::test]
        async fn test_server_creation() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path);

            assert!(server.is_ok());
            assert!(socket_path.exists());
        }

        #[tokio::test]
        async fn test_server_removes_existing_socket() {
            let (_dir, socket_path) = create_temp_socket_path();
            std::fs::write(&socket_path, "dummy").unwrap();

            let server = IpcServer::new(&socket_path);
            assert!(server.is_ok());
        }

        #[tokio::test]
        async fn test_server_creates_parent_directory() {
            let dir = tempfile::tempdir().unwrap();
            let socket_path = dir.path().join("subdir").join("test.sock");

            let server = IpcServer::new(&socket_path);
            assert!(server.is_ok());
            assert!(socket_path.parent().unwrap().exists());
        }

        #[tokio::test]
        async fn test_receive_request_status() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                stream.write_all(br#"{"command":"status"}"#).await.unwrap();
                stream.flush().await.unwrap();
                stream
            });

            let mut stream = server.accept().await.unwrap();
            let request = IpcServer::receive_request(&mut stream).await.unwrap();
            assert!(matches!(request, IpcRequest::Status));

            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_receive_request_trigger() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                stream
                    .write_all(br#"{"command":"trigger","source":"lid"}"#)
                    .await
                    .unwrap();
                stream
            });

            let mut stream = server.accept().await.unwrap();
            let request = IpcServer::receive_request(&mut stream).await.unwrap();
            assert!(matches!(
                request,
                IpcRequest::Trigger {
                    source: TriggerSource::Lid
                }
            ));

            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_send_response() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                let mut buffer = vec![0u8; 4096];
                let n = stream.read(&mut buffer).await.unwrap();
                serde_json::from_slice::<IpcResponse>(&buffer[..n]).unwrap()
            });

            let mut stream = server.accept().await.unwrap();
            let response = IpcResponse::success("Test message", None);
            IpcServer::send_response(&mut stream, &response)
                .await
                .unwrap();

            let received = client_handle.await.unwrap();
            assert_eq!(received.status, "success");
            assert_eq!(received.message, "Test message");
        }

        #[tokio::test]
        async fn test_receive_request_invalid_json() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                stream.write_all(b"not valid json").await.unwrap();
                stream
            });

            let mut stream = server.accept().await.unwrap();
            let request = IpcServer::receive_request(&mut stream).await;
            assert!(request.is_err());

            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_connection_closed() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let stream = UnixStream::connect(&client_path).await.unwrap();
                drop(stream);
            });

            let mut stream = server.accept().await.unwrap();
            client_handle.await.unwrap();

            let error = IpcServer::receive_request(&mut stream).await.unwrap_err();
            assert!(matches!(
                error.downcast_ref::<IpcError>(),
                Some(IpcError::ConnectionClosed)
            ));
        }

        #[tokio::test]
        async fn test_server_drop_cleanup() {
            let (_dir, socket_path) = create_temp_socket_path();

            {
                let server = IpcServer::new(&socket_path).unwrap();
                assert_eq!(server.socket_path(), socket_path);
                assert!(socket_path.exists());
            }

            assert!(!socket_path.exists());
        }

        #[test]
        fn test_ipc_error_helpers() {
            assert!(IpcError::Timeout.is_recoverable());
            assert!(!IpcError::RequestTooLarge.is_recoverable());
            assert!(IpcError::RequestTooLarge.to_string().contains("4096"));
        }
    }

    // ------------------------------------------------------------------------
    // RequestHandler Tests
    // ------------------------------------------------------------------------

    mod request_handler_tests {
        use super::*;

        #[tokio::test]
        async fn test_handle_status() {
            let (_services, _auth, handler) = create_handler();
            let response = handler.handle(IpcRequest::Status).await;

            assert!(response.is_success());
            let data = response.data.unwrap();
            assert_eq!(data.state, Some("idle".to_string()));
            assert_eq!(data.failed_auth_attempts, Some(0));
            assert_eq!(data.devices.len(), 1);
        }

        #[tokio::test]
        async fn test_handle_arm() {
            let (_services, _auth, handler) = create_handler();

            let response = handler.handle(IpcRequest::Arm).await;
            assert!(response.is_success());
            assert_eq!(response.message, "警備を開始しました");
            assert_eq!(state(&response), Some("armed".to_string()));

            let response = handler.handle(IpcRequest::Arm).await;
            assert!(!response.is_success());
            assert!(response.message.contains("既に警備中"));
        }

        #[tokio::test]
        async fn test_handle_disarm_when_armed() {
            let (_services, auth, handler) = create_handler();
            handler.handle(IpcRequest::Arm).await;

            let response = handler.handle(IpcRequest::Disarm { pin: None }).await;
            assert!(response.is_success());
            assert_eq!(state(&response), Some("idle".to_string()));
            assert_eq!(auth.call_count(), 0);
        }

        #[tokio::test]
        async fn test_handle_disarm_when_idle() {
            let (_services, _auth, handler) = create_handler();
            let response = handler.handle(IpcRequest::Disarm { pin: None }).await;

            assert!(!response.is_success());
            assert!(response.message.contains("警備していません"));
        }

        #[tokio::test]
        async fn test_trigger_requires_running_monitor() {
            let (_services, _auth, handler) = create_handler();
            let response = handler
                .handle(IpcRequest::Trigger {
                    source: TriggerSource::Lid,
                })
                .await;

            assert!(!response.is_success());
            assert_eq!(state(&response), Some("idle".to_string()));
        }

        #[tokio::test]
        async fn test_trigger_escalates() {
            let (services, _auth, handler) = create_handler();
            escalate(&services, &handler).await;

            let data = handler.handle(IpcRequest::Status).await.data.unwrap();
            assert_eq!(data.state, Some("triggered".to_string()));
            assert_eq!(data.last_trigger, Some(TriggerSource::Input));
            assert_eq!(data.remaining_seconds, Some(3));
        }

        #[tokio::test]
        async fn test_escalated_disarm_authenticates() {
            let (services, auth, handler) = create_handler();
            escalate(&services, &handler).await;

            let response = handler
                .handle(IpcRequest::Disarm {
                    pin: Some("2468".to_string()),
                })
                .await;
            assert!(response.is_success());
            assert_eq!(state(&response), Some("idle".to_string()));
            assert_eq!(auth.call_count(), 1);
        }

        #[tokio::test]
        async fn test_escalated_disarm_rejected() {
            let (services, auth, handler) = create_handler();
            auth.push_outcome(AuthOutcome::Failure(AuthFailureReason::PinIncorrect));
            escalate(&services, &handler).await;

            let response = handler
                .handle(IpcRequest::Disarm {
                    pin: Some("0000".to_string()),
                })
                .await;
            assert!(!response.is_success());
            assert!(response.message.contains("PINが正しくありません"));

            let data = response.data.unwrap();
            assert_eq!(data.state, Some("triggered".to_string()));
            assert_eq!(data.failed_auth_attempts, Some(1));
        }

        #[tokio::test]
        async fn test_handle_auth_returns_to_armed() {
            let (services, _auth, handler) = create_handler();
            escalate(&services, &handler).await;

            let response = handler.handle(IpcRequest::Auth { pin: None }).await;
            assert!(response.is_success());
            assert_eq!(state(&response), Some("armed".to_string()));
        }

        #[tokio::test]
        async fn test_handle_auth_when_not_escalated() {
            let (_services, auth, handler) = create_handler();
            let response = handler.handle(IpcRequest::Auth { pin: None }).await;

            assert!(!response.is_success());
            assert_eq!(auth.call_count(), 0);
        }

        #[tokio::test]
        async fn test_handle_sample_marks_device_near() {
            let (_services, _auth, handler) = create_handler();
            let response = handler
                .handle(IpcRequest::Sample {
                    device_id: DeviceId::new("phone"),
                    rssi: Some(-45),
                    connected: false,
                })
                .await;

            assert!(response.is_success());
            let devices = response.data.unwrap().devices;
            assert_eq!(devices[0].last_strength, Some(-45));
        }

        #[tokio::test]
        async fn test_handle_connected_sample_uses_fallback() {
            let (_services, _auth, handler) = create_handler();
            let response = handler
                .handle(IpcRequest::Sample {
                    device_id: DeviceId::new("phone"),
                    rssi: None,
                    connected: true,
                })
                .await;

            let devices = response.data.unwrap().devices;
            assert_eq!(devices[0].last_strength, Some(-50));
        }

        #[tokio::test]
        async fn test_handle_sample_unknown_device() {
            let (_services, _auth, handler) = create_handler();
            let response = handler
                .handle(IpcRequest::Sample {
                    device_id: DeviceId::new("stranger"),
                    rssi: Some(-30),
                    connected: false,
                })
                .await;

            assert!(!response.is_success());
            assert!(response.message.contains("stranger"));
        }

        #[tokio::test]
        async fn test_device_add_and_remove_persist() {
            let (_services, _auth, handler) = create_handler();
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            let handler = handler.with_config_file(guard_config(), path.clone());

            let response = handler
                .handle(IpcRequest::DeviceAdd {
                    device: DeviceSpec::new("watch", "Watch", TransportKind::Classic),
                })
                .await;
            assert!(response.is_success(), "{}", response.message);
            assert_eq!(GuardConfig::load(&path).unwrap().devices.len(), 2);

            let response = handler
                .handle(IpcRequest::DeviceRemove {
                    id: DeviceId::new("phone"),
                })
                .await;
            assert!(response.is_success());
            let saved = GuardConfig::load(&path).unwrap();
            assert_eq!(saved.devices.len(), 1);
            assert_eq!(saved.devices[0].id.as_str(), "watch");
        }

        #[tokio::test]
        async fn test_device_add_duplicate_rejected() {
            let (_services, _auth, handler) = create_handler();
            let response = handler
                .handle(IpcRequest::DeviceAdd {
                    device: DeviceSpec::new("phone", "Phone", TransportKind::LowEnergy),
                })
                .await;

            assert!(!response.is_success());
        }
    }

    // ------------------------------------------------------------------------
    // Integration Tests
    // ------------------------------------------------------------------------

    mod integration_tests {
        use super::*;

        async fn request(path: &Path, json: &str) -> IpcResponse {
            let mut stream = UnixStream::connect(path).await.unwrap();
            stream.write_all(json.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            let mut buffer = Vec::new();
            stream.read_to_end(&mut buffer).await.unwrap();
            serde_json::from_slice(&buffer).unwrap()
        }

        #[tokio::test]
        async fn test_serve_round_trip() {
            let (_dir, socket_path) = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            let (_services, _auth, handler) = create_handler();
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

            let serving = tokio::spawn(async move {
                serve(&server, Arc::new(handler), async {
                    let _ = stop_rx.await;
                })
                .await;
            });

            let response = request(&socket_path, r#"{"command":"arm"}"#).await;
            assert!(response.is_success());

            let response = request(&socket_path, r#"{"command":"status"}"#).await;
            assert_eq!(state(&response), Some("armed".to_string()));

            let response = request(&socket_path, "garbage").await;
            assert!(!response.is_success());

            stop_tx.send(()).unwrap();
            serving.await.unwrap();
            assert!(!socket_path.exists());
        }
    }
}
