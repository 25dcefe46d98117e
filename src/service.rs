//! 백그라운드 실행 관리
//!
//! 한 번에 하나의 실행만 허용하고, 취소 토큰과 JoinHandle 로 실행을 제어합니다.

use crate::error::{Result, StreamerError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Idle,
    Running,
    /// 스트림 끝까지 정상 처리
    Stopped,
    Failed,
    Cancelled,
}

/// 성공적으로 끝난 실행의 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    EndOfStream,
    Cancelled,
}

/// 실행 중인 작업에 전달되는 컨텍스트
#[derive(Debug, Clone)]
pub struct ServiceContext {
    token: CancellationToken,
}

impl ServiceContext {
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 취소될 때까지 대기
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

type RunHandle = JoinHandle<Result<RunOutcome>>;

#[derive(Debug)]
struct RunSlot {
    state: ServiceState,
    token: Option<CancellationToken>,
}

/// 단일 실행 관리자
#[derive(Debug)]
pub struct ServiceManager {
    slot: Arc<Mutex<RunSlot>>,
    handle: tokio::sync::Mutex<Option<RunHandle>>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        ServiceManager {
            slot: Arc::new(Mutex::new(RunSlot {
                state: ServiceState::Idle,
                token: None,
            })),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.slot.lock().state
    }

    /// `f` 를 새 tokio 작업으로 실행한다.
    ///
    /// 이전 실행이 아직 진행 중이거나 다른 호출자가 `join` 중이면 `AlreadyRunning`.
    pub fn go<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(ServiceContext) -> Fut,
        Fut: Future<Output = Result<RunOutcome>> + Send + 'static,
    {
        let mut handle_slot = self
            .handle
            .try_lock()
            .map_err(|_| StreamerError::AlreadyRunning)?;
        let mut slot = self.slot.lock();
        if slot.state == ServiceState::Running {
            return Err(StreamerError::AlreadyRunning);
        }
        if handle_slot.is_some() {
            warn!("Previous run finished as {:?} but was never joined", slot.state);
        }

        let token = CancellationToken::new();
        let future = f(ServiceContext {
            token: token.clone(),
        });
        let shared = self.slot.clone();

        slot.state = ServiceState::Running;
        slot.token = Some(token);
        *handle_slot = Some(tokio::spawn(async move {
            let result = future.await;
            let state = match &result {
                Ok(RunOutcome::EndOfStream) => ServiceState::Stopped,
                Ok(RunOutcome::Cancelled) => ServiceState::Cancelled,
                Err(e) => {
                    error!("Run failed: {}", e);
                    ServiceState::Failed
                }
            };
            shared.lock().state = state;
            info!("Run finished: {:?}", state);
            result
        }));
        Ok(())
    }

    /// 실행 종료까지 대기하고 결과를 반환한다.
    ///
    /// 대기 중인 future 를 버려도 실행 결과는 남아 있으므로 다시 `join` 할 수 있다.
    pub async fn join(&self) -> Result<RunOutcome> {
        let mut handle_slot = self.handle.lock().await;
        let handle = handle_slot.as_mut().ok_or(StreamerError::NotRunning)?;
        let joined = handle.await;
        *handle_slot = None;

        match joined {
            Ok(result) => result,
            Err(e) => {
                self.slot.lock().state = ServiceState::Failed;
                if e.is_panic() {
                    Err(StreamerError::Other(format!("Run panicked: {}", e)))
                } else {
                    Err(StreamerError::Other(format!("Run aborted: {}", e)))
                }
            }
        }
    }

    /// 실행 취소 요청. 여러 번 호출해도 되고, 실행이 없으면 아무것도 하지 않는다.
    pub fn cancel(&self) {
        let slot = self.slot.lock();
        if slot.state != ServiceState::Running {
            return;
        }
        if let Some(token) = &slot.token {
            if !token.is_cancelled() {
                debug!("Cancellation requested");
            }
            token.cancel();
        }
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if let Some(token) = &self.slot.lock().token {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_run_to_completion() {
        let service = ServiceManager::new();
        assert_eq!(service.state(), ServiceState::Idle);

        assert_ok!(service.go(|_ctx| async { Ok(RunOutcome::EndOfStream) }));
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(assert_ok!(service.join().await), RunOutcome::EndOfStream);
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_second_go_while_running_is_rejected() {
        let service = ServiceManager::new();
        assert_ok!(service.go(|ctx| async move {
            ctx.cancelled().await;
            Ok(RunOutcome::Cancelled)
        }));

        let err = assert_err!(service.go(|_ctx| async { Ok(RunOutcome::EndOfStream) }));
        assert!(matches!(err, StreamerError::AlreadyRunning));

        service.cancel();
        assert_eq!(assert_ok!(service.join().await), RunOutcome::Cancelled);
        assert_eq!(service.state(), ServiceState::Cancelled);

        // 종료 후에는 다시 시작할 수 있다
        assert_ok!(service.go(|_ctx| async { Ok(RunOutcome::EndOfStream) }));
        assert_ok!(service.join().await);
    }

    #[tokio::test]
    async fn test_join_without_run() {
        let service = ServiceManager::new();
        let err = assert_err!(service.join().await);
        assert!(matches!(err, StreamerError::NotRunning));

        assert_ok!(service.go(|_ctx| async { Ok(RunOutcome::EndOfStream) }));
        assert_ok!(service.join().await);
        let err = assert_err!(service.join().await);
        assert!(matches!(err, StreamerError::NotRunning));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let service = ServiceManager::new();
        service.cancel();
        assert_eq!(service.state(), ServiceState::Idle);

        assert_ok!(service.go(|ctx| async move {
            ctx.cancelled().await;
            Ok(RunOutcome::Cancelled)
        }));
        service.cancel();
        service.cancel();
        assert_eq!(assert_ok!(service.join().await), RunOutcome::Cancelled);
        service.cancel();
        assert_eq!(service.state(), ServiceState::Cancelled);
    }

    #[tokio::test]
    async fn test_run_error_surfaces_through_join() {
        let service = ServiceManager::new();
        assert_ok!(service.go(|_ctx| async {
            Err(StreamerError::SourceIo("disk gone".to_string()))
        }));
        let err = assert_err!(service.join().await);
        assert!(matches!(err, StreamerError::SourceIo(_)));
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_other() {
        let service = ServiceManager::new();
        assert_ok!(service.go(|_ctx| async {
            if true {
                panic!("boom");
            }
            Ok(RunOutcome::EndOfStream)
        }));
        let err = assert_err!(service.join().await);
        assert!(matches!(err, StreamerError::Other(_)));
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_join_after_timeout() {
        let service = ServiceManager::new();
        assert_ok!(service.go(|ctx| async move {
            ctx.cancelled().await;
            Ok(RunOutcome::Cancelled)
        }));

        let timed_out = tokio::time::timeout(Duration::from_millis(20), service.join()).await;
        assert!(timed_out.is_err());

        service.cancel();
        assert_eq!(assert_ok!(service.join().await), RunOutcome::Cancelled);
    }
}
