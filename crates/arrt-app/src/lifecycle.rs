//! 라이프사이클 관리.
//!
//! 종료 신호 전파와 메인 스레드 대기 루프.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use arrt_core::dispatch::MainQueue;

/// 종료 플래그 확인 간격
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// 라이프사이클 관리자
pub struct LifecycleManager {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    /// 종료 수신기 복제
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// 종료 신호 발송
    pub fn shutdown(&self) {
        info!("종료 신호 발송");
        let _ = self.shutdown_tx.send(true);
    }

    /// OS 시그널 대기 (SIGINT, SIGTERM)
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm) = match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("시그널 핸들러 등록 실패: {e}");
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => info!("SIGINT 수신"),
                _ = sigterm.recv() => info!("SIGTERM 수신"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl+C 핸들러 등록 실패: {e}");
                return;
            }
            info!("Ctrl+C 수신");
        }

        self.shutdown();
    }

    /// 메인 큐를 돌리며 `done`이 참이 될 때까지 대기
    ///
    /// 종료 신호나 `timeout`이 먼저 오면 그 사실을 반환한다.
    pub fn run_until<F>(&self, queue: &MainQueue, timeout: Option<Duration>, mut done: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if queue.pump_until(SHUTDOWN_CHECK, &mut done) {
                return WaitOutcome::Done;
            }
            if self.is_shutdown() {
                return WaitOutcome::Shutdown;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return WaitOutcome::TimedOut;
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// [`LifecycleManager::run_until`] 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Done,
    Shutdown,
    TimedOut,
}
