//! 세션 상태 머신 통합 테스트.
//!
//! 가짜 렌더링 서비스/런타임 + 수동 시계. 테스트 스레드가 메인 스레드 역할을 한다.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Semaphore};

use arrt_core::clock::ManualClock;
use arrt_core::config_manager::ConfigManager;
use arrt_core::dispatch::MainQueue;
use arrt_core::error::CoreError;
use arrt_core::models::session::{
    RemoteSessionStatus, SessionOptions, SessionProperties, SessionStatus, VmSize,
};
use arrt_core::ports::rendering::RenderingService;
use arrt_core::models::stats::{FrameStatistics, PerformanceAssessment};
use arrt_core::ports::runtime::{
    EntityId, LoadedModel, PerformanceProbe, ProgressCallback, RuntimeConnector,
};
use arrt_session::events::SessionEvent;
use arrt_session::stats::{StatKind, StatView};
use arrt_session::SessionManager;

const SESSION_ID: &str = "sess-1";
const TIMEOUT: Duration = Duration::from_secs(5);

/// 호출을 기록하고 원격 상태를 테스트가 조작하는 렌더링 서비스
struct FakeService {
    remote: Mutex<RemoteSessionStatus>,
    elapsed: Mutex<u32>,
    max_lease: Mutex<u32>,
    message: Mutex<Option<String>>,
    fail_create: AtomicBool,
    fail_get: AtomicBool,
    gate_create: bool,
    create_gate: Semaphore,
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    fn new(gate_create: bool) -> Self {
        Self {
            remote: Mutex::new(RemoteSessionStatus::Starting),
            elapsed: Mutex::new(0),
            max_lease: Mutex::new(0),
            message: Mutex::new(None),
            fail_create: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            gate_create,
            create_gate: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn set_remote(&self, status: RemoteSessionStatus) {
        *self.remote.lock() = status;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    fn properties(&self, id: &str) -> SessionProperties {
        let status = *self.remote.lock();
        SessionProperties {
            id: id.to_string(),
            size: VmSize::Standard,
            status,
            hostname: (status == RemoteSessionStatus::Ready).then(|| "host.example".to_string()),
            handshake_port: None,
            arr_inspector_port: None,
            max_lease_minutes: *self.max_lease.lock(),
            elapsed_minutes: *self.elapsed.lock(),
            message: self.message.lock().clone(),
            created_at: None,
        }
    }
}

#[async_trait]
impl RenderingService for FakeService {
    async fn create_session(
        &self,
        options: &SessionOptions,
    ) -> Result<SessionProperties, CoreError> {
        self.calls
            .lock()
            .push(format!("create:{}", options.max_lease_minutes));
        if self.gate_create {
            self.create_gate.acquire().await.unwrap().forget();
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoreError::ServiceUnavailable("no capacity".to_string()));
        }
        *self.max_lease.lock() = options.max_lease_minutes;
        Ok(self.properties(SESSION_ID))
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionProperties, CoreError> {
        self.calls.lock().push(format!("get:{session_id}"));
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(CoreError::Network("gateway down".to_string()));
        }
        Ok(self.properties(session_id))
    }

    async fn update_session(
        &self,
        session_id: &str,
        max_lease_minutes: u32,
    ) -> Result<SessionProperties, CoreError> {
        self.calls
            .lock()
            .push(format!("update:{session_id}:{max_lease_minutes}"));
        *self.max_lease.lock() = max_lease_minutes;
        Ok(self.properties(session_id))
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), CoreError> {
        self.calls.lock().push(format!("stop:{session_id}"));
        self.set_remote(RemoteSessionStatus::Stopped);
        Ok(())
    }
}

/// 호출 순서를 기록하는 런타임. 해제 시점의 저장된 세션 ID도 남긴다.
struct FakeRuntime {
    config: ConfigManager,
    log: Mutex<Vec<String>>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
}

impl FakeRuntime {
    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl RuntimeConnector for FakeRuntime {
    async fn connect(&self, session: &SessionProperties) -> Result<(), CoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("connect:{}", session.id));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CoreError::Network("handshake refused".to_string()));
        }
        Ok(())
    }

    fn disconnect(&self) {
        let persisted = self.config.running_session();
        self.log.lock().push(format!("disconnect:{persisted:?}"));
    }

    async fn load_model(
        &self,
        url: &str,
        progress: ProgressCallback,
    ) -> Result<LoadedModel, CoreError> {
        self.log.lock().push(format!("load:{url}"));
        progress(0.5);
        progress(1.0);
        Ok(LoadedModel {
            url: url.to_string(),
            root: EntityId(7),
        })
    }

    fn unload_model(&self, model: &LoadedModel) {
        self.log.lock().push(format!("unload:{}", model.url));
    }
}

/// 고정된 성능 평가를 돌려주는 질의 대상
struct FixedAssessor;

#[async_trait]
impl PerformanceProbe for FixedAssessor {
    async fn query_performance_assessment(&self) -> Result<PerformanceAssessment, CoreError> {
        Ok(PerformanceAssessment {
            time_gpu_ms: 3.5,
            polygons_rendered: 42,
            ..Default::default()
        })
    }
}

struct Harness {
    manager: SessionManager,
    queue: MainQueue,
    clock: Arc<ManualClock>,
    service: Arc<FakeService>,
    runtime: Arc<FakeRuntime>,
    config: ConfigManager,
    _rt: tokio::runtime::Runtime,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::build(false, |_| {})
    }

    fn build(gate_create: bool, configure: impl FnOnce(&ConfigManager)) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::with_path(dir.path().join("config.json")).unwrap();
        config
            .update_with(|c| c.session.auto_extend = false)
            .unwrap();
        configure(&config);

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let queue = MainQueue::new();
        let clock = Arc::new(ManualClock::new());
        let service = Arc::new(FakeService::new(gate_create));
        let runtime = Arc::new(FakeRuntime {
            config: config.clone(),
            log: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        });

        let manager = SessionManager::builder(
            service.clone(),
            config.clone(),
            queue.clone(),
            rt.handle().clone(),
        )
        .runtime(runtime.clone())
        .clock(clock.clone())
        .stats(Some(Arc::new(FixedAssessor)))
        .build();

        Self {
            manager,
            queue,
            clock,
            service,
            runtime,
            config,
            _rt: rt,
            _dir: dir,
        }
    }

    fn wait_for(&self, status: SessionStatus) {
        let reached = self
            .queue
            .pump_until(TIMEOUT, || self.manager.status() == status);
        assert!(reached, "{status} 대기 실패, 현재 {}", self.manager.status());
    }

    fn start(&self, lease: u32) {
        self.manager
            .start_session(SessionOptions {
                size: VmSize::Standard,
                max_lease_minutes: lease,
            })
            .unwrap();
    }

    /// 시작 → Ready → 런타임 연결까지
    fn bring_up(&self, lease: u32) {
        self.start(lease);
        self.wait_for(SessionStatus::Starting);
        self.service.set_remote(RemoteSessionStatus::Ready);
        self.manager.update_status();
        self.wait_for(SessionStatus::ReadyConnected);
    }
}

fn count_calls(service: &FakeService, prefix: &str) -> usize {
    service
        .calls()
        .iter()
        .filter(|c| c.starts_with(prefix))
        .count()
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn start_reaches_connected_and_persists_session_id() {
    let h = Harness::new();
    let mut rx = h.manager.subscribe();

    h.bring_up(30);

    assert_eq!(h.config.running_session().as_deref(), Some(SESSION_ID));
    assert_eq!(h.runtime.connects.load(Ordering::SeqCst), 1);
    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.session_id(), Some(SESSION_ID));
    assert_eq!(snapshot.hostname.as_deref(), Some("host.example"));
    assert_eq!(snapshot.max_lease_minutes, 30);

    let transitions: Vec<(SessionStatus, SessionStatus)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StatusChanged { old, new } => Some((old, new)),
            _ => None,
        })
        .collect();
    use SessionStatus::*;
    assert_eq!(
        transitions,
        [
            (NotActive, StartRequested),
            (StartRequested, Starting),
            (Starting, ReadyNotConnected),
            (ReadyNotConnected, ReadyConnecting),
            (ReadyConnecting, ReadyConnected),
        ]
    );
}

#[test]
fn second_start_is_rejected_without_touching_running_session() {
    let h = Harness::new();
    h.bring_up(30);

    let err = h
        .manager
        .start_session(SessionOptions {
            size: VmSize::Premium,
            max_lease_minutes: 10,
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
    assert_eq!(h.manager.status(), SessionStatus::ReadyConnected);
    assert_eq!(
        h.service.calls().iter().filter(|c| c.starts_with("create")).count(),
        1
    );
}

#[test]
fn zero_lease_is_rejected() {
    let h = Harness::new();
    let err = h
        .manager
        .start_session(SessionOptions {
            size: VmSize::Standard,
            max_lease_minutes: 0,
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert_eq!(h.manager.status(), SessionStatus::NotActive);
}

#[test]
fn lease_expiry_is_detected_locally() {
    let h = Harness::new();
    h.bring_up(60);
    let mut rx = h.manager.subscribe();
    let polls_before = h.service.calls().iter().filter(|c| c.starts_with("get")).count();

    h.clock.advance(Duration::from_secs(61 * 60));
    h.manager.update_status();

    // 원격 응답 없이 바로 Expired
    assert_eq!(h.manager.status(), SessionStatus::Expired);
    assert_eq!(
        h.service.calls().iter().filter(|c| c.starts_with("get")).count(),
        polls_before
    );
    assert_eq!(h.config.running_session(), None);
    assert_eq!(
        drain(&mut rx),
        [
            SessionEvent::StatusChanged {
                old: SessionStatus::ReadyConnected,
                new: SessionStatus::Expired,
            },
            SessionEvent::SessionReleased {
                session_id: Some(SESSION_ID.to_string()),
            },
        ]
    );
}

#[test]
fn runtime_is_torn_down_before_session_is_released() {
    let h = Harness::new();
    h.bring_up(30);
    let model_loaded = Arc::new(AtomicBool::new(false));
    let flag = model_loaded.clone();
    h.manager
        .load_model_async("builtin://Engine", |_| {}, move |r| {
            flag.store(r.is_ok(), Ordering::SeqCst)
        })
        .unwrap();
    assert!(h
        .queue
        .pump_until(TIMEOUT, || model_loaded.load(Ordering::SeqCst)));

    h.manager.stop_session().unwrap();
    assert_eq!(h.manager.status(), SessionStatus::StopRequested);
    h.wait_for(SessionStatus::Stopped);

    // 해제 시점에는 아직 세션 ID가 저장되어 있어야 한다
    let log = h.runtime.log();
    let tail: Vec<&str> = log.iter().rev().take(2).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        ["unload:builtin://Engine", "disconnect:Some(\"sess-1\")"]
    );
    assert!(h.service.called("stop:sess-1"));
    assert_eq!(h.config.running_session(), None);
    assert!(h.manager.loaded_model().is_none());
}

#[test]
fn stop_before_session_id_is_known_is_deferred() {
    let h = Harness::build(true, |_| {});
    h.start(30);
    assert_eq!(h.manager.status(), SessionStatus::StartRequested);

    h.manager.stop_session().unwrap();
    assert_eq!(h.manager.status(), SessionStatus::StopRequested);
    h.queue.pump_for(Duration::from_millis(20));
    assert!(!h.service.calls().iter().any(|c| c.starts_with("stop")));

    h.service.create_gate.add_permits(1);
    h.wait_for(SessionStatus::Stopped);
    assert!(h.service.called("stop:sess-1"));
    assert_eq!(h.runtime.connects.load(Ordering::SeqCst), 0);
    assert_eq!(h.config.running_session(), None);
}

#[test]
fn repeated_stop_sends_one_request() {
    let h = Harness::new();
    h.bring_up(30);
    h.manager.stop_session().unwrap();
    h.manager.stop_session().unwrap();
    h.wait_for(SessionStatus::Stopped);
    assert_eq!(
        h.service.calls().iter().filter(|c| c.starts_with("stop")).count(),
        1
    );
    assert!(matches!(
        h.manager.stop_session(),
        Err(CoreError::InvalidState(_))
    ));
}

#[test]
fn failed_create_moves_to_error() {
    let h = Harness::new();
    h.service.fail_create.store(true, Ordering::SeqCst);
    h.start(30);
    h.wait_for(SessionStatus::Error);
    assert!(h.manager.last_error().unwrap().contains("no capacity"));
    assert!(!h.manager.is_running());

    // Error 이후 새 세션 시작 가능
    h.service.fail_create.store(false, Ordering::SeqCst);
    h.start(30);
    h.wait_for(SessionStatus::Starting);
    assert!(h.manager.last_error().is_none());
}

#[test]
fn remote_error_carries_server_message() {
    let h = Harness::new();
    h.start(30);
    h.wait_for(SessionStatus::Starting);
    *h.service.message.lock() = Some("allocation failed".to_string());
    h.service.set_remote(RemoteSessionStatus::Error);
    h.manager.update_status();
    h.wait_for(SessionStatus::Error);
    assert_eq!(h.manager.last_error().as_deref(), Some("allocation failed"));
}

#[test]
fn explicit_disconnect_disables_auto_reconnect() {
    let h = Harness::new();
    h.bring_up(30);

    h.manager.disconnect_from_session_runtime().unwrap();
    assert_eq!(h.manager.status(), SessionStatus::ReadyNotConnected);
    h.manager.update_status();
    h.queue.pump_for(Duration::from_millis(50));
    assert_eq!(h.manager.status(), SessionStatus::ReadyNotConnected);
    assert_eq!(h.runtime.connects.load(Ordering::SeqCst), 1);

    h.manager.connect_to_session_runtime().unwrap();
    h.wait_for(SessionStatus::ReadyConnected);
    assert_eq!(h.runtime.connects.load(Ordering::SeqCst), 2);
}

#[test]
fn lost_connection_reconnects_on_next_poll() {
    let h = Harness::new();
    h.bring_up(30);

    h.manager.on_runtime_connection_lost();
    assert_eq!(h.manager.status(), SessionStatus::ReadyNotConnected);
    assert!(h.runtime.log().iter().any(|l| l.starts_with("disconnect")));

    h.manager.update_status();
    h.wait_for(SessionStatus::ReadyConnected);
    assert_eq!(h.runtime.connects.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_connect_falls_back_to_not_connected() {
    let h = Harness::new();
    h.runtime.fail_connect.store(true, Ordering::SeqCst);
    h.start(30);
    h.wait_for(SessionStatus::Starting);
    h.service.set_remote(RemoteSessionStatus::Ready);
    h.manager.update_status();

    assert!(h
        .queue
        .pump_until(TIMEOUT, || h.manager.last_error().is_some()));
    assert_eq!(h.manager.status(), SessionStatus::ReadyNotConnected);
    assert!(h.manager.last_error().unwrap().contains("handshake refused"));
}

#[test]
fn restore_reconnects_to_persisted_session() {
    let h = Harness::build(false, |config| {
        config.set_running_session(Some("restored")).unwrap();
    });
    h.service.set_remote(RemoteSessionStatus::Ready);

    assert!(h.manager.restore_running_session().unwrap());
    h.wait_for(SessionStatus::ReadyConnected);
    assert!(h.service.called("get:restored"));
    assert_eq!(h.manager.snapshot().session_id(), Some("restored"));
    assert!(!h.service.calls().iter().any(|c| c.starts_with("create")));
}

#[test]
fn restore_without_persisted_session_does_nothing() {
    let h = Harness::new();
    assert!(!h.manager.restore_running_session().unwrap());
    assert_eq!(h.manager.status(), SessionStatus::NotActive);
}

#[test]
fn manual_extension_adds_configured_minutes() {
    let h = Harness::new();
    h.bring_up(60);
    h.manager.set_extension_time(15, false).unwrap();
    assert_eq!(h.config.get().session.extension_minutes, 15);

    h.manager.extend_max_session_time().unwrap();
    assert!(h
        .queue
        .pump_until(TIMEOUT, || h.manager.snapshot().max_lease_minutes == 75));
    assert!(h.service.called("update:sess-1:75"));

    assert!(matches!(
        h.manager.set_extension_time(0, true),
        Err(CoreError::Validation { .. })
    ));
}

#[test]
fn auto_extend_fires_near_lease_end() {
    let h = Harness::build(false, |config| {
        config
            .update_with(|c| {
                c.session.auto_extend = true;
                c.session.auto_extend_threshold_minutes = 5;
                c.session.extension_minutes = 10;
            })
            .unwrap();
    });
    *h.service.elapsed.lock() = 57;
    h.bring_up(60);

    h.manager.update_status();
    assert!(h
        .queue
        .pump_until(TIMEOUT, || h.service.called("update:sess-1:70")));
}

#[test]
fn model_load_reports_progress_and_replaces_previous() {
    let h = Harness::new();

    let not_ready = h.manager.load_model_async("builtin://Engine", |_| {}, |_| {});
    assert!(matches!(not_ready, Err(CoreError::InvalidState(_))));

    h.bring_up(30);
    let mut rx = h.manager.subscribe();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(None));
    let (p, d) = (progress.clone(), done.clone());
    h.manager
        .load_model_async(
            "builtin://Engine",
            move |v| p.lock().push(v),
            move |r| *d.lock() = Some(r.map(|m| m.root)),
        )
        .unwrap();
    assert!(h.queue.pump_until(TIMEOUT, || done.lock().is_some()));
    h.queue.pump_for(Duration::from_millis(20));

    assert_eq!(*progress.lock(), [0.5, 1.0]);
    assert!(matches!(*done.lock(), Some(Ok(EntityId(7)))));
    assert_eq!(h.manager.loaded_model().map(|m| m.root), Some(EntityId(7)));

    let done2 = Arc::new(AtomicBool::new(false));
    let d2 = done2.clone();
    h.manager
        .load_model_async("builtin://Car", |_| {}, move |r| {
            d2.store(r.is_ok(), Ordering::SeqCst)
        })
        .unwrap();
    assert!(h.queue.pump_until(TIMEOUT, || done2.load(Ordering::SeqCst)));
    assert!(h.runtime.log().contains(&"unload:builtin://Engine".to_string()));

    let roots: Vec<Option<EntityId>> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::RootEntityChanged(root) => Some(root),
            _ => None,
        })
        .collect();
    assert_eq!(roots, [Some(EntityId(7)), None, Some(EntityId(7))]);
}

#[test]
fn responses_after_drop_are_discarded() {
    let h = Harness::build(true, |_| {});
    h.start(30);
    let Harness {
        manager,
        queue,
        service,
        config,
        _rt,
        _dir,
        ..
    } = h;
    drop(manager);

    service.create_gate.add_permits(1);
    queue.pump_for(Duration::from_millis(50));
    // 해제된 관리자는 생성 응답을 저장하지 않는다
    assert_eq!(config.running_session(), None);
}

#[test]
fn zero_poll_interval_is_rejected() {
    let h = Harness::new();
    h.start(30);
    h.wait_for(SessionStatus::Starting);

    assert!(matches!(
        h.manager.start_polling(Duration::ZERO),
        Err(CoreError::Validation { .. })
    ));

    h.manager.start_polling(Duration::from_millis(10)).unwrap();
    assert!(h
        .queue
        .pump_until(TIMEOUT, || count_calls(&h.service, "get") >= 2));
    h.manager.stop_polling();
}

#[test]
fn remote_error_tears_down_runtime_before_release() {
    let h = Harness::new();
    h.bring_up(30);
    let mut rx = h.manager.subscribe();

    h.service.set_remote(RemoteSessionStatus::Error);
    h.manager.update_status();
    h.wait_for(SessionStatus::Error);

    assert_eq!(
        h.runtime.log().last().map(String::as_str),
        Some("disconnect:Some(\"sess-1\")")
    );
    assert_eq!(h.config.running_session(), None);
    let events: Vec<SessionEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::PropertiesUpdated))
        .collect();
    assert_eq!(
        events,
        [
            SessionEvent::StatusChanged {
                old: SessionStatus::ReadyConnected,
                new: SessionStatus::Error,
            },
            SessionEvent::SessionReleased {
                session_id: Some(SESSION_ID.to_string()),
            },
        ]
    );
}

#[test]
fn failed_poll_moves_to_error_and_releases_session() {
    let h = Harness::new();
    h.bring_up(30);

    h.service.fail_get.store(true, Ordering::SeqCst);
    h.manager.update_status();
    h.wait_for(SessionStatus::Error);

    assert!(h.manager.last_error().unwrap().contains("gateway down"));
    assert_eq!(
        h.runtime.log().last().map(String::as_str),
        Some("disconnect:Some(\"sess-1\")")
    );
    assert_eq!(h.config.running_session(), None);
    assert!(!h.manager.is_running());
}

#[test]
fn stats_follow_connected_session() {
    let h = Harness::new();
    let frame = FrameStatistics {
        video_frames_received: 2,
        ..Default::default()
    };

    // 연결 전 프레임은 버린다
    h.manager.add_frame_statistics(&frame);
    h.bring_up(30);
    let per_frame = |h: &Harness| {
        h.manager
            .with_stats(|s| s.series(StatKind::VideoFramesReceived, StatView::PerFrame).len())
            .unwrap()
    };
    assert_eq!(per_frame(&h), 0);

    h.manager.add_frame_statistics(&frame);
    h.manager.add_frame_statistics(&frame);
    h.clock.advance(Duration::from_secs(1));
    h.manager.update_status();
    assert_eq!(
        h.manager
            .with_stats(|s| s.series(StatKind::VideoFramesReceived, StatView::PerSecond)),
        Some(vec![4.0])
    );

    // 폴링 틱이 성능 평가를 질의하고 다음 틱에서 반영한다
    assert!(h.queue.pump_until(TIMEOUT, || {
        h.manager.with_stats(|s| !s.is_assessment_in_flight()) == Some(true)
    }));
    h.clock.advance(Duration::from_secs(1));
    h.manager.update_status();
    assert_eq!(
        h.manager
            .with_stats(|s| s.latest_assessment().map(|a| a.polygons_rendered)),
        Some(Some(42))
    );

    h.manager.stop_session().unwrap();
    h.wait_for(SessionStatus::Stopped);
    assert_eq!(h.manager.with_stats(|s| s.windows_closed()), Some(0));
    assert_eq!(per_frame(&h), 0);
    assert_eq!(h.manager.with_stats(|s| s.latest_assessment()), Some(None));
}

#[cfg(debug_assertions)]
#[test]
fn connection_lost_is_main_thread_only() {
    let h = Harness::new();
    h.bring_up(30);

    let result = std::thread::scope(|s| {
        s.spawn(|| h.manager.on_runtime_connection_lost()).join()
    });
    assert!(result.is_err());
    assert_eq!(h.manager.status(), SessionStatus::ReadyConnected);
}
