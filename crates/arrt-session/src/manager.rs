//! 원격 렌더링 세션 상태 머신.
//!
//! 세션은 관리자당 최대 하나. 모든 상태 변경은 메인 스레드에서 일어나며,
//! 원격 호출 결과는 tokio 태스크에서 메인 큐로 넘어와 처리된다.
//! 세션 세대(generation)가 바뀐 뒤 도착한 응답은 버린다.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use arrt_core::clock::{Clock, SystemClock};
use arrt_core::config_manager::ConfigManager;
use arrt_core::dispatch::MainQueue;
use arrt_core::error::CoreError;
use arrt_core::models::session::{
    RemoteSessionStatus, SessionDescriptor, SessionOptions, SessionProperties, SessionSnapshot,
    SessionStatus,
};
use arrt_core::models::stats::FrameStatistics;
use arrt_core::ports::rendering::RenderingService;
use arrt_core::ports::runtime::{LoadedModel, PerformanceProbe, ProgressCallback, RuntimeConnector};

use crate::events::{SessionEvent, EVENT_CAPACITY};
use crate::guard::NonReentrant;
use crate::stats::ServiceStats;

/// 백엔드 상태를 로컬 상태로 변환
///
/// Ready는 런타임 연결 진행 상태를 유지하고, 중지 요청 중에는 Starting/Ready를 무시한다.
pub fn convert_status(remote: RemoteSessionStatus, current: SessionStatus) -> SessionStatus {
    match remote {
        RemoteSessionStatus::Starting => match current {
            SessionStatus::StopRequested => SessionStatus::StopRequested,
            _ => SessionStatus::Starting,
        },
        RemoteSessionStatus::Ready => match current {
            SessionStatus::ReadyConnecting
            | SessionStatus::ReadyConnected
            | SessionStatus::StopRequested => current,
            _ => SessionStatus::ReadyNotConnected,
        },
        RemoteSessionStatus::Stopped => SessionStatus::Stopped,
        RemoteSessionStatus::Expired => SessionStatus::Expired,
        RemoteSessionStatus::Error => SessionStatus::Error,
        RemoteSessionStatus::Unknown => current,
    }
}

/// 현재 관리 중인 세션
#[derive(Debug, Clone)]
struct ActiveSession {
    descriptor: SessionDescriptor,
    properties: Option<SessionProperties>,
    max_lease_minutes: u32,
    /// 마지막 보고 시점의 경과 시간
    reported_elapsed: u32,
    reported_at: Instant,
}

impl ActiveSession {
    fn new(descriptor: SessionDescriptor, now: Instant) -> Self {
        Self {
            max_lease_minutes: descriptor.requested_lease_minutes,
            descriptor,
            properties: None,
            reported_elapsed: 0,
            reported_at: now,
        }
    }

    fn update(&mut self, properties: &SessionProperties, now: Instant) {
        if self.descriptor.session_id.is_none() {
            self.descriptor.session_id = Some(properties.id.clone());
        }
        self.max_lease_minutes = properties.max_lease_minutes;
        self.reported_elapsed = properties.elapsed_minutes;
        self.reported_at = now;
        self.properties = Some(properties.clone());
    }

    /// 마지막 보고 이후 흐른 시간을 더한 경과 시간 (분)
    fn elapsed_minutes_at(&self, now: Instant) -> u32 {
        let since = now.saturating_duration_since(self.reported_at).as_secs() / 60;
        self.reported_elapsed
            .saturating_add(u32::try_from(since).unwrap_or(u32::MAX))
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.max_lease_minutes > 0 && self.elapsed_minutes_at(now) >= self.max_lease_minutes
    }
}

struct SessionState {
    status: SessionStatus,
    session: Option<ActiveSession>,
    last_error: Option<String>,
    /// 시작/재연결마다 증가
    generation: u64,
    /// 생성 응답 전에 받은 중지 요청
    stop_pending: bool,
    stop_in_flight: bool,
    poll_in_flight: bool,
    extend_in_flight: bool,
    auto_reconnect: bool,
    connect_attempt: u64,
    model: Option<LoadedModel>,
    model_load_seq: u64,
    model_load_in_flight: Option<u64>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: SessionStatus::NotActive,
            session: None,
            last_error: None,
            generation: 0,
            stop_pending: false,
            stop_in_flight: false,
            poll_in_flight: false,
            extend_in_flight: false,
            auto_reconnect: true,
            connect_attempt: 0,
            model: None,
            model_load_seq: 0,
            model_load_in_flight: None,
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|s| s.descriptor.session_id.clone())
    }

    /// 새 세대 시작. 이전 세대의 진행 중 요청 표시는 모두 무효.
    fn begin_generation(&mut self, session: ActiveSession, auto_reconnect: bool) -> u64 {
        self.generation += 1;
        self.session = Some(session);
        self.last_error = None;
        self.stop_pending = false;
        self.stop_in_flight = false;
        self.poll_in_flight = false;
        self.extend_in_flight = false;
        self.auto_reconnect = auto_reconnect;
        self.generation
    }
}

struct Shared {
    service: Arc<dyn RenderingService>,
    runtime: Option<Arc<dyn RuntimeConnector>>,
    config: ConfigManager,
    queue: MainQueue,
    handle: Handle,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    connect_guard: NonReentrant,
    state: Mutex<SessionState>,
    stats: Option<Mutex<ServiceStats>>,
}

/// [`SessionManager`] 생성기
pub struct SessionManagerBuilder {
    service: Arc<dyn RenderingService>,
    config: ConfigManager,
    queue: MainQueue,
    handle: Handle,
    runtime: Option<Arc<dyn RuntimeConnector>>,
    clock: Arc<dyn Clock>,
    stats: Option<Option<Arc<dyn PerformanceProbe>>>,
}

impl SessionManagerBuilder {
    /// 그래픽 런타임 연결기 (없으면 Ready에서 연결을 시도하지 않는다)
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeConnector>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 서비스 통계 수집 켜기
    ///
    /// `probe`가 있으면 런타임 연결 중 1초마다 서버 성능 평가도 질의한다.
    pub fn stats(mut self, probe: Option<Arc<dyn PerformanceProbe>>) -> Self {
        self.stats = Some(probe);
        self
    }

    pub fn build(self) -> SessionManager {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let stats = self.stats.map(|probe| {
            let stats = ServiceStats::new(&self.config.get().stats, Arc::clone(&self.clock));
            let stats = match probe {
                Some(probe) => stats.with_probe(probe, self.queue.clone(), self.handle.clone()),
                None => stats,
            };
            Mutex::new(stats)
        });
        SessionManager {
            shared: Arc::new(Shared {
                service: self.service,
                runtime: self.runtime,
                config: self.config,
                queue: self.queue,
                handle: self.handle,
                clock: self.clock,
                events,
                connect_guard: NonReentrant::new("connect_to_session_runtime"),
                state: Mutex::new(SessionState::new()),
                stats,
            }),
            polling: Mutex::new(None),
        }
    }
}

/// 원격 렌더링 세션 관리자
///
/// 메인 스레드에서 생성하고 호출한다. 드롭되면 폴링이 멈추고
/// 이후 도착하는 원격 응답은 버려진다.
pub struct SessionManager {
    shared: Arc<Shared>,
    polling: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn builder(
        service: Arc<dyn RenderingService>,
        config: ConfigManager,
        queue: MainQueue,
        handle: Handle,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            service,
            config,
            queue,
            handle,
            runtime: None,
            clock: Arc::new(SystemClock),
            stats: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    pub fn loaded_model(&self) -> Option<LoadedModel> {
        self.shared.state.lock().model.clone()
    }

    /// 현재 상태 스냅샷 (경과 시간은 마지막 보고 이후 흐른 시간 포함)
    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.shared.clock.now();
        let st = self.shared.state.lock();
        let session = st.session.as_ref();
        let properties = session.and_then(|s| s.properties.as_ref());
        SessionSnapshot {
            status: st.status,
            descriptor: session.map(|s| s.descriptor.clone()),
            hostname: properties.and_then(|p| p.hostname.clone()),
            max_lease_minutes: session.map_or(0, |s| s.max_lease_minutes),
            elapsed_minutes: session.map_or(0, |s| s.elapsed_minutes_at(now)),
            last_message: properties.and_then(|p| p.message.clone()),
            last_error: st.last_error.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// 서비스 통계 조회 (수집을 켜지 않았으면 None)
    pub fn with_stats<R>(&self, f: impl FnOnce(&ServiceStats) -> R) -> Option<R> {
        self.shared.stats.as_ref().map(|stats| f(&*stats.lock()))
    }

    /// 런타임이 보고한 프레임 통계 기록 (ReadyConnected에서만)
    pub fn add_frame_statistics(&self, frame: &FrameStatistics) {
        debug_assert!(
            self.shared.queue.is_main_thread(),
            "add_frame_statistics는 메인 스레드 전용"
        );
        let Some(stats) = &self.shared.stats else {
            return;
        };
        if self.status() == SessionStatus::ReadyConnected {
            stats.lock().add_frame(frame);
        }
    }

    /// 새 세션 시작
    ///
    /// 실행 중인 세션이 있으면 `InvalidState`로 거부하고 기존 세션은 건드리지 않는다.
    pub fn start_session(&self, options: SessionOptions) -> Result<(), CoreError> {
        let shared = &self.shared;
        debug_assert!(shared.queue.is_main_thread(), "start_session은 메인 스레드 전용");
        if options.max_lease_minutes == 0 {
            return Err(CoreError::Validation {
                field: "max_lease_minutes".to_string(),
                message: "0보다 커야 함".to_string(),
            });
        }

        let auto_reconnect = shared.config.get().session.auto_reconnect;
        let generation = {
            let mut st = shared.state.lock();
            if st.status.is_running() {
                return Err(CoreError::InvalidState(format!(
                    "세션이 이미 실행 중: {}",
                    st.status
                )));
            }
            let descriptor = SessionDescriptor {
                session_id: None,
                size: options.size,
                requested_lease_minutes: options.max_lease_minutes,
            };
            st.begin_generation(
                ActiveSession::new(descriptor, shared.clock.now()),
                auto_reconnect,
            )
        };

        info!(
            "세션 시작 요청: size={}, lease={}분",
            options.size.as_api_str(),
            options.max_lease_minutes
        );
        shared.apply_status(SessionStatus::StartRequested);

        let service = Arc::clone(&shared.service);
        shared.spawn_then(
            async move { service.create_session(&options).await },
            move |shared, result| shared.on_created(generation, result),
        );
        Ok(())
    }

    /// 세션 중지 (시작 진행 중이면 시작 취소)
    ///
    /// 이미 중지 요청 중이면 아무것도 하지 않는다 (직전 요청이 실패했으면 다시 보낸다).
    pub fn stop_session(&self) -> Result<(), CoreError> {
        let shared = &self.shared;
        debug_assert!(shared.queue.is_main_thread(), "stop_session은 메인 스레드 전용");
        let (status, has_id) = {
            let st = shared.state.lock();
            (st.status, st.session_id().is_some())
        };
        if !status.is_running() {
            return Err(CoreError::InvalidState(format!(
                "실행 중인 세션 없음: {status}"
            )));
        }

        if status != SessionStatus::StopRequested {
            info!("세션 중지 요청");
            shared.apply_status(SessionStatus::StopRequested);
        }
        if has_id {
            shared.issue_stop();
        } else {
            shared.state.lock().stop_pending = true;
            info!("세션 ID 확정 후 중지 예정");
        }
        Ok(())
    }

    /// 폴링 한 번 (타이머가 호출하며 직접 호출해도 된다)
    pub fn update_status(&self) {
        debug_assert!(self.shared.queue.is_main_thread(), "update_status는 메인 스레드 전용");
        self.shared.update_status();
    }

    /// 설정된 연장 시간만큼 최대 리스 시간 연장
    pub fn extend_max_session_time(&self) -> Result<(), CoreError> {
        let minutes = self.shared.config.get().session.extension_minutes;
        self.shared.extend(minutes)
    }

    /// 연장 시간/자동 연장 설정 저장
    pub fn set_extension_time(&self, minutes: u32, auto_extend: bool) -> Result<(), CoreError> {
        if minutes == 0 {
            return Err(CoreError::Validation {
                field: "extension_minutes".to_string(),
                message: "0보다 커야 함".to_string(),
            });
        }
        self.shared.config.update_with(|c| {
            c.session.extension_minutes = minutes;
            c.session.auto_extend = auto_extend;
        })?;
        debug!("연장 설정: {minutes}분, 자동={auto_extend}");
        Ok(())
    }

    /// 설정에 남은 세션 ID로 재연결 시도
    ///
    /// 기록된 세션이 없으면 `Ok(false)`.
    pub fn restore_running_session(&self) -> Result<bool, CoreError> {
        let shared = &self.shared;
        let Some(session_id) = shared.config.running_session() else {
            return Ok(false);
        };
        let settings = shared.config.get().session;
        {
            let mut st = shared.state.lock();
            if st.status.is_running() {
                return Err(CoreError::InvalidState(format!(
                    "세션이 이미 실행 중: {}",
                    st.status
                )));
            }
            let descriptor = SessionDescriptor {
                session_id: Some(session_id.clone()),
                size: settings.default_vm_size,
                requested_lease_minutes: settings.default_lease_minutes,
            };
            st.begin_generation(
                ActiveSession::new(descriptor, shared.clock.now()),
                settings.auto_reconnect,
            );
        }

        info!("이전 세션 재연결 시도: {session_id}");
        shared.apply_status(SessionStatus::Starting);
        shared.update_status();
        Ok(true)
    }

    /// 런타임 연결 시작 (자동 재연결 다시 켬)
    pub fn connect_to_session_runtime(&self) -> Result<(), CoreError> {
        self.shared.state.lock().auto_reconnect = true;
        self.shared.connect_runtime()
    }

    /// 런타임 연결 해제 (자동 재연결 끔)
    pub fn disconnect_from_session_runtime(&self) -> Result<(), CoreError> {
        {
            let mut st = self.shared.state.lock();
            if !st.status.has_runtime() {
                return Err(CoreError::InvalidState(format!(
                    "런타임 연결 없음: {}",
                    st.status
                )));
            }
            st.auto_reconnect = false;
        }
        info!("런타임 연결 해제 요청");
        self.shared.apply_status(SessionStatus::ReadyNotConnected);
        Ok(())
    }

    /// 런타임이 연결 끊김을 보고함. 자동 재연결은 다음 폴링에서.
    ///
    /// 메인 스레드 전용. 런타임 자체 스레드에서 감지했다면 메인 큐에 `post`해서 부른다.
    pub fn on_runtime_connection_lost(&self) {
        debug_assert!(
            self.shared.queue.is_main_thread(),
            "on_runtime_connection_lost는 메인 스레드 전용"
        );
        let status = self.status();
        if !status.has_runtime() {
            return;
        }
        warn!("런타임 연결 끊김 ({status})");
        self.shared.apply_status(SessionStatus::ReadyNotConnected);
    }

    /// 모델 로드 (ReadyConnected에서만)
    ///
    /// 이전 모델은 먼저 언로드한다. 진행률과 완료 콜백은 메인 스레드에서 호출된다.
    pub fn load_model_async<P, C>(
        &self,
        url: &str,
        on_progress: P,
        on_complete: C,
    ) -> Result<(), CoreError>
    where
        P: Fn(f32) + Send + Sync + 'static,
        C: FnOnce(Result<LoadedModel, CoreError>) + Send + 'static,
    {
        let shared = &self.shared;
        let runtime = shared
            .runtime
            .clone()
            .ok_or_else(|| CoreError::InvalidState("런타임 연결기 없음".to_string()))?;

        let (previous, seq) = {
            let mut st = shared.state.lock();
            if st.status != SessionStatus::ReadyConnected {
                return Err(CoreError::InvalidState(format!(
                    "런타임 미연결 상태에서 모델 로드 불가: {}",
                    st.status
                )));
            }
            if st.model_load_in_flight.is_some() {
                return Err(CoreError::InvalidState("모델 로드 진행 중".to_string()));
            }
            st.model_load_seq += 1;
            st.model_load_in_flight = Some(st.model_load_seq);
            (st.model.take(), st.model_load_seq)
        };

        if let Some(previous) = previous {
            debug!("이전 모델 언로드: {}", previous.url);
            runtime.unload_model(&previous);
            shared.emit(SessionEvent::RootEntityChanged(None));
        }

        let on_progress = Arc::new(on_progress);
        let queue = shared.queue.clone();
        let alive = Arc::downgrade(shared);
        let progress: ProgressCallback = Arc::new(move |value: f32| {
            let on_progress = Arc::clone(&on_progress);
            let alive = alive.clone();
            queue.post(move || {
                if alive.strong_count() > 0 {
                    on_progress(value);
                }
            });
        });

        info!("모델 로드 시작: {url}");
        let url = url.to_string();
        shared.spawn_then(
            async move { runtime.load_model(&url, progress).await },
            move |shared, result| on_complete(shared.on_model_loaded(seq, result)),
        );
        Ok(())
    }

    /// `interval`마다 메인 큐에 `update_status`를 등록하는 타이머 시작
    ///
    /// 주기가 0이면 `Validation` 에러. 기존 타이머는 유지된다.
    pub fn start_polling(&self, interval: Duration) -> Result<(), CoreError> {
        if interval.is_zero() {
            return Err(CoreError::Validation {
                field: "poll_interval_ms".to_string(),
                message: "0보다 커야 함".to_string(),
            });
        }
        self.stop_polling();
        let weak = Arc::downgrade(&self.shared);
        let queue = self.shared.queue.clone();
        let task = self.shared.handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if weak.strong_count() == 0 {
                    break;
                }
                let weak = weak.clone();
                queue.post(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.update_status();
                    }
                });
            }
        });
        *self.polling.lock() = Some(task);
        debug!("세션 폴링 시작: {interval:?}");
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(task) = self.polling.lock().take() {
            task.abort();
            debug!("세션 폴링 중지");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        trace!("세션 이벤트: {event:?}");
        let _ = self.events.send(event);
    }

    fn persist_running_session(&self, session_id: Option<&str>) {
        if let Err(e) = self.config.set_running_session(session_id) {
            warn!("실행 중 세션 ID 저장 실패: {e}");
        }
    }

    /// 비동기 작업을 띄우고 결과를 메인 스레드에서 `then`으로 처리
    ///
    /// 관리자가 이미 해제되었으면 결과는 버려진다.
    fn spawn_then<Fut, T, F>(self: &Arc<Self>, future: Fut, then: F)
    where
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(&Arc<Shared>, Result<T, CoreError>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let queue = self.queue.clone();
        self.handle.spawn(async move {
            let result = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!("원격 호출 중 패닉 발생");
                    Err(CoreError::Internal("원격 호출 중 패닉 발생".to_string()))
                });
            queue.post(move || match weak.upgrade() {
                Some(shared) => then(&shared, result),
                None => debug!("세션 관리자 해제 후 도착한 응답 폐기"),
            });
        });
    }

    /// 상태 전이
    ///
    /// 런타임을 잃는 전이는 상태를 바꾸기 전에 런타임부터 정리하고,
    /// 비실행 상태로 가면 세션 핸들을 해제한다.
    fn apply_status(self: &Arc<Self>, new: SessionStatus) {
        let (old, session_id) = {
            let st = self.state.lock();
            (st.status, st.session_id())
        };
        if old == new {
            return;
        }

        if old.has_runtime() && !new.has_runtime() {
            self.teardown_runtime();
        }

        let released = {
            let mut st = self.state.lock();
            st.status = new;
            if new.is_running() {
                None
            } else {
                st.stop_pending = false;
                st.session.take().map(|s| s.descriptor.session_id)
            }
        };

        if new.is_running() {
            if let Some(id) = session_id.as_deref() {
                self.persist_running_session(Some(id));
            }
        } else {
            self.persist_running_session(None);
        }

        info!("세션 상태: {old} → {new}");
        self.emit(SessionEvent::StatusChanged { old, new });
        if let Some(session_id) = released {
            if let Some(stats) = &self.stats {
                stats.lock().reset();
            }
            debug!("세션 핸들 해제: {session_id:?}");
            self.emit(SessionEvent::SessionReleased { session_id });
        }

        if new == SessionStatus::ReadyNotConnected && !old.has_runtime() {
            let auto_reconnect = self.state.lock().auto_reconnect;
            if auto_reconnect && self.runtime.is_some() {
                if let Err(e) = self.connect_runtime() {
                    warn!("런타임 자동 연결 실패: {e}");
                }
            }
        }
    }

    /// 모델 언로드 후 런타임 연결 해제
    fn teardown_runtime(&self) {
        let model = {
            let mut st = self.state.lock();
            st.model_load_in_flight = None;
            st.model.take()
        };
        if let Some(runtime) = &self.runtime {
            if let Some(model) = &model {
                runtime.unload_model(model);
            }
            runtime.disconnect();
            debug!("런타임 연결 해제 완료");
        }
        if model.is_some() {
            self.emit(SessionEvent::RootEntityChanged(None));
        }
    }

    fn on_created(self: &Arc<Self>, generation: u64, result: Result<SessionProperties, CoreError>) {
        let stale = self.state.lock().generation != generation;
        if stale {
            if let Ok(properties) = result {
                warn!("버려진 시작 요청의 세션 중지: {}", properties.id);
                let service = Arc::clone(&self.service);
                self.handle.spawn(async move {
                    if let Err(e) = service.stop_session(&properties.id).await {
                        warn!("버려진 세션 중지 실패: {e}");
                    }
                });
            }
            return;
        }

        match result {
            Ok(properties) => {
                info!("세션 생성됨: {}", properties.id);
                let now = self.clock.now();
                let (stop_now, current) = {
                    let mut st = self.state.lock();
                    if let Some(session) = st.session.as_mut() {
                        session.update(&properties, now);
                    }
                    (st.stop_pending, st.status)
                };
                self.persist_running_session(Some(&properties.id));
                self.emit(SessionEvent::PropertiesUpdated);

                if stop_now {
                    self.issue_stop();
                } else {
                    self.apply_status(convert_status(properties.status, current));
                }
            }
            Err(e) => {
                error!("세션 생성 실패: {e}");
                self.state.lock().last_error = Some(e.to_string());
                self.apply_status(SessionStatus::Error);
            }
        }
    }

    fn issue_stop(self: &Arc<Self>) {
        let (session_id, generation) = {
            let mut st = self.state.lock();
            let Some(id) = st.session_id() else {
                return;
            };
            if st.stop_in_flight {
                trace!("중지 요청 이미 진행 중");
                return;
            }
            st.stop_in_flight = true;
            st.stop_pending = false;
            (id, st.generation)
        };

        let service = Arc::clone(&self.service);
        let id = session_id.clone();
        self.spawn_then(
            async move { service.stop_session(&id).await },
            move |shared, result| {
                {
                    let mut st = shared.state.lock();
                    if st.generation != generation {
                        return;
                    }
                    st.stop_in_flight = false;
                    if let Err(e) = &result {
                        st.last_error = Some(e.to_string());
                    }
                }
                match result {
                    Ok(()) => {
                        debug!("세션 중지 요청 수락: {session_id}");
                        shared.update_status();
                    }
                    Err(e) => error!("세션 중지 요청 실패: {e}"),
                }
            },
        );
    }

    fn update_status(self: &Arc<Self>) {
        let now = self.clock.now();
        let settings = self.config.get().session;

        let (session_id, generation, status, remaining, auto_reconnect) = {
            let st = self.state.lock();
            if !st.status.is_running() {
                return;
            }
            let Some(session) = st.session.as_ref() else {
                return;
            };
            if session.is_expired_at(now) {
                drop(st);
                warn!("리스 만료, 응답을 기다리지 않고 Expired 처리");
                self.apply_status(SessionStatus::Expired);
                return;
            }
            let Some(id) = session.descriptor.session_id.clone() else {
                return;
            };
            let remaining = session
                .max_lease_minutes
                .saturating_sub(session.elapsed_minutes_at(now));
            (id, st.generation, st.status, remaining, st.auto_reconnect)
        };

        if status == SessionStatus::ReadyConnected {
            if let Some(stats) = &self.stats {
                stats.lock().tick();
            }
        }

        if status == SessionStatus::ReadyNotConnected && auto_reconnect && self.runtime.is_some() {
            debug!("런타임 재연결 시도");
            if let Err(e) = self.connect_runtime() {
                warn!("런타임 재연결 실패: {e}");
            }
        }

        if settings.auto_extend
            && status != SessionStatus::StopRequested
            && remaining <= settings.auto_extend_threshold_minutes
        {
            match self.extend(settings.extension_minutes) {
                Ok(()) => info!("남은 시간 {remaining}분, 자동 연장"),
                Err(e) => debug!("자동 연장 건너뜀: {e}"),
            }
        }

        {
            let mut st = self.state.lock();
            if st.poll_in_flight {
                trace!("이전 상태 조회 진행 중");
                return;
            }
            st.poll_in_flight = true;
        }

        let service = Arc::clone(&self.service);
        self.spawn_then(
            async move { service.get_session(&session_id).await },
            move |shared, result| shared.on_polled(generation, result),
        );
    }

    fn on_polled(self: &Arc<Self>, generation: u64, result: Result<SessionProperties, CoreError>) {
        let now = self.clock.now();
        let (current, expired) = {
            let mut st = self.state.lock();
            if st.generation != generation {
                trace!("이전 세션의 조회 응답 폐기");
                return;
            }
            st.poll_in_flight = false;
            if !st.status.is_running() {
                return;
            }
            match &result {
                Ok(properties) => {
                    let expired = match st.session.as_mut() {
                        Some(session) => {
                            session.update(properties, now);
                            session.is_expired_at(now)
                        }
                        None => false,
                    };
                    (st.status, expired)
                }
                Err(e) => {
                    st.last_error = Some(e.to_string());
                    (st.status, false)
                }
            }
        };

        match result {
            Ok(properties) => {
                self.emit(SessionEvent::PropertiesUpdated);
                let next = if expired {
                    SessionStatus::Expired
                } else {
                    convert_status(properties.status, current)
                };
                if next == SessionStatus::Error {
                    if let Some(message) = properties.message {
                        self.state.lock().last_error = Some(message);
                    }
                }
                self.apply_status(next);
            }
            Err(e) => {
                error!("세션 상태 조회 실패: {e}");
                self.apply_status(SessionStatus::Error);
            }
        }
    }

    fn extend(self: &Arc<Self>, minutes: u32) -> Result<(), CoreError> {
        let (session_id, new_max, generation) = {
            let mut st = self.state.lock();
            if !st.status.is_running() || st.status == SessionStatus::StopRequested {
                return Err(CoreError::InvalidState(format!(
                    "연장할 수 없는 상태: {}",
                    st.status
                )));
            }
            if st.extend_in_flight {
                return Err(CoreError::InvalidState("연장 요청 진행 중".to_string()));
            }
            let session = st
                .session
                .as_ref()
                .ok_or_else(|| CoreError::InvalidState("세션 없음".to_string()))?;
            let session_id = session
                .descriptor
                .session_id
                .clone()
                .ok_or_else(|| CoreError::InvalidState("세션 ID 미확정".to_string()))?;
            let new_max = session.max_lease_minutes.saturating_add(minutes);
            st.extend_in_flight = true;
            (session_id, new_max, st.generation)
        };

        info!("리스 연장 요청: 최대 {new_max}분");
        let service = Arc::clone(&self.service);
        self.spawn_then(
            async move { service.update_session(&session_id, new_max).await },
            move |shared, result| {
                let now = shared.clock.now();
                {
                    let mut st = shared.state.lock();
                    if st.generation != generation {
                        return;
                    }
                    st.extend_in_flight = false;
                    match &result {
                        Ok(properties) => {
                            if let Some(session) = st.session.as_mut() {
                                session.update(properties, now);
                            }
                        }
                        Err(e) => st.last_error = Some(e.to_string()),
                    }
                }
                match result {
                    Ok(properties) => {
                        info!("리스 연장됨: 최대 {}분", properties.max_lease_minutes);
                        shared.emit(SessionEvent::PropertiesUpdated);
                    }
                    Err(e) => warn!("리스 연장 실패: {e}"),
                }
            },
        );
        Ok(())
    }

    /// 런타임 연결 시작. 재진입 불가.
    fn connect_runtime(self: &Arc<Self>) -> Result<(), CoreError> {
        let _entry = self.connect_guard.enter()?;
        let runtime = self
            .runtime
            .clone()
            .ok_or_else(|| CoreError::InvalidState("런타임 연결기 없음".to_string()))?;

        let (properties, attempt) = {
            let mut st = self.state.lock();
            if st.status != SessionStatus::ReadyNotConnected {
                return Err(CoreError::InvalidState(format!(
                    "연결할 수 없는 상태: {}",
                    st.status
                )));
            }
            let properties = st
                .session
                .as_ref()
                .and_then(|s| s.properties.clone())
                .ok_or_else(|| CoreError::InvalidState("세션 속성 없음".to_string()))?;
            st.connect_attempt += 1;
            (properties, st.connect_attempt)
        };

        self.apply_status(SessionStatus::ReadyConnecting);
        self.spawn_then(
            async move { runtime.connect(&properties).await },
            move |shared, result| shared.on_connected(attempt, result),
        );
        Ok(())
    }

    fn on_connected(self: &Arc<Self>, attempt: u64, result: Result<(), CoreError>) {
        let (current, status) = {
            let st = self.state.lock();
            (
                st.connect_attempt == attempt && st.status == SessionStatus::ReadyConnecting,
                st.status,
            )
        };
        if !current {
            // 늦게 성공한 연결은 다른 연결이 없을 때만 정리
            if result.is_ok() && !status.has_runtime() {
                if let Some(runtime) = &self.runtime {
                    debug!("취소된 런타임 연결 정리");
                    runtime.disconnect();
                }
            }
            return;
        }

        match result {
            Ok(()) => self.apply_status(SessionStatus::ReadyConnected),
            Err(e) => {
                warn!("런타임 연결 실패: {e}");
                self.state.lock().last_error = Some(e.to_string());
                self.apply_status(SessionStatus::ReadyNotConnected);
            }
        }
    }

    fn on_model_loaded(
        self: &Arc<Self>,
        seq: u64,
        result: Result<LoadedModel, CoreError>,
    ) -> Result<LoadedModel, CoreError> {
        let valid = {
            let mut st = self.state.lock();
            let current = st.model_load_in_flight == Some(seq);
            if current {
                st.model_load_in_flight = None;
            }
            current && st.status == SessionStatus::ReadyConnected
        };

        match result {
            Ok(model) if valid => {
                info!("모델 로드 완료: {}", model.url);
                self.state.lock().model = Some(model.clone());
                self.emit(SessionEvent::RootEntityChanged(Some(model.root)));
                Ok(model)
            }
            Ok(model) => {
                if let Some(runtime) = &self.runtime {
                    runtime.unload_model(&model);
                }
                Err(CoreError::InvalidState(
                    "모델 로드 중 런타임 연결이 바뀜".to_string(),
                ))
            }
            Err(e) => {
                warn!("모델 로드 실패: {e}");
                Err(e)
            }
        }
    }
}
