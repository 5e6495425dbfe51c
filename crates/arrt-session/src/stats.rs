//! 서비스 통계 집계.
//!
//! 지표마다 [`StatWindow`] 하나. 프레임마다 원시 샘플을 쌓고,
//! 1초가 지날 때마다 누적값을 초 단위 버퍼로 넘긴다.
//! 서버 성능 평가는 같은 1초 주기로 질의하되 한 번에 하나만 날린다.

use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use arrt_core::clock::Clock;
use arrt_core::config::StatsConfig;
use arrt_core::dispatch::MainQueue;
use arrt_core::error::CoreError;
use arrt_core::models::stats::{FrameStatistics, PerformanceAssessment};
use arrt_core::ports::runtime::PerformanceProbe;

/// 고정 크기 링 버퍼 (가득 차면 가장 오래된 값 제거)
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 가장 최근 값
    pub fn latest(&self) -> Option<T> {
        self.items.back().copied()
    }

    /// 오래된 것부터
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.items.iter().copied()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// 초 단위 집계 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
    min: f64,
    max: f64,
}

/// 지표 하나의 누적기 + 프레임/초 버퍼
#[derive(Debug, Clone)]
pub struct StatWindow<T> {
    aggregation: Aggregation,
    running: Option<Accumulator>,
    per_frame: RingBuffer<T>,
    per_second: RingBuffer<f64>,
}

impl<T> StatWindow<T>
where
    T: Copy + Into<f64>,
{
    pub fn new(aggregation: Aggregation, frame_capacity: usize, second_capacity: usize) -> Self {
        Self {
            aggregation,
            running: None,
            per_frame: RingBuffer::new(frame_capacity),
            per_second: RingBuffer::new(second_capacity),
        }
    }

    pub fn add_value(&mut self, value: T) {
        self.per_frame.push(value);
        let v: f64 = value.into();
        self.running = Some(match self.running {
            None => Accumulator {
                sum: v,
                count: 1,
                min: v,
                max: v,
            },
            Some(acc) => Accumulator {
                sum: acc.sum + v,
                count: acc.count + 1,
                min: acc.min.min(v),
                max: acc.max.max(v),
            },
        });
    }

    /// 누적값을 초 단위 버퍼로 넘기고 누적기 초기화
    ///
    /// 샘플이 없었던 구간은 0으로 기록한다. 기록한 값을 반환.
    pub fn end_window(&mut self) -> f64 {
        let value = self.current().unwrap_or(0.0);
        self.per_second.push(value);
        self.running = None;
        value
    }

    /// 현재 구간의 집계값 (샘플이 없으면 None)
    pub fn current(&self) -> Option<f64> {
        self.running.map(|acc| match self.aggregation {
            Aggregation::Sum => acc.sum,
            Aggregation::Avg => acc.sum / acc.count as f64,
            Aggregation::Min => acc.min,
            Aggregation::Max => acc.max,
        })
    }

    /// 현재 구간의 샘플 수
    pub fn sample_count(&self) -> usize {
        self.running.map_or(0, |acc| acc.count)
    }

    pub fn per_frame(&self) -> &RingBuffer<T> {
        &self.per_frame
    }

    pub fn per_second(&self) -> &RingBuffer<f64> {
        &self.per_second
    }

    /// 직전 구간 집계값
    pub fn last_window(&self) -> Option<f64> {
        self.per_second.latest()
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn reset(&mut self) {
        self.running = None;
        self.per_frame.clear();
        self.per_second.clear();
    }

    fn series(&self, view: StatView) -> Vec<f64> {
        match view {
            StatView::PerFrame => self.per_frame.iter().map(Into::into).collect(),
            StatView::PerSecond => self.per_second.iter().collect(),
        }
    }
}

/// 조회 가능한 지표
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    LatencyPoseToReceive,
    LatencyReceiveToPresent,
    LatencyPresentToDisplay,
    TimeSinceLastPresent,
    VideoFramesReceived,
    VideoFramesReused,
    VideoFramesSkipped,
    VideoFramesDiscarded,
    VideoFrameMinDelta,
    VideoFrameMaxDelta,
    TimeCpu,
    TimeGpu,
    UtilizationCpu,
    UtilizationGpu,
    MemoryCpu,
    MemoryGpu,
    NetworkLatency,
    PolygonsRendered,
}

/// 원시(프레임) 버퍼와 초 단위 버퍼 중 선택
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatView {
    PerFrame,
    PerSecond,
}

#[derive(Debug, Clone)]
struct FrameWindows {
    latency_pose_to_receive: StatWindow<f32>,
    latency_receive_to_present: StatWindow<f32>,
    latency_present_to_display: StatWindow<f32>,
    time_since_last_present: StatWindow<f32>,
    frames_received: StatWindow<u32>,
    frames_reused: StatWindow<u32>,
    frames_skipped: StatWindow<u32>,
    frames_discarded: StatWindow<u32>,
    frame_min_delta: StatWindow<f32>,
    frame_max_delta: StatWindow<f32>,
}

impl FrameWindows {
    fn new(frames: usize, seconds: usize) -> Self {
        let avg = || StatWindow::new(Aggregation::Avg, frames, seconds);
        let sum = || StatWindow::new(Aggregation::Sum, frames, seconds);
        Self {
            latency_pose_to_receive: avg(),
            latency_receive_to_present: avg(),
            latency_present_to_display: avg(),
            time_since_last_present: avg(),
            frames_received: sum(),
            frames_reused: sum(),
            frames_skipped: sum(),
            frames_discarded: sum(),
            frame_min_delta: StatWindow::new(Aggregation::Min, frames, seconds),
            frame_max_delta: StatWindow::new(Aggregation::Max, frames, seconds),
        }
    }

    fn add(&mut self, s: &FrameStatistics) {
        self.latency_pose_to_receive.add_value(s.latency_pose_to_receive);
        self.latency_receive_to_present.add_value(s.latency_receive_to_present);
        self.latency_present_to_display.add_value(s.latency_present_to_display);
        self.time_since_last_present.add_value(s.time_since_last_present);
        self.frames_received.add_value(s.video_frames_received);
        self.frames_reused.add_value(s.video_frames_reused);
        self.frames_skipped.add_value(s.video_frames_skipped);
        self.frames_discarded.add_value(s.video_frames_discarded);
        self.frame_min_delta.add_value(s.video_frame_min_delta);
        self.frame_max_delta.add_value(s.video_frame_max_delta);
    }

    fn end_window(&mut self) {
        self.latency_pose_to_receive.end_window();
        self.latency_receive_to_present.end_window();
        self.latency_present_to_display.end_window();
        self.time_since_last_present.end_window();
        self.frames_received.end_window();
        self.frames_reused.end_window();
        self.frames_skipped.end_window();
        self.frames_discarded.end_window();
        self.frame_min_delta.end_window();
        self.frame_max_delta.end_window();
    }
}

#[derive(Debug, Clone)]
struct AssessmentWindows {
    time_cpu: StatWindow<f32>,
    time_gpu: StatWindow<f32>,
    utilization_cpu: StatWindow<f32>,
    utilization_gpu: StatWindow<f32>,
    memory_cpu: StatWindow<f64>,
    memory_gpu: StatWindow<f64>,
    network_latency: StatWindow<f32>,
    polygons_rendered: StatWindow<u32>,
}

impl AssessmentWindows {
    fn new(frames: usize, seconds: usize) -> Self {
        Self {
            time_cpu: StatWindow::new(Aggregation::Avg, frames, seconds),
            time_gpu: StatWindow::new(Aggregation::Avg, frames, seconds),
            utilization_cpu: StatWindow::new(Aggregation::Avg, frames, seconds),
            utilization_gpu: StatWindow::new(Aggregation::Avg, frames, seconds),
            memory_cpu: StatWindow::new(Aggregation::Max, frames, seconds),
            memory_gpu: StatWindow::new(Aggregation::Max, frames, seconds),
            network_latency: StatWindow::new(Aggregation::Avg, frames, seconds),
            polygons_rendered: StatWindow::new(Aggregation::Max, frames, seconds),
        }
    }

    fn add(&mut self, a: &PerformanceAssessment) {
        self.time_cpu.add_value(a.time_cpu_ms);
        self.time_gpu.add_value(a.time_gpu_ms);
        self.utilization_cpu.add_value(a.utilization_cpu);
        self.utilization_gpu.add_value(a.utilization_gpu);
        self.memory_cpu.add_value(a.memory_cpu_bytes as f64);
        self.memory_gpu.add_value(a.memory_gpu_bytes as f64);
        self.network_latency.add_value(a.network_latency_ms);
        self.polygons_rendered.add_value(a.polygons_rendered);
    }

    fn end_window(&mut self) {
        self.time_cpu.end_window();
        self.time_gpu.end_window();
        self.utilization_cpu.end_window();
        self.utilization_gpu.end_window();
        self.memory_cpu.end_window();
        self.memory_gpu.end_window();
        self.network_latency.end_window();
        self.polygons_rendered.end_window();
    }
}

/// 성능 평가 비동기 질의 (한 번에 하나)
struct AssessmentQuery {
    probe: Arc<dyn PerformanceProbe>,
    queue: MainQueue,
    handle: Handle,
    in_flight: Arc<AtomicBool>,
    inbox: Arc<Mutex<Option<PerformanceAssessment>>>,
}

impl AssessmentQuery {
    fn request(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            trace!("이전 성능 평가 질의 진행 중");
            return;
        }
        let probe = Arc::clone(&self.probe);
        let queue = self.queue.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let inbox = Arc::clone(&self.inbox);
        self.handle.spawn(async move {
            let result = AssertUnwindSafe(probe.query_performance_assessment())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Internal("성능 평가 질의 중 패닉 발생".to_string()))
                });
            queue.post(move || {
                match result {
                    Ok(assessment) => *inbox.lock() = Some(assessment),
                    Err(e) => warn!("성능 평가 질의 실패: {e}"),
                }
                in_flight.store(false, Ordering::SeqCst);
            });
        });
    }
}

/// 서비스 통계 (메인 스레드 소유)
pub struct ServiceStats {
    clock: Arc<dyn Clock>,
    second_capacity: usize,
    window_start: Option<Instant>,
    frames: FrameWindows,
    assessments: AssessmentWindows,
    latest_assessment: Option<PerformanceAssessment>,
    query: Option<AssessmentQuery>,
    windows_closed: u64,
}

impl ServiceStats {
    pub fn new(config: &StatsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            second_capacity: config.second_buffer.max(1),
            window_start: None,
            frames: FrameWindows::new(config.frame_buffer, config.second_buffer),
            assessments: AssessmentWindows::new(config.second_buffer, config.second_buffer),
            latest_assessment: None,
            query: None,
            windows_closed: 0,
        }
    }

    /// 1초마다 서버 성능 평가 질의
    pub fn with_probe(
        mut self,
        probe: Arc<dyn PerformanceProbe>,
        queue: MainQueue,
        handle: Handle,
    ) -> Self {
        self.query = Some(AssessmentQuery {
            probe,
            queue,
            handle,
            in_flight: Arc::new(AtomicBool::new(false)),
            inbox: Arc::new(Mutex::new(None)),
        });
        self
    }

    /// 프레임 통계 한 건 추가
    ///
    /// 1초 이상 지났으면 먼저 지난 구간들을 닫고, 새 샘플은 새 구간에 넣는다.
    pub fn add_frame(&mut self, stats: &FrameStatistics) {
        self.tick();
        self.frames.add(stats);
    }

    /// 프레임 없이 시간만 흘렀을 때 구간 정리
    pub fn tick(&mut self) {
        self.absorb_assessment();

        let now = self.clock.now();
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start).as_secs();
        if elapsed == 0 {
            return;
        }

        // 오래 멈춰 있었으면 버퍼 크기만큼만 빈 구간을 채운다
        let windows = usize::try_from(elapsed)
            .unwrap_or(usize::MAX)
            .min(self.second_capacity);
        for _ in 0..windows {
            self.frames.end_window();
            self.assessments.end_window();
        }
        self.windows_closed += windows as u64;
        self.window_start = Some(start + Duration::from_secs(elapsed));

        if let Some(query) = &self.query {
            query.request();
        }
    }

    fn absorb_assessment(&mut self) {
        let Some(query) = &self.query else {
            return;
        };
        let received = query.inbox.lock().take();
        if let Some(assessment) = received {
            debug!(
                "성능 평가 수신: cpu {:.1}ms, gpu {:.1}ms",
                assessment.time_cpu_ms, assessment.time_gpu_ms
            );
            self.assessments.add(&assessment);
            self.latest_assessment = Some(assessment);
        }
    }

    /// 마지막으로 받은 성능 평가
    pub fn latest_assessment(&self) -> Option<PerformanceAssessment> {
        self.latest_assessment
    }

    pub fn is_assessment_in_flight(&self) -> bool {
        self.query
            .as_ref()
            .is_some_and(|q| q.in_flight.load(Ordering::SeqCst))
    }

    /// 지금까지 닫힌 초 단위 구간 수
    pub fn windows_closed(&self) -> u64 {
        self.windows_closed
    }

    /// 지표 하나의 버퍼 (오래된 것부터)
    pub fn series(&self, kind: StatKind, view: StatView) -> Vec<f64> {
        let f = &self.frames;
        let a = &self.assessments;
        match kind {
            StatKind::LatencyPoseToReceive => f.latency_pose_to_receive.series(view),
            StatKind::LatencyReceiveToPresent => f.latency_receive_to_present.series(view),
            StatKind::LatencyPresentToDisplay => f.latency_present_to_display.series(view),
            StatKind::TimeSinceLastPresent => f.time_since_last_present.series(view),
            StatKind::VideoFramesReceived => f.frames_received.series(view),
            StatKind::VideoFramesReused => f.frames_reused.series(view),
            StatKind::VideoFramesSkipped => f.frames_skipped.series(view),
            StatKind::VideoFramesDiscarded => f.frames_discarded.series(view),
            StatKind::VideoFrameMinDelta => f.frame_min_delta.series(view),
            StatKind::VideoFrameMaxDelta => f.frame_max_delta.series(view),
            StatKind::TimeCpu => a.time_cpu.series(view),
            StatKind::TimeGpu => a.time_gpu.series(view),
            StatKind::UtilizationCpu => a.utilization_cpu.series(view),
            StatKind::UtilizationGpu => a.utilization_gpu.series(view),
            StatKind::MemoryCpu => a.memory_cpu.series(view),
            StatKind::MemoryGpu => a.memory_gpu.series(view),
            StatKind::NetworkLatency => a.network_latency.series(view),
            StatKind::PolygonsRendered => a.polygons_rendered.series(view),
        }
    }

    /// 모든 버퍼 비우기 (세션 전환 시)
    pub fn reset(&mut self) {
        let frames = self.frames.frames_received.per_frame().capacity();
        let seconds = self.second_capacity;
        self.frames = FrameWindows::new(frames, seconds);
        self.assessments = AssessmentWindows::new(seconds, seconds);
        self.latest_assessment = None;
        self.window_start = None;
        self.windows_closed = 0;
        // 이전 세션에서 질의한 결과는 버린다
        if let Some(query) = &self.query {
            query.inbox.lock().take();
        }
    }
}
