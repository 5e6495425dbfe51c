//! 렌더링 서비스 통계 모델.
//!
//! 런타임이 프레임마다 보고하는 원시 통계와,
//! 초 단위로 조회하는 성능 평가 결과.

use serde::{Deserialize, Serialize};

/// 프레임 단위 원시 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStatistics {
    /// 포즈 전송 → 프레임 수신 지연 (초)
    pub latency_pose_to_receive: f32,
    /// 프레임 수신 → 표시 요청 지연 (초)
    pub latency_receive_to_present: f32,
    /// 표시 요청 → 화면 출력 지연 (초)
    pub latency_present_to_display: f32,
    /// 직전 present 이후 경과 (초)
    pub time_since_last_present: f32,
    pub video_frames_received: u32,
    pub video_frames_reused: u32,
    pub video_frames_skipped: u32,
    pub video_frames_discarded: u32,
    /// 프레임 간 최소 간격 (초)
    pub video_frame_min_delta: f32,
    /// 프레임 간 최대 간격 (초)
    pub video_frame_max_delta: f32,
}

/// 서버 측 성능 평가 (1초 주기 질의 결과)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAssessment {
    pub time_cpu_ms: f32,
    pub time_gpu_ms: f32,
    /// 0.0 ~ 1.0
    pub utilization_cpu: f32,
    pub utilization_gpu: f32,
    pub memory_cpu_bytes: u64,
    pub memory_gpu_bytes: u64,
    pub network_latency_ms: f32,
    pub polygons_rendered: u32,
}
