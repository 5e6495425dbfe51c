//! 세션 변경 알림.
//!
//! `tokio::broadcast` 기반. 구독자는 알림을 받을 때마다 필요한 상태를 다시 조회한다.

use arrt_core::models::session::SessionStatus;
use arrt_core::ports::runtime::EntityId;

/// 세션 관리자가 발행하는 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 로컬 상태 전이
    StatusChanged {
        old: SessionStatus,
        new: SessionStatus,
    },
    /// 폴링/연장 응답으로 세션 속성 갱신
    PropertiesUpdated,
    /// 로드된 모델 루트 변경 (None이면 언로드)
    RootEntityChanged(Option<EntityId>),
    /// 세션 핸들 해제 (런타임 연결 해제 이후)
    SessionReleased { session_id: Option<String> },
}

/// 기본 알림 버퍼 크기
pub const EVENT_CAPACITY: usize = 128;
