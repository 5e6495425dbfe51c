//! ARRT 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 이 타입을 그대로 반환하며,
//! 비동기 경계를 넘어갈 때는 상태 + 알림으로 변환된다.

use thiserror::Error;

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 ({field}): {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 인증 실패 (토큰 만료, 계정 키 오류 등)
    #[error("인증 에러: {0}")]
    Auth(String),

    /// 리소스를 찾을 수 없음
    #[error("{resource_type} 미발견: {id}")]
    NotFound {
        /// 리소스 종류 (예: "Session", "Container")
        resource_type: String,
        /// 리소스 식별자
        id: String,
    },

    /// 네트워크 에러 (연결 실패, 타임아웃)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// Rate Limit 초과 (429)
    #[error("요청 한도 초과, {retry_after_secs}초 후 재시도")]
    RateLimit {
        /// 재시도 대기 시간 (초)
        retry_after_secs: u64,
    },

    /// 서비스 일시 불가 (503)
    #[error("서비스 일시 불가: {0}")]
    ServiceUnavailable(String),

    /// 현재 상태에서 허용되지 않는 요청 (예: 세션 실행 중 재시작)
    #[error("잘못된 상태: {0}")]
    InvalidState(String),

    /// 재진입 불가 루틴에 중복 진입
    #[error("재진입 감지: {0}")]
    Reentrancy(&'static str),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}
