//! 원격 렌더링 세션 서비스 포트.
//!
//! 구현: `arrt-network` crate (reqwest REST 클라이언트)

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::session::{SessionOptions, SessionProperties};

/// 세션 생성/조회/연장/중지 RPC
#[async_trait]
pub trait RenderingService: Send + Sync {
    /// 새 세션 생성 요청. 세션 ID는 구현체가 발급한다.
    async fn create_session(&self, options: &SessionOptions)
        -> Result<SessionProperties, CoreError>;

    /// 세션 속성 조회
    async fn get_session(&self, session_id: &str) -> Result<SessionProperties, CoreError>;

    /// 최대 리스 시간 변경 (연장)
    async fn update_session(
        &self,
        session_id: &str,
        max_lease_minutes: u32,
    ) -> Result<SessionProperties, CoreError>;

    /// 세션 중지
    async fn stop_session(&self, session_id: &str) -> Result<(), CoreError>;
}
