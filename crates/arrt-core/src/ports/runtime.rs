//! 그래픽 런타임 연결 포트.
//!
//! 세션이 Ready가 된 뒤 맺는 렌더링 런타임 핸드셰이크와 모델 로딩.
//! 런타임 내부(그래픽 바인딩, 씬 그래프)는 이 크레이트의 관심사가 아니다.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CoreError;
use crate::models::session::SessionProperties;
use crate::models::stats::PerformanceAssessment;

/// 모델 로딩 진행률 콜백 (0.0 ~ 1.0)
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// 씬 루트 엔티티 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

/// 로드된 모델
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub url: String,
    pub root: EntityId,
}

/// 런타임 연결 관리
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    /// Ready 세션의 런타임에 연결
    async fn connect(&self, session: &SessionProperties) -> Result<(), CoreError>;

    /// 런타임 연결 해제. 반환 시점에 네이티브 리소스가 해제되어 있어야 한다.
    fn disconnect(&self);

    /// 모델 로드. `progress`는 임의 스레드에서 호출될 수 있다.
    async fn load_model(
        &self,
        url: &str,
        progress: ProgressCallback,
    ) -> Result<LoadedModel, CoreError>;

    /// 모델 언로드
    fn unload_model(&self, model: &LoadedModel);
}

/// 서버 성능 평가 질의
#[async_trait]
pub trait PerformanceProbe: Send + Sync {
    async fn query_performance_assessment(&self) -> Result<PerformanceAssessment, CoreError>;
}
