//! 취소 가능한 비동기 작업 핸들과 컨텍스트 생존 토큰.

use std::sync::{Arc, Weak};

/// 진행 중인 비동기 작업 핸들
///
/// `cancel`은 메인 스레드에서 호출해야 하며, 호출 이후에는
/// 어떤 콜백도 실행되지 않는다. 두 번째 호출은 아무 일도 하지 않는다.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// 콜백을 요청한 쪽(뷰모델 등)이 소유하는 생존 토큰
///
/// 드롭되면 연결된 모든 [`ContextHandle`]이 죽은 것으로 판정된다.
#[derive(Debug, Default)]
pub struct Liveness(Arc<()>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(()))
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle(Some(Arc::downgrade(&self.0)))
    }
}

/// 전달 시점에 검사하는 약한 컨텍스트 참조
#[derive(Debug, Clone, Default)]
pub struct ContextHandle(Option<Weak<()>>);

impl ContextHandle {
    /// 컨텍스트가 없는(항상 살아있는) 핸들
    pub fn detached() -> Self {
        Self(None)
    }

    pub fn is_alive(&self) -> bool {
        match &self.0 {
            Some(weak) => weak.strong_count() > 0,
            None => true,
        }
    }
}
