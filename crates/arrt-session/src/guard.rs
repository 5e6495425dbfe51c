//! 재진입 금지 가드.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

use arrt_core::error::CoreError;

/// 동시에 한 번만 진입할 수 있는 루틴 표시
#[derive(Debug)]
pub struct NonReentrant {
    name: &'static str,
    active: AtomicBool,
}

impl NonReentrant {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            active: AtomicBool::new(false),
        }
    }

    /// 진입. 이미 진입 중이면 `Reentrancy` 에러
    pub fn enter(&self) -> Result<ReentryGuard<'_>, CoreError> {
        if self.active.swap(true, Ordering::AcqRel) {
            error!("재진입 감지: {}", self.name);
            return Err(CoreError::Reentrancy(self.name));
        }
        Ok(ReentryGuard { owner: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// 드롭 시 진입 표시 해제
#[must_use]
pub struct ReentryGuard<'a> {
    owner: &'a NonReentrant,
}

impl Drop for ReentryGuard<'_> {
    fn drop(&mut self) {
        self.owner.active.store(false, Ordering::Release);
    }
}
