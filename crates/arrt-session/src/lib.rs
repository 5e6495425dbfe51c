//! # arrt-session
//!
//! 원격 렌더링 세션 수명 관리.
//!
//! - [`manager`]: 세션 상태 머신 (시작/중지/폴링/연장/런타임 연결/모델 로드)
//! - [`events`]: 세션 변경 알림
//! - [`guard`]: 재진입 금지 가드
//! - [`stats`]: 프레임/초 단위 서비스 통계 집계

pub mod events;
pub mod guard;
pub mod manager;
pub mod stats;

pub use manager::SessionManager;
