//! # arrt-core
//!
//! ARRT 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 도메인 데이터 구조체 (세션, 스토리지 목록, 통계)
//! - [`ports`]: Hexagonal Architecture 포트 인터페이스 (async_trait)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 애플리케이션 설정 구조체
//! - [`config_manager`]: 설정 파일 관리 (로드/저장)
//! - [`dispatch`]: 메인 스레드 작업 큐
//! - [`cancellable`]: 취소 핸들, 컨텍스트 생존 토큰
//! - [`clock`]: 단조 시계 추상화

pub mod cancellable;
pub mod clock;
pub mod config;
pub mod config_manager;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod ports;
