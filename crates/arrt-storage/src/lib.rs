//! # arrt-storage
//!
//! 오브젝트 스토리지 위의 비동기 작업.
//!
//! - [`fetcher`]: continuation 토큰 기반 목록 조회 엔진 (취소 가능)
//! - [`listing`]: 컨테이너/블롭 목록 소스
//! - [`uploader`]: 워커 스레드 기반 일괄 업로드
//! - [`local`]: 로컬 디렉토리 기반 `BlobStorage` 어댑터

pub mod fetcher;
pub mod listing;
pub mod local;
pub mod uploader;
