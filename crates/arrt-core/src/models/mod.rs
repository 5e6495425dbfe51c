//! ARRT 도메인 모델.
//!
//! 원격 서비스와 주고받는 데이터 구조체와 로컬 상태 값을 정의한다.

pub mod session;
pub mod stats;
pub mod storage;
