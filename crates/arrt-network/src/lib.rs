//! # arrt-network
//!
//! 원격 렌더링 서비스 네트워크 어댑터.
//! 세션 REST API 호출과 STS 액세스 토큰 캐시를 담당한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use arrt_network::auth::StsTokenManager;
//! use arrt_network::http_client::HttpRenderingService;
//!
//! let tokens = Arc::new(StsTokenManager::new(&sts, &account_id, &account_key));
//! let service = HttpRenderingService::new(&endpoint, &account_id, tokens, timeout)?;
//! ```

pub mod auth;
pub mod http_client;
