//! 원격 렌더링 REST 클라이언트.
//!
//! `RenderingService` 포트 구현. STS 토큰 헤더 자동 주입 + 재시도 로직.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use arrt_core::error::CoreError;
use arrt_core::models::session::{SessionOptions, SessionProperties};
use arrt_core::ports::rendering::RenderingService;

use crate::auth::StsTokenManager;

/// REST API 버전
const API_VERSION: &str = "2021-01-01";

/// 기본 재시도 횟수
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry-After 헤더가 없을 때 대기 시간 (초)
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// 재시도 가능한 에러인지 판별
fn is_retryable(error: &CoreError) -> bool {
    matches!(
        error,
        CoreError::Network(_) | CoreError::ServiceUnavailable(_) | CoreError::RateLimit { .. }
    )
}

/// 세션 REST 클라이언트
pub struct HttpRenderingService {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    token_manager: Arc<StsTokenManager>,
    max_retries: u32,
}

impl HttpRenderingService {
    pub fn new(
        base_url: &str,
        account_id: &str,
        token_manager: Arc<StsTokenManager>,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            token_manager,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// 재시도 횟수 설정
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn session_path(&self, session_id: &str) -> String {
        format!("/accounts/{}/sessions/{session_id}", self.account_id)
    }

    /// Authorization 헤더와 api-version이 포함된 요청 빌더 반환
    async fn authorized_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, CoreError> {
        let token = self.token_manager.get_token().await?;
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .request(method, &url)
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token))
    }

    /// 응답 상태 코드 확인 및 에러 매핑
    async fn check_response(
        &self,
        resp: reqwest::Response,
        session_id: &str,
    ) -> Result<reqwest::Response, CoreError> {
        let status = resp.status();

        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let text = resp.text().await.unwrap_or_else(|e| {
            warn!("응답 본문 읽기 실패: {e}");
            String::new()
        });

        match status.as_u16() {
            401 => {
                // 다음 요청에서 토큰을 새로 받는다
                self.token_manager.invalidate().await;
                Err(CoreError::Auth(format!("인증 실패: {text}")))
            }
            404 => Err(CoreError::NotFound {
                resource_type: "Session".to_string(),
                id: session_id.to_string(),
            }),
            429 => Err(CoreError::RateLimit {
                retry_after_secs: retry_after,
            }),
            503 => Err(CoreError::ServiceUnavailable(text)),
            _ => Err(CoreError::Internal(format!("API 에러 ({status}): {text}"))),
        }
    }

    /// 재시도가 포함된 요청 실행
    ///
    /// exponential backoff: 1s → 2s → 4s
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut last_error = CoreError::Internal("요청 실패".to_string());
        let mut delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable(&e) || attempt == self.max_retries {
                        return Err(e);
                    }

                    warn!(
                        "요청 실패 (시도 {}/{}): {e}, {delay:?} 후 재시도",
                        attempt + 1,
                        self.max_retries + 1
                    );

                    if let CoreError::RateLimit { retry_after_secs } = &e {
                        delay = Duration::from_secs(*retry_after_secs);
                    }

                    last_error = e;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
            }
        }

        Err(last_error)
    }

    async fn parse_properties(resp: reqwest::Response) -> Result<SessionProperties, CoreError> {
        resp.json()
            .await
            .map_err(|e| CoreError::Internal(format!("세션 응답 파싱 실패: {e}")))
    }
}

#[async_trait]
impl RenderingService for HttpRenderingService {
    async fn create_session(
        &self,
        options: &SessionOptions,
    ) -> Result<SessionProperties, CoreError> {
        // 재시도해도 같은 세션을 가리키도록 ID는 한 번만 만든다
        let session_id = uuid::Uuid::new_v4().to_string();
        debug!(
            "세션 생성 요청: id={session_id}, size={}, lease={}분",
            options.size.as_api_str(),
            options.max_lease_minutes
        );

        self.execute_with_retry(|| async {
            let req = self
                .authorized_request(reqwest::Method::PUT, &self.session_path(&session_id))
                .await?;

            let body = serde_json::json!({
                "maxLeaseTimeMinutes": options.max_lease_minutes,
                "size": options.size.as_api_str(),
            });
            let resp = req
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("세션 생성 요청 실패: {e}")))?;

            let resp = self.check_response(resp, &session_id).await?;
            let properties = Self::parse_properties(resp).await?;
            debug!("세션 생성 성공: {:?}", properties.status);
            Ok(properties)
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionProperties, CoreError> {
        self.execute_with_retry(|| async {
            let req = self
                .authorized_request(reqwest::Method::GET, &self.session_path(session_id))
                .await?;

            let resp = req
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("세션 조회 요청 실패: {e}")))?;

            let resp = self.check_response(resp, session_id).await?;
            Self::parse_properties(resp).await
        })
        .await
    }

    async fn update_session(
        &self,
        session_id: &str,
        max_lease_minutes: u32,
    ) -> Result<SessionProperties, CoreError> {
        debug!("세션 연장 요청: id={session_id}, lease={max_lease_minutes}분");

        self.execute_with_retry(|| async {
            let req = self
                .authorized_request(reqwest::Method::PATCH, &self.session_path(session_id))
                .await?;

            let body = serde_json::json!({ "maxLeaseTimeMinutes": max_lease_minutes });
            let resp = req
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("세션 연장 요청 실패: {e}")))?;

            let resp = self.check_response(resp, session_id).await?;
            Self::parse_properties(resp).await
        })
        .await
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), CoreError> {
        debug!("세션 중지 요청: id={session_id}");

        self.execute_with_retry(|| async {
            let path = format!("{}/:stop", self.session_path(session_id));
            let req = self
                .authorized_request(reqwest::Method::POST, &path)
                .await?;

            let resp = req
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("세션 중지 요청 실패: {e}")))?;

            self.check_response(resp, session_id).await?;
            debug!("세션 중지 요청 수락");
            Ok(())
        })
        .await
    }
}
