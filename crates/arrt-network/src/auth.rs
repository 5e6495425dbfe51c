//! STS 액세스 토큰 관리.
//!
//! 계정 ID/키로 STS에서 액세스 토큰을 받아 만료 직전까지 캐시한다.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use arrt_core::error::CoreError;

/// STS 토큰 유효 기간
const TOKEN_LIFETIME_HOURS: i64 = 24;

/// 만료 이 시간 전부터는 새 토큰을 받는다
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// STS 응답
#[derive(Debug, Deserialize)]
struct StsTokenResponse {
    #[serde(rename = "AccessToken")]
    access_token: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// STS 토큰 매니저
#[derive(Clone)]
pub struct StsTokenManager {
    sts_url: String,
    account_id: String,
    account_key: String,
    client: reqwest::Client,
    state: Arc<RwLock<Option<CachedToken>>>,
}

impl StsTokenManager {
    pub fn new(sts_url: &str, account_id: &str, account_key: &str) -> Self {
        Self {
            sts_url: sts_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            account_key: account_key.to_string(),
            client: reqwest::Client::new(),
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// 유효한 액세스 토큰 반환 (만료 임박 시 새로 발급)
    pub async fn get_token(&self) -> Result<String, CoreError> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &*state {
                if Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES) < cached.expires_at {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        self.refresh().await
    }

    /// STS에서 새 토큰 발급
    pub async fn refresh(&self) -> Result<String, CoreError> {
        if self.account_id.is_empty() || self.account_key.is_empty() {
            return Err(CoreError::Auth("계정 ID/키가 설정되지 않음".to_string()));
        }

        let url = format!("{}/accounts/{}/token", self.sts_url, self.account_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(format!("{}:{}", self.account_id, self.account_key))
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("STS 토큰 요청 실패: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Auth(format!("STS 토큰 발급 실패 ({status}): {text}")));
        }

        let token: StsTokenResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Auth(format!("STS 토큰 파싱 실패: {e}")))?;

        let expires_at = Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS);
        let mut state = self.state.write().await;
        *state = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        debug!("STS 토큰 발급, 만료: {expires_at}");
        Ok(token.access_token)
    }

    /// 캐시 비우기 (401 이후 재발급 강제)
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        *state = None;
    }

    pub async fn has_valid_token(&self) -> bool {
        let state = self.state.read().await;
        state.as_ref().is_some_and(|s| Utc::now() < s.expires_at)
    }
}
