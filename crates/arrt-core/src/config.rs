//! 애플리케이션 설정 구조체.
//!
//! 계정 정보, 세션 리스 기본값, 스토리지/통계 버퍼 크기, 마지막 활성 세션 ID,
//! UI 상태 맵을 정의한다. [`crate::config_manager::ConfigManager`]가 JSON 파일로 저장/로드.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::session::VmSize;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 원격 렌더링 계정 설정
    #[serde(default)]
    pub account: AccountConfig,
    /// 세션 리스/폴링 설정
    #[serde(default)]
    pub session: SessionConfig,
    /// 스토리지 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 서비스 통계 설정
    #[serde(default)]
    pub stats: StatsConfig,
    /// 마지막으로 실행 중이던 세션 ID (재시작 시 재연결용)
    #[serde(default)]
    pub running_session: Option<String>,
    /// UI 상태 키/값 맵
    #[serde(default)]
    pub ui_state: BTreeMap<String, String>,
}

// ============================================================
// 계정 설정
// ============================================================

/// 원격 렌더링 계정 설정
///
/// 계정 키의 저장 시 암호화는 플랫폼 보안 저장소의 몫이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// 계정 ID (GUID)
    #[serde(default)]
    pub account_id: String,
    /// 계정 키
    #[serde(default)]
    pub account_key: String,
    /// 계정 도메인 (예: "eastus.mixedreality.azure.com")
    #[serde(default = "default_account_domain")]
    pub account_domain: String,
    /// 렌더링 리전 (예: "westeurope")
    #[serde(default = "default_region")]
    pub region: String,
    /// 요청 타임아웃 (밀리초)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            account_key: String::new(),
            account_domain: default_account_domain(),
            region: default_region(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl AccountConfig {
    /// 렌더링 서비스 REST 엔드포인트
    pub fn rendering_endpoint(&self) -> String {
        format!("https://remoterendering.{}.mixedreality.azure.com", self.region)
    }

    /// STS(토큰 발급) 엔드포인트
    pub fn sts_endpoint(&self) -> String {
        format!("https://sts.{}", self.account_domain)
    }

    /// 계정 정보가 채워져 있는지
    pub fn is_configured(&self) -> bool {
        !self.account_id.is_empty() && !self.account_key.is_empty()
    }
}

// ============================================================
// 세션 설정
// ============================================================

/// 세션 리스/연장/폴링 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 새 세션의 기본 VM 크기
    #[serde(default)]
    pub default_vm_size: VmSize,
    /// 새 세션의 기본 최대 리스 시간 (분)
    #[serde(default = "default_lease_minutes")]
    pub default_lease_minutes: u32,
    /// 연장 1회당 추가되는 시간 (분)
    #[serde(default = "default_extension_minutes")]
    pub extension_minutes: u32,
    /// 만료 임박 시 자동 연장
    #[serde(default = "default_true")]
    pub auto_extend: bool,
    /// 자동 연장 임계값. 남은 시간이 이 값 이하이면 연장 (분)
    #[serde(default = "default_auto_extend_threshold_minutes")]
    pub auto_extend_threshold_minutes: u32,
    /// 상태 폴링 주기 (밀리초)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 런타임 연결이 끊기면 자동 재연결
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_vm_size: VmSize::Standard,
            default_lease_minutes: default_lease_minutes(),
            extension_minutes: default_extension_minutes(),
            auto_extend: true,
            auto_extend_threshold_minutes: default_auto_extend_threshold_minutes(),
            poll_interval_ms: default_poll_interval_ms(),
            auto_reconnect: true,
        }
    }
}

impl SessionConfig {
    /// 폴링 주기를 Duration으로 반환
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ============================================================
// 스토리지 / 통계 설정
// ============================================================

/// 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 로컬 블롭 저장소 루트 (None이면 플랫폼 데이터 디렉토리)
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// 목록 조회 1페이지당 최대 항목 수
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// 업로드 워커 스레드 상한
    #[serde(default = "default_upload_threads")]
    pub upload_threads: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            page_size: default_page_size(),
            upload_threads: default_upload_threads(),
        }
    }
}

/// 서비스 통계 링 버퍼 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// 프레임 단위 원시 샘플 버퍼 크기
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
    /// 초 단위 집계 버퍼 크기
    #[serde(default = "default_second_buffer")]
    pub second_buffer: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            frame_buffer: default_frame_buffer(),
            second_buffer: default_second_buffer(),
        }
    }
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self {
            account: AccountConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
            stats: StatsConfig::default(),
            running_session: None,
            ui_state: BTreeMap::new(),
        }
    }

    /// 요청 타임아웃을 Duration으로 반환
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.account.request_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}

fn default_account_domain() -> String {
    "mixedreality.azure.com".to_string()
}
fn default_region() -> String {
    "westeurope".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_lease_minutes() -> u32 {
    30
}
fn default_extension_minutes() -> u32 {
    10
}
fn default_auto_extend_threshold_minutes() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_page_size() -> usize {
    100
}
fn default_upload_threads() -> usize {
    8
}
fn default_frame_buffer() -> usize {
    240 // 60fps 기준 4초
}
fn default_second_buffer() -> usize {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"session":{"extension_minutes":15}}"#).unwrap();
        assert_eq!(config.session.extension_minutes, 15);
        assert_eq!(config.session.default_lease_minutes, 30);
        assert!(config.session.auto_reconnect);
        assert_eq!(config.stats.second_buffer, 120);
    }

    #[test]
    fn endpoints_from_account() {
        let account = AccountConfig {
            account_id: "acc".to_string(),
            account_key: "key".to_string(),
            account_domain: "eastus.mixedreality.azure.com".to_string(),
            region: "eastus".to_string(),
            request_timeout_ms: 1_000,
        };
        assert!(account.is_configured());
        assert_eq!(
            account.rendering_endpoint(),
            "https://remoterendering.eastus.mixedreality.azure.com"
        );
        assert_eq!(account.sts_endpoint(), "https://sts.eastus.mixedreality.azure.com");
        assert!(!AccountConfig::default().is_configured());
    }
}
