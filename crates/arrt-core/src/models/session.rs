//! 원격 렌더링 세션 모델.
//!
//! 백엔드가 보고하는 세션 속성과 로컬 상태 머신의 상태를 표현.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 세션 VM 크기
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmSize {
    #[default]
    #[serde(alias = "standard")]
    Standard,
    #[serde(alias = "premium")]
    Premium,
}

impl VmSize {
    /// REST 요청 본문에 쓰는 값
    pub fn as_api_str(&self) -> &'static str {
        match self {
            VmSize::Standard => "standard",
            VmSize::Premium => "premium",
        }
    }
}

impl std::str::FromStr for VmSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(VmSize::Standard),
            "premium" => Ok(VmSize::Premium),
            other => Err(format!("알 수 없는 VM 크기: {other}")),
        }
    }
}

/// 세션 생성 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub size: VmSize,
    pub max_lease_minutes: u32,
}

/// 백엔드가 보고하는 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteSessionStatus {
    Unknown,
    Starting,
    Ready,
    Stopped,
    Expired,
    Error,
}

/// 백엔드 세션 속성 (REST 응답 본문)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProperties {
    pub id: String,
    #[serde(default)]
    pub size: VmSize,
    pub status: RemoteSessionStatus,
    /// Ready 이후에만 할당됨
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub handshake_port: Option<u16>,
    #[serde(default)]
    pub arr_inspector_port: Option<u16>,
    #[serde(rename = "maxLeaseTimeMinutes")]
    pub max_lease_minutes: u32,
    #[serde(rename = "elapsedTimeMinutes", default)]
    pub elapsed_minutes: u32,
    /// 서버 메시지 (에러 사유 등)
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "creationTime", default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 로컬 세션 상태
///
/// 선언 순서가 곧 서수다. `StartRequested` 이상은 모두 실행 중 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    NotActive,
    Stopped,
    Expired,
    Error,
    StartRequested,
    Starting,
    ReadyNotConnected,
    ReadyConnecting,
    ReadyConnected,
    StopRequested,
}

impl SessionStatus {
    /// 실행 중 상태의 하한
    pub const RUNNING_MARKER: SessionStatus = SessionStatus::StartRequested;

    /// 전체 상태 목록 (서수 순)
    pub const ALL: [SessionStatus; 10] = [
        SessionStatus::NotActive,
        SessionStatus::Stopped,
        SessionStatus::Expired,
        SessionStatus::Error,
        SessionStatus::StartRequested,
        SessionStatus::Starting,
        SessionStatus::ReadyNotConnected,
        SessionStatus::ReadyConnecting,
        SessionStatus::ReadyConnected,
        SessionStatus::StopRequested,
    ];

    pub fn is_running(&self) -> bool {
        *self >= Self::RUNNING_MARKER
    }

    /// 백엔드가 Ready로 보고한 상태들
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            SessionStatus::ReadyNotConnected
                | SessionStatus::ReadyConnecting
                | SessionStatus::ReadyConnected
        )
    }

    /// 런타임 연결이 진행 중이거나 연결된 상태
    pub fn has_runtime(&self) -> bool {
        matches!(
            self,
            SessionStatus::ReadyConnecting | SessionStatus::ReadyConnected
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionStatus::NotActive => "Not active",
            SessionStatus::Stopped => "Stopped",
            SessionStatus::Expired => "Expired",
            SessionStatus::Error => "Error",
            SessionStatus::StartRequested => "Start requested",
            SessionStatus::Starting => "Starting",
            SessionStatus::ReadyNotConnected => "Ready (not connected)",
            SessionStatus::ReadyConnecting => "Ready (connecting)",
            SessionStatus::ReadyConnected => "Ready (connected)",
            SessionStatus::StopRequested => "Stop requested",
        };
        f.write_str(text)
    }
}

/// 세션 생성 시 고정되는 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// 생성 응답 전까지는 None
    pub session_id: Option<String>,
    pub size: VmSize,
    pub requested_lease_minutes: u32,
}

/// 폴링으로 갱신되는 세션 상태 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub descriptor: Option<SessionDescriptor>,
    pub hostname: Option<String>,
    pub max_lease_minutes: u32,
    pub elapsed_minutes: u32,
    pub last_message: Option<String>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// 남은 리스 시간 (분)
    pub fn remaining_minutes(&self) -> u32 {
        self.max_lease_minutes.saturating_sub(self.elapsed_minutes)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.descriptor
            .as_ref()
            .and_then(|d| d.session_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_states_start_at_marker() {
        let running: Vec<_> = SessionStatus::ALL
            .iter()
            .filter(|s| s.is_running())
            .copied()
            .collect();
        assert_eq!(
            running,
            vec![
                SessionStatus::StartRequested,
                SessionStatus::Starting,
                SessionStatus::ReadyNotConnected,
                SessionStatus::ReadyConnecting,
                SessionStatus::ReadyConnected,
                SessionStatus::StopRequested,
            ]
        );
        assert!(!SessionStatus::NotActive.is_running());
        assert!(!SessionStatus::Error.is_running());
        for status in SessionStatus::ALL {
            assert_eq!(
                status.is_running(),
                status >= SessionStatus::RUNNING_MARKER,
                "{status:?}"
            );
        }
    }

    #[test]
    fn properties_from_rest_body() {
        let body = r#"{
            "id": "3ff6ab5c-600c-4daa-b1cd-3c0a0e4f8d1c",
            "arrInspectorPort": 4444,
            "handshakePort": 5555,
            "elapsedTimeMinutes": 3,
            "hostname": "host.remoterendering.azure.com",
            "maxLeaseTimeMinutes": 30,
            "size": "Standard",
            "status": "Ready",
            "teraflops": 8.0,
            "creationTime": "2026-10-18T09:00:00Z"
        }"#;
        let props: SessionProperties = serde_json::from_str(body).unwrap();
        assert_eq!(props.status, RemoteSessionStatus::Ready);
        assert_eq!(props.elapsed_minutes, 3);
        assert_eq!(props.max_lease_minutes, 30);
        assert_eq!(props.handshake_port, Some(5555));
        assert!(props.created_at.is_some());
    }

    #[test]
    fn vm_size_parsing() {
        assert_eq!("Premium".parse::<VmSize>().unwrap(), VmSize::Premium);
        assert_eq!("standard".parse::<VmSize>().unwrap(), VmSize::Standard);
        assert!("huge".parse::<VmSize>().is_err());
        let size: VmSize = serde_json::from_str(r#""premium""#).unwrap();
        assert_eq!(size, VmSize::Premium);
    }

    #[test]
    fn remaining_minutes_saturates() {
        let snapshot = SessionSnapshot {
            status: SessionStatus::ReadyConnected,
            descriptor: None,
            hostname: None,
            max_lease_minutes: 30,
            elapsed_minutes: 45,
            last_message: None,
            last_error: None,
        };
        assert_eq!(snapshot.remaining_minutes(), 0);
    }
}
