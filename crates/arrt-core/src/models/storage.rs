//! 오브젝트 스토리지 목록 모델.
//!
//! 컨테이너/블롭 항목과 continuation 토큰 기반 페이지(세그먼트).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 컨테이너 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItem {
    pub name: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// 블롭 항목 (계층 조회에서는 가상 디렉토리도 포함)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobItem {
    /// `/`로 구분된 전체 경로. 디렉토리는 `/`로 끝난다.
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// 블롭 목록 조회 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobListing {
    /// 하위 트리 전체
    Flat,
    /// 바로 아래 항목만 (디렉토리는 접두사로 묶임)
    #[default]
    Hierarchical,
}

/// 블롭 목록 질의
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobQuery {
    pub container: String,
    /// 디렉토리 접두사 (예: "models/cars/")
    pub prefix: String,
    pub listing: BlobListing,
}

impl BlobQuery {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: String::new(),
            listing: BlobListing::Hierarchical,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_listing(mut self, listing: BlobListing) -> Self {
        self.listing = listing;
        self
    }
}

/// 목록 조회 결과 한 페이지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<T> {
    pub items: Vec<T>,
    /// 다음 페이지 토큰. 비어 있으면 마지막 페이지.
    pub continuation: Option<String>,
}

impl<T> Segment<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }

    pub fn with_continuation(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            continuation: Some(token.into()),
        }
    }

    /// 다음 페이지 토큰 (빈 문자열은 토큰 없음으로 취급)
    pub fn next_token(&self) -> Option<&str> {
        self.continuation.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_last(&self) -> bool {
        self.next_token().is_none()
    }
}
