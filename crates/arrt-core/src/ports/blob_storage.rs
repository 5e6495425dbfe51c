//! 오브젝트 스토리지 포트.
//!
//! 구현: `arrt-storage` crate (`LocalBlobStorage`)

use async_trait::async_trait;
use std::path::Path;

use crate::error::CoreError;
use crate::models::storage::{BlobItem, BlobQuery, ContainerItem, Segment};

/// continuation 토큰 기반 목록 조회 + 블로킹 업로드
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// 컨테이너 목록 한 페이지
    async fn list_containers(
        &self,
        marker: Option<String>,
        max_results: usize,
    ) -> Result<Segment<ContainerItem>, CoreError>;

    /// 블롭 목록 한 페이지
    async fn list_blobs(
        &self,
        query: &BlobQuery,
        marker: Option<String>,
        max_results: usize,
    ) -> Result<Segment<BlobItem>, CoreError>;

    /// 로컬 파일 하나를 블롭으로 업로드 (블로킹, 워커 스레드 전용)
    ///
    /// 업로드한 바이트 수를 반환한다.
    fn upload_file(&self, container: &str, blob_name: &str, source: &Path)
        -> Result<u64, CoreError>;
}
