//! 컨테이너/블롭 목록 소스.

use async_trait::async_trait;
use std::sync::Arc;

use arrt_core::cancellable::ContextHandle;
use arrt_core::error::CoreError;
use arrt_core::models::storage::{BlobItem, BlobQuery, ContainerItem, Segment};
use arrt_core::ports::blob_storage::BlobStorage;

use crate::fetcher::{FetchHandle, SegmentSource, SegmentedFetcher};

/// 계정의 컨테이너 목록
pub struct ContainerSource {
    storage: Arc<dyn BlobStorage>,
    page_size: usize,
}

impl ContainerSource {
    pub fn new(storage: Arc<dyn BlobStorage>, page_size: usize) -> Self {
        Self {
            storage,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl SegmentSource<ContainerItem> for ContainerSource {
    async fn fetch_segment(
        &self,
        token: Option<String>,
    ) -> Result<Segment<ContainerItem>, CoreError> {
        self.storage.list_containers(token, self.page_size).await
    }
}

/// 컨테이너 안의 블롭 목록
pub struct BlobSource {
    storage: Arc<dyn BlobStorage>,
    query: BlobQuery,
    page_size: usize,
}

impl BlobSource {
    pub fn new(storage: Arc<dyn BlobStorage>, query: BlobQuery, page_size: usize) -> Self {
        Self {
            storage,
            query,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl SegmentSource<BlobItem> for BlobSource {
    async fn fetch_segment(&self, token: Option<String>) -> Result<Segment<BlobItem>, CoreError> {
        self.storage
            .list_blobs(&self.query, token, self.page_size)
            .await
    }
}

impl SegmentedFetcher {
    /// 컨테이너 목록 조회
    pub fn fetch_containers<P, E>(
        &self,
        context: ContextHandle,
        storage: Arc<dyn BlobStorage>,
        page_size: usize,
        on_page: P,
        on_end: E,
    ) -> FetchHandle<ContainerItem>
    where
        P: FnMut(Vec<ContainerItem>) + Send + 'static,
        E: FnOnce(Result<(), CoreError>) + Send + 'static,
    {
        let source: Arc<dyn SegmentSource<ContainerItem>> =
            Arc::new(ContainerSource::new(storage, page_size));
        self.start_fetching(context, source, on_page, on_end)
    }

    /// 블롭 목록 조회
    pub fn fetch_blobs<P, E>(
        &self,
        context: ContextHandle,
        storage: Arc<dyn BlobStorage>,
        query: BlobQuery,
        page_size: usize,
        on_page: P,
        on_end: E,
    ) -> FetchHandle<BlobItem>
    where
        P: FnMut(Vec<BlobItem>) + Send + 'static,
        E: FnOnce(Result<(), CoreError>) + Send + 'static,
    {
        let source: Arc<dyn SegmentSource<BlobItem>> =
            Arc::new(BlobSource::new(storage, query, page_size));
        self.start_fetching(context, source, on_page, on_end)
    }
}
