//! 로컬 디렉토리 기반 `BlobStorage` 어댑터.
//!
//! 루트 아래 1단계 디렉토리를 컨테이너, 그 아래 파일을 블롭으로 본다.
//! 목록은 이름순이며 continuation 토큰은 "이 이름 다음부터"를 뜻한다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use arrt_core::error::CoreError;
use arrt_core::models::storage::{BlobItem, BlobListing, BlobQuery, ContainerItem, Segment};
use arrt_core::ports::blob_storage::BlobStorage;

/// 로컬 파일시스템 블롭 저장소
#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    /// 루트 디렉토리가 없으면 생성
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("로컬 블롭 저장소: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 컨테이너 생성 (이미 있으면 무시)
    pub fn create_container(&self, name: &str) -> Result<(), CoreError> {
        let path = self.container_path(name)?;
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn container_path(&self, name: &str) -> Result<PathBuf, CoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(CoreError::Validation {
                field: "container".to_string(),
                message: format!("잘못된 컨테이너 이름: {name:?}"),
            });
        }
        Ok(self.root.join(name))
    }

    fn existing_container(&self, name: &str) -> Result<PathBuf, CoreError> {
        let path = self.container_path(name)?;
        if !path.is_dir() {
            return Err(CoreError::NotFound {
                resource_type: "Container".to_string(),
                id: name.to_string(),
            });
        }
        Ok(path)
    }

    fn read_containers(root: &Path) -> Result<Vec<ContainerItem>, CoreError> {
        let mut items = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            items.push(ContainerItem {
                name: entry.file_name().to_string_lossy().into_owned(),
                last_modified: modified_at(&metadata),
            });
        }
        Ok(items)
    }

    fn read_blobs(container: &Path, query: &BlobQuery) -> Result<Vec<BlobItem>, CoreError> {
        let mut files = Vec::new();
        collect_files(container, container, &mut files)?;
        files.retain(|item| item.name.starts_with(&query.prefix));

        if query.listing == BlobListing::Flat {
            return Ok(files);
        }

        let mut directories = BTreeSet::new();
        let mut items = Vec::new();
        for item in files {
            let rest = &item.name[query.prefix.len()..];
            match rest.find('/') {
                Some(idx) => {
                    directories.insert(format!("{}{}", query.prefix, &rest[..=idx]));
                }
                None => items.push(item),
            }
        }
        items.extend(directories.into_iter().map(|name| BlobItem {
            name,
            is_directory: true,
            size: 0,
            last_modified: None,
        }));
        Ok(items)
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn list_containers(
        &self,
        marker: Option<String>,
        max_results: usize,
    ) -> Result<Segment<ContainerItem>, CoreError> {
        let root = self.root.clone();
        let items = run_blocking(move || Self::read_containers(&root)).await?;
        Ok(paginate(items, |c| c.name.as_str(), marker, max_results))
    }

    async fn list_blobs(
        &self,
        query: &BlobQuery,
        marker: Option<String>,
        max_results: usize,
    ) -> Result<Segment<BlobItem>, CoreError> {
        let container = self.existing_container(&query.container)?;
        let query = query.clone();
        let items = run_blocking(move || Self::read_blobs(&container, &query)).await?;
        Ok(paginate(items, |b| b.name.as_str(), marker, max_results))
    }

    fn upload_file(
        &self,
        container: &str,
        blob_name: &str,
        source: &Path,
    ) -> Result<u64, CoreError> {
        let container_dir = self.existing_container(container)?;
        let relative = blob_relative_path(blob_name)?;
        let target = container_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(source, &target)?;
        debug!("업로드 완료: {container}/{blob_name} ({bytes} bytes)");
        Ok(bytes)
    }
}

async fn run_blocking<R, F>(work: F) -> Result<R, CoreError>
where
    F: FnOnce() -> Result<R, CoreError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CoreError::Internal(format!("블로킹 작업 실패: {e}")))?
}

/// 이름순 정렬 후 `marker` 다음부터 `max_results`개
fn paginate<T, K>(
    mut items: Vec<T>,
    key: K,
    marker: Option<String>,
    max_results: usize,
) -> Segment<T>
where
    K: Fn(&T) -> &str,
{
    items.sort_by(|a, b| key(a).cmp(key(b)));
    if let Some(marker) = marker.as_deref().filter(|m| !m.is_empty()) {
        items.retain(|item| key(item) > marker);
    }

    let max_results = max_results.max(1);
    if items.len() <= max_results {
        return Segment::last(items);
    }
    items.truncate(max_results);
    let token = items.last().map(|item| key(item).to_string()).unwrap_or_default();
    Segment::with_continuation(items, token)
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<BlobItem>) -> Result<(), CoreError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let path = entry.path();
        if metadata.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            out.push(BlobItem {
                name: to_blob_name(relative),
                is_directory: false,
                size: metadata.len(),
                last_modified: modified_at(&metadata),
            });
        }
    }
    Ok(())
}

fn to_blob_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 블롭 이름을 컨테이너 안의 상대 경로로 변환 (상위 경로 탈출 금지)
fn blob_relative_path(blob_name: &str) -> Result<PathBuf, CoreError> {
    let parts: Vec<&str> = blob_name.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "." || *p == ".." || p.contains('\\')) {
        return Err(CoreError::Validation {
            field: "blob_name".to_string(),
            message: format!("잘못된 블롭 이름: {blob_name:?}"),
        });
    }
    Ok(parts.iter().collect())
}

fn modified_at(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage_with_files(files: &[&str]) -> (TempDir, LocalBlobStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(dir.path().join("blobs")).unwrap();
        storage.create_container("models").unwrap();
        for name in files {
            let path = storage.root().join("models").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, name.as_bytes()).unwrap();
        }
        (dir, storage)
    }

    #[tokio::test]
    async fn containers_are_paged_by_name() {
        let dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(dir.path()).unwrap();
        for name in ["c", "a", "b"] {
            storage.create_container(name).unwrap();
        }
        fs::write(dir.path().join("not-a-container.txt"), b"x").unwrap();

        let first = storage.list_containers(None, 2).await.unwrap();
        let names: Vec<_> = first.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(first.next_token(), Some("b"));

        let second = storage
            .list_containers(first.continuation.clone(), 2)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "c");
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn hierarchical_listing_groups_directories() {
        let (_dir, storage) =
            storage_with_files(&["cars/a.arrAsset", "cars/sub/b.arrAsset", "c.arrAsset", "d/e"]);

        let root = storage
            .list_blobs(&BlobQuery::new("models"), None, 100)
            .await
            .unwrap();
        let names: Vec<_> = root.items.iter().map(|b| (b.name.as_str(), b.is_directory)).collect();
        assert_eq!(names, [("c.arrAsset", false), ("cars/", true), ("d/", true)]);

        let cars = storage
            .list_blobs(&BlobQuery::new("models").with_prefix("cars/"), None, 100)
            .await
            .unwrap();
        let names: Vec<_> = cars.items.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["cars/a.arrAsset", "cars/sub/"]);
    }

    #[tokio::test]
    async fn flat_listing_returns_whole_subtree() {
        let (_dir, storage) = storage_with_files(&["cars/a", "cars/sub/b", "c"]);

        let query = BlobQuery::new("models").with_listing(BlobListing::Flat);
        let all = storage.list_blobs(&query, None, 100).await.unwrap();
        let names: Vec<_> = all.items.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["c", "cars/a", "cars/sub/b"]);
        assert!(all.items.iter().all(|b| !b.is_directory && b.size > 0));
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(dir.path()).unwrap();
        let err = storage
            .list_blobs(&BlobQuery::new("nope"), None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn upload_creates_nested_blob() {
        let (dir, storage) = storage_with_files(&[]);
        let source = dir.path().join("input.bin");
        fs::write(&source, vec![7u8; 64]).unwrap();

        let bytes = storage
            .upload_file("models", "incoming/deep/input.bin", &source)
            .unwrap();
        assert_eq!(bytes, 64);
        assert!(storage
            .root()
            .join("models/incoming/deep/input.bin")
            .is_file());
    }

    #[test]
    fn upload_rejects_escaping_names() {
        let (dir, storage) = storage_with_files(&[]);
        let source = dir.path().join("input.bin");
        fs::write(&source, b"x").unwrap();

        let err = storage
            .upload_file("models", "../outside.bin", &source)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        let err = storage.upload_file("missing", "a.bin", &source).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
