//! 本地构建产物
//!
//! 产物目录下每个构建一个子目录，目录名为构建时间 (`2024_03_01_12_30_00`)，其中包含 `sdcard.img`

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::fs;
use tracing::{debug, info};

use crate::config::env::constants::{ARTIFACT_FOLDER_FORMAT, IMAGE_FILE_NAME};
use crate::error::DeployResult;

/// 一个本地构建
#[derive(Clone, Debug, PartialEq)]
pub struct LocalArtifact {
    pub built_at: NaiveDateTime,
    pub folder: PathBuf,
    pub image: PathBuf,
}

/// 查找最新的本地构建，目录名不符合时间格式的条目被忽略
pub async fn latest_local_image(artifacts_dir: &Path) -> DeployResult<Option<LocalArtifact>> {
    let mut entries = fs::read_dir(artifacts_dir).await?;
    let mut latest: Option<LocalArtifact> = None;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(built_at) = name
            .to_str()
            .and_then(|n| NaiveDateTime::parse_from_str(n, ARTIFACT_FOLDER_FORMAT).ok())
        else {
            debug!(entry = ?name, "Skipping non-build folder");
            continue;
        };

        if latest.as_ref().map_or(true, |l| built_at > l.built_at) {
            let folder = entry.path();
            latest = Some(LocalArtifact {
                built_at,
                image: folder.join(IMAGE_FILE_NAME),
                folder,
            });
        }
    }

    if let Some(artifact) = &latest {
        info!(built_at = %artifact.built_at, folder = %artifact.folder.display(), "Latest local build");
    }
    Ok(latest)
}

/// 将 `link` 指向该构建的镜像，已存在的文件或链接会被替换
pub async fn activate(artifact: &LocalArtifact, link: &Path) -> DeployResult<()> {
    match fs::symlink_metadata(link).await {
        Ok(_) => fs::remove_file(link).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::symlink(&artifact.image, link).await?;
    info!(image = %artifact.image.display(), link = %link.display(), "Activated build image");
    Ok(())
}
