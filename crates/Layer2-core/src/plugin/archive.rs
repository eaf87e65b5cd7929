//! Plugin archives - 디렉토리 스냅샷과 복원
//!
//! 스냅샷은 tar.gz 바이트로 `plugin_archive`에 저장되고, 디렉토리 해시로
//! 마지막 스냅샷 이후 변경 여부를 판단한다. 복원은 두 가지 레이아웃을 지원한다.
//!
//! - `Snapshot`: 이 모듈이 만든 아카이브. 경로를 그대로 쓴다
//! - `Release`: 원격 저장소 tarball. 최상위 디렉토리를 떼어내고 숨김 파일은
//!   `.htaccess`를 제외하고 건너뛴다

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use plugdeck_foundation::{log_target, Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, info, warn};

/// 숨김 파일 중 릴리스 복원 시 유지하는 이름
const KEPT_HIDDEN_FILE: &str = ".htaccess";

// ============================================================================
// Directory walk / hash / pack
// ============================================================================

/// 디렉토리 아래 일반 파일의 상대 경로 (정렬, '/' 구분)
///
/// 심볼릭 링크는 따라가지 않는다.
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, current: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries =
        fs::read_dir(current).map_err(|e| Error::filesystem("read directory", current, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::filesystem("read directory", current, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| Error::filesystem("stat", &path, e))?;

        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(to_slash(relative));
            }
        }
    }
    Ok(())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 디렉토리 내용 해시 (sha256, 경로 + 내용)
pub fn hash_directory(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    for relative in list_files(dir)? {
        let path = dir.join(&relative);
        let content = fs::read(&path).map_err(|e| Error::filesystem("read", &path, e))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(&content);
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 디렉토리를 메모리 안의 tar.gz로 묶는다
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for relative in list_files(dir)? {
        let path = dir.join(&relative);
        builder
            .append_path_with_name(&path, &relative)
            .map_err(|e| Error::filesystem("archive", &path, e))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::filesystem("archive", dir, e))?;
    encoder
        .finish()
        .map_err(|e| Error::filesystem("compress", dir, e))
}

/// 스냅샷 결과
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    pub hash: String,
    pub archive: Vec<u8>,
    pub files: usize,
}

/// 해시와 아카이브를 함께 만든다
pub fn snapshot_directory(dir: &Path) -> Result<DirectorySnapshot> {
    if !dir.is_dir() {
        return Err(Error::filesystem(
            "snapshot",
            dir,
            "plugin directory is missing",
        ));
    }

    let files = list_files(dir)?.len();
    let hash = hash_directory(dir)?;
    let archive = pack_directory(dir)?;
    debug!(
        target: log_target::PLUGIN,
        dir = %dir.display(),
        files,
        bytes = archive.len(),
        "Packed plugin directory"
    );

    Ok(DirectorySnapshot {
        hash,
        archive,
        files,
    })
}

// ============================================================================
// Reading archives
// ============================================================================

/// 아카이브 레이아웃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLayout {
    /// 직접 만든 스냅샷
    Snapshot,
    /// 원격 릴리스 tarball (`<repo>-<sha>/...`)
    Release,
}

/// 아카이브 안의 파일 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// 플러그인 디렉토리 기준 상대 경로 ('/' 구분)
    pub path: String,
    pub data: Vec<u8>,
}

/// tar.gz 바이트에서 일반 파일만 읽는다
///
/// 절대 경로나 `..`가 포함된 항목은 보안 거부로 처리한다.
pub fn read_entries(bytes: &[u8], layout: ArchiveLayout) -> Result<Vec<ArchiveEntry>> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut entries = Vec::new();

    let iter = archive
        .entries()
        .map_err(|e| Error::filesystem("read archive", "<memory>", e))?;

    for entry in iter {
        let mut entry = entry.map_err(|e| Error::filesystem("read archive", "<memory>", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw = entry
            .path()
            .map_err(|e| Error::filesystem("read archive", "<memory>", e))?
            .into_owned();
        let parts = normalized_parts(&raw)?;

        let parts = match layout {
            ArchiveLayout::Snapshot => parts,
            ArchiveLayout::Release => {
                if parts.len() < 2 {
                    continue;
                }
                parts[1..].to_vec()
            }
        };
        if parts.is_empty() {
            continue;
        }

        if layout == ArchiveLayout::Release {
            let name = parts.last().map(String::as_str).unwrap_or_default();
            if name.starts_with('.') && name != KEPT_HIDDEN_FILE {
                continue;
            }
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::filesystem("read archive", &raw, e))?;

        entries.push(ArchiveEntry {
            path: parts.join("/"),
            data,
        });
    }

    Ok(entries)
}

fn normalized_parts(path: &Path) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                warn!(
                    target: log_target::SECURITY,
                    path = %path.display(),
                    "Archive entry escapes the plugin directory"
                );
                return Err(Error::SecurityRejection(format!(
                    "archive entry '{}' escapes the plugin directory",
                    path.display()
                )));
            }
        }
    }
    Ok(parts)
}

// ============================================================================
// Restore
// ============================================================================

/// 복원 계획
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    pub writes: Vec<ArchiveEntry>,
    /// 현재 있지만 아카이브에 없는 파일 (보존 대상 제외)
    pub removal_candidates: Vec<String>,
}

/// 복원 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub written: Vec<String>,
    pub removal_candidates: Vec<String>,
    /// prune 요청 시 실제로 삭제된 파일
    pub removed: Vec<String>,
}

/// 복원 계획 계산
///
/// - `preserved`: 삭제 후보에서 항상 빠지는 파일 이름 (basename 비교)
/// - `noremove`: 삭제 후보에서 빠지는 하위 디렉토리
pub fn plan_restore(
    target: &Path,
    entries: Vec<ArchiveEntry>,
    preserved: &[String],
    noremove: &[String],
) -> Result<RestorePlan> {
    let incoming: BTreeSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();

    let existing = if target.is_dir() {
        list_files(target)?
    } else {
        Vec::new()
    };

    let removal_candidates = existing
        .into_iter()
        .filter(|path| !incoming.contains(path.as_str()))
        .filter(|path| {
            let name = path.rsplit('/').next().unwrap_or(path);
            !preserved.iter().any(|p| p == name)
        })
        .filter(|path| !in_noremove_dir(path, noremove))
        .collect();

    Ok(RestorePlan {
        writes: entries,
        removal_candidates,
    })
}

fn in_noremove_dir(path: &str, noremove: &[String]) -> bool {
    let parent = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => return false,
    };
    noremove.iter().any(|dir| {
        let dir = dir.trim_matches('/');
        !dir.is_empty() && (parent == dir || parent.starts_with(&format!("{}/", dir)))
    })
}

/// 계획을 디스크에 반영
///
/// 파일은 임시 이름으로 쓴 뒤 rename 한다. 실패 시 임시 파일은 지운다.
pub fn apply_restore(target: &Path, plan: RestorePlan, prune: bool) -> Result<RestoreReport> {
    create_dir(target)?;

    let mut written = Vec::with_capacity(plan.writes.len());
    for entry in plan.writes {
        let path = target.join(&entry.path);
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        write_atomic(&path, &entry.data)?;
        written.push(entry.path);
    }

    let mut removed = Vec::new();
    if prune {
        for relative in &plan.removal_candidates {
            let path = target.join(relative);
            fs::remove_file(&path).map_err(|e| Error::filesystem("remove", &path, e))?;
            removed.push(relative.clone());
        }
    }

    info!(
        target: log_target::PLUGIN,
        dir = %target.display(),
        written = written.len(),
        candidates = plan.removal_candidates.len(),
        removed = removed.len(),
        "Restored plugin files"
    );

    Ok(RestoreReport {
        written,
        removal_candidates: plan.removal_candidates,
        removed,
    })
}

fn create_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path).map_err(|e| {
        Error::filesystem(
            "create directory",
            path,
            format!("Unable to create directory: {}", e),
        )
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::filesystem("write", path, e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::filesystem("write", path, e));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".plugdeck-tmp");
    path.with_file_name(name)
}
