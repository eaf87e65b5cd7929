//! Remote releases - 원격 저장소에서 플러그인 릴리스 수집
//!
//! `plugin_<name>` 저장소마다 최신 릴리스와 `develop` 브랜치를 읽어
//! `plugin_available`에 저장한다. 이미 저장된 (plugin, published_at, tag)는
//! 다시 받지 않는다.

use super::descriptor::{parse_ini, DESCRIPTOR_FILE};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use plugdeck_foundation::{
    log_target, AvailableRelease, Error, RepositoryConfig, Result, Storage,
};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 플러그인 저장소 이름 접두어
pub const REPO_PREFIX: &str = "plugin_";

/// 개발 브랜치 태그
pub const DEVELOP_TAG: &str = "develop";

const GITHUB_API_VERSION: &str = "2022-11-28";

// ============================================================================
// RepositoryApi
// ============================================================================

/// 원격 저장소 API
///
/// 경로는 base URL 기준이다 (`/users/{user}/repos`).
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    async fn get_json(&self, path: &str) -> Result<Value>;

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>>;
}

/// reqwest 기반 GitHub API 클라이언트
pub struct GithubApi {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl GithubApi {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("plugdeck/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);

        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::RemoteFetch(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(http_error(status, &url, &body))
    }
}

/// HTTP 상태 → 에러
///
/// 403/429는 rate limit으로 분리한다.
fn http_error(status: u16, url: &str, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        403 | 429 => Error::RateLimited(message),
        404 => Error::NotFound(url.to_string()),
        _ => Error::Http(format!("{} returned {}: {}", url, status, message)),
    }
}

#[async_trait]
impl RepositoryApi for GithubApi {
    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.send(path, "application/vnd.github+json").await?;
        response
            .json()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Invalid JSON from {}: {}", path, e)))
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.send(path, "application/octet-stream").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Download failed for {}: {}", path, e)))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// ReleaseFetcher
// ============================================================================

/// 한 번의 수집 결과
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// 발견한 플러그인 저장소
    pub plugins: Vec<String>,
    /// 새로 저장한 (plugin, tag)
    pub updated: usize,
    /// 변경 없음으로 건너뛴 (plugin, tag)
    pub skipped: usize,
    pub elapsed: Duration,
}

/// INFO에서 뽑은 릴리스 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub longname: String,
    pub author: String,
    pub homepage: String,
    pub compat: String,
    pub requires: String,
}

impl ReleaseInfo {
    /// INFO 텍스트 파싱. 파싱 실패 시 빈 값
    pub fn parse(text: &str) -> Self {
        let doc = match parse_ini(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(target: log_target::FETCH, "Unable to parse release INFO: {}", e);
                return Self::default();
            }
        };

        let Some(info) = doc.get("info") else {
            return Self::default();
        };
        let field = |key: &str| info.get(key).cloned().unwrap_or_default();

        Self {
            longname: field("longname"),
            author: field("author"),
            homepage: field("homepage"),
            compat: field("compat"),
            requires: field("requires"),
        }
    }
}

/// 수집할 ref 하나
struct RemoteRef {
    tag: String,
    published_at: String,
    body: String,
}

/// 원격 릴리스 수집기
pub struct ReleaseFetcher {
    storage: Storage,
    api: Arc<dyn RepositoryApi>,
    user: String,
}

impl ReleaseFetcher {
    pub fn new(storage: Storage, api: Arc<dyn RepositoryApi>, user: impl Into<String>) -> Self {
        Self {
            storage,
            api,
            user: user.into(),
        }
    }

    /// 설정으로 GitHub 수집기 생성
    pub fn from_config(storage: Storage, config: &RepositoryConfig) -> Result<Self> {
        let api = GithubApi::new(config)?;
        Ok(Self::new(storage, Arc::new(api), config.user.clone()))
    }

    /// 수집 1회
    ///
    /// 저장소 목록을 못 읽거나 rate limit에 걸리면 이번 회차는 중단한다.
    /// 그 밖의 플러그인별 실패는 경고 후 다음 플러그인으로 넘어간다.
    pub async fn fetch_latest(&self) -> Result<FetchSummary> {
        let start = Instant::now();
        let mut summary = FetchSummary::default();

        let result = self.run(&mut summary).await;
        summary.elapsed = start.elapsed();

        match result {
            Ok(()) => {
                info!(
                    target: log_target::FETCH,
                    "PLUGIN STATS: Time:{:.2} Plugins:{} Updated:{}",
                    summary.elapsed.as_secs_f64(),
                    summary.plugins.len(),
                    summary.updated
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(
                    target: log_target::FETCH,
                    "Plugin release fetch aborted after {:.2} seconds: {}",
                    summary.elapsed.as_secs_f64(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(&self, summary: &mut FetchSummary) -> Result<()> {
        summary.plugins = self.list_plugins().await?;

        for name in summary.plugins.clone() {
            let refs = match self.remote_refs(&name).await {
                Ok(refs) => refs,
                Err(e @ Error::RateLimited(_)) => return Err(e),
                Err(e) => {
                    warn!(target: log_target::FETCH, plugin = %name, "Unable to read releases: {}", e);
                    continue;
                }
            };

            for remote in refs {
                if self
                    .storage
                    .available_release_unchanged(&name, &remote.published_at, &remote.tag)?
                {
                    info!(
                        target: log_target::FETCH,
                        "SKIPPED: Plugin:{}, Tag/Release:{} Skipped as it has not changed",
                        name,
                        remote.tag
                    );
                    summary.skipped += 1;
                    continue;
                }

                let started = Instant::now();
                match self.download(&name, &remote).await {
                    Ok(release) => {
                        self.storage.upsert_available(&release)?;
                        summary.updated += 1;
                        info!(
                            target: log_target::FETCH,
                            "UPDATED: Plugin:{}, Tag/Release:{} Updated in {:.2} seconds.",
                            name,
                            remote.tag,
                            started.elapsed().as_secs_f64()
                        );
                    }
                    Err(e @ Error::RateLimited(_)) => return Err(e),
                    Err(e) => warn!(
                        target: log_target::FETCH,
                        plugin = %name,
                        tag = %remote.tag,
                        "Release download failed: {}",
                        e
                    ),
                }
            }
        }

        Ok(())
    }

    /// `plugin_` 저장소 이름 목록
    async fn list_plugins(&self) -> Result<Vec<String>> {
        let repos = self
            .api
            .get_json(&format!("/users/{}/repos", self.user))
            .await?;

        let repos = repos.as_array().ok_or_else(|| {
            Error::RemoteFetch("Repository listing is not an array".to_string())
        })?;

        let mut plugins: Vec<String> = repos
            .iter()
            .filter_map(|repo| repo.get("name").and_then(Value::as_str))
            .filter_map(|name| name.strip_prefix(REPO_PREFIX))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        plugins.sort();
        plugins.dedup();
        Ok(plugins)
    }

    /// 최신 릴리스 + develop 브랜치
    async fn remote_refs(&self, name: &str) -> Result<Vec<RemoteRef>> {
        let repo = format!("/repos/{}/{}{}", self.user, REPO_PREFIX, name);
        let mut refs = Vec::new();

        let releases = self.api.get_json(&format!("{}/releases", repo)).await?;
        if let Some(latest) = releases.as_array().and_then(|r| r.first()) {
            let tag = latest.get("tag_name").and_then(Value::as_str);
            let published = latest.get("published_at").and_then(Value::as_str);
            if let (Some(tag), Some(published)) = (tag, published) {
                refs.push(RemoteRef {
                    tag: tag.to_string(),
                    published_at: normalize_timestamp(published),
                    body: latest
                        .get("body")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }

        match self.api.get_json(&repo).await {
            Ok(details) => {
                if let Some(pushed) = details.get("pushed_at").and_then(Value::as_str) {
                    refs.push(RemoteRef {
                        tag: DEVELOP_TAG.to_string(),
                        published_at: normalize_timestamp(pushed),
                        body: String::new(),
                    });
                }
            }
            Err(e @ Error::RateLimited(_)) => return Err(e),
            Err(e) => warn!(target: log_target::FETCH, plugin = %name, "No develop branch details: {}", e),
        }

        Ok(refs)
    }

    async fn download(&self, name: &str, remote: &RemoteRef) -> Result<AvailableRelease> {
        let repo = format!("/repos/{}/{}{}", self.user, REPO_PREFIX, name);
        let changelog = self.content(&repo, "CHANGELOG.md", &remote.tag).await?;
        let readme = self.content(&repo, "README.md", &remote.tag).await?;
        let info = self.content(&repo, DESCRIPTOR_FILE, &remote.tag).await?;
        let archive = self
            .api
            .get_bytes(&format!("{}/tarball?ref={}", repo, remote.tag))
            .await?;

        let meta = info
            .as_deref()
            .map(|bytes| ReleaseInfo::parse(&String::from_utf8_lossy(bytes)))
            .unwrap_or_default();

        Ok(AvailableRelease {
            plugin: name.to_string(),
            description: meta.longname,
            author: meta.author,
            webpage: meta.homepage,
            tag_name: remote.tag.clone(),
            published_at: remote.published_at.clone(),
            compat: meta.compat,
            requires: meta.requires,
            body: remote.body.clone(),
            info,
            readme,
            changelog,
            archive: Some(archive),
            last_updated: String::new(),
        })
    }

    /// contents API 파일 (base64). 없으면 None
    async fn content(&self, repo: &str, file: &str, tag: &str) -> Result<Option<Vec<u8>>> {
        let details = match self
            .api
            .get_json(&format!("{}/contents/{}?ref={}", repo, file, tag))
            .await
        {
            Ok(details) => details,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(encoded) = details.get("content").and_then(Value::as_str) else {
            return Ok(None);
        };
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map(Some)
            .map_err(|e| Error::RemoteFetch(format!("Invalid content for {}: {}", file, e)))
    }
}

/// RFC 3339 → `YYYY-MM-DD HH:MM:SS` (UTC). 파싱 실패 시 원문
fn normalize_timestamp(value: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| {
            dt.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeApi {
        json: HashMap<String, Value>,
        bytes: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
        rate_limited: bool,
    }

    #[async_trait]
    impl RepositoryApi for FakeApi {
        async fn get_json(&self, path: &str) -> Result<Value> {
            self.calls.lock().push(path.to_string());
            if self.rate_limited {
                return Err(Error::RateLimited("API rate limit exceeded".into()));
            }
            self.json
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }

        async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
            self.calls.lock().push(path.to_string());
            self.bytes
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }
    }

    fn fake() -> FakeApi {
        let info = "[info]\nname = thold\nlongname = Thresholds\nauthor = The Cacti Group\nhomepage = https://www.cacti.net\ncompat = 1.2.0\nrequires = monitor:>=2.0\n";
        let mut api = FakeApi::default();
        api.json.insert(
            "/users/Cacti/repos".into(),
            json!([{ "name": "plugin_thold" }, { "name": "cacti" }, { "name": "plugin_" }]),
        );
        api.json.insert(
            "/repos/Cacti/plugin_thold/releases".into(),
            json!([
                { "tag_name": "v1.8", "published_at": "2024-05-01T10:00:00Z", "body": "notes" },
                { "tag_name": "v1.7", "published_at": "2023-01-01T00:00:00Z" }
            ]),
        );
        api.json.insert(
            "/repos/Cacti/plugin_thold/contents/INFO?ref=v1.8".into(),
            json!({ "content": STANDARD.encode(info) }),
        );
        api.json.insert(
            "/repos/Cacti/plugin_thold/contents/README.md?ref=v1.8".into(),
            json!({ "content": STANDARD.encode("# Thold") }),
        );
        api.bytes.insert(
            "/repos/Cacti/plugin_thold/tarball?ref=v1.8".into(),
            vec![1, 2, 3],
        );
        api
    }

    #[test]
    fn test_release_info_parse() {
        let info = ReleaseInfo::parse("[info]\ncompat = 1.2.0\nrequires = a b\nauthor = Me\n");
        assert_eq!(info.compat, "1.2.0");
        assert_eq!(info.requires, "a b");
        assert_eq!(info.author, "Me");
        assert_eq!(ReleaseInfo::parse("garbage"), ReleaseInfo::default());
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            http_error(403, "u", r#"{"message":"API rate limit exceeded"}"#),
            Error::RateLimited(m) if m == "API rate limit exceeded"
        ));
        assert!(matches!(http_error(429, "u", ""), Error::RateLimited(_)));
        assert!(matches!(http_error(404, "u", ""), Error::NotFound(_)));
        assert!(matches!(http_error(500, "u", "boom"), Error::Http(_)));
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("2024-05-01T10:00:00Z"),
            "2024-05-01 10:00:00"
        );
        assert_eq!(normalize_timestamp("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn test_fetch_stores_latest_release_then_skips() {
        let storage = Storage::in_memory().unwrap();
        let fetcher = ReleaseFetcher::new(storage.clone(), Arc::new(fake()), "Cacti");

        let summary = fetcher.fetch_latest().await.unwrap();
        assert_eq!(summary.plugins, vec!["thold".to_string()]);
        assert_eq!(summary.updated, 1);

        let release = storage.get_available("thold", "v1.8").unwrap().unwrap();
        assert_eq!(release.description, "Thresholds");
        assert_eq!(release.compat, "1.2.0");
        assert_eq!(release.requires, "monitor:>=2.0");
        assert_eq!(release.published_at, "2024-05-01 10:00:00");
        assert!(release.changelog.is_none());
        assert_eq!(release.archive, Some(vec![1, 2, 3]));

        let again = fetcher.fetch_latest().await.unwrap();
        assert_eq!(again.updated, 0);
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_cycle() {
        let api = FakeApi {
            rate_limited: true,
            ..Default::default()
        };
        let fetcher = ReleaseFetcher::new(Storage::in_memory().unwrap(), Arc::new(api), "Cacti");

        let result = fetcher.fetch_latest().await;
        assert!(matches!(result, Err(Error::RateLimited(_))));
    }
}
