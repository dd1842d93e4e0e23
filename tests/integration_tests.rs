use relwatch::{
    fetch_latest_release, CodebergProvider, EffectiveSettings, FetchError, GitHubProvider,
    GlobalSettings, ReleaseChannel, RepoOverrides, RepoRef,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_releases_json() -> serde_json::Value {
    serde_json::json!([
        {
            "id": 4,
            "tag_name": "v2.0.0",
            "name": "Version 2.0.0",
            "body": "Latest stable release",
            "prerelease": false,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v2.0.0",
            "published_at": "2024-03-15T10:00:00Z"
        },
        {
            "id": 3,
            "tag_name": "v2.1.0-beta.1",
            "name": "Version 2.1.0 Beta 1",
            "body": "Latest prerelease",
            "prerelease": true,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v2.1.0-beta.1",
            "published_at": "2024-03-20T10:00:00Z"
        },
        {
            "id": 1,
            "tag_name": "v1.0.0",
            "name": "Version 1.0.0",
            "body": "First stable release",
            "prerelease": false,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v1.0.0",
            "published_at": "2024-01-01T10:00:00Z"
        },
        {
            "id": 5,
            "tag_name": "v3.0.0-draft",
            "name": "Draft Release",
            "body": "Draft release - should be filtered",
            "prerelease": false,
            "draft": true,
            "html_url": "https://github.com/test/repo/releases/tag/v3.0.0-draft",
            "published_at": "2024-04-01T10:00:00Z"
        }
    ])
}

fn github(server: &MockServer) -> GitHubProvider {
    GitHubProvider::new(reqwest::Client::new(), None)
        .with_base_url(server.uri())
        .unwrap()
}

fn repo() -> RepoRef {
    RepoRef::parse("https://github.com/test/repo").unwrap()
}

fn settings(f: impl FnOnce(&mut GlobalSettings)) -> EffectiveSettings {
    let mut global = GlobalSettings::default();
    f(&mut global);
    EffectiveSettings::resolve(&global, None)
}

async fn mount_releases(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_latest_release_stable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("Accept", "application/vnd.github+json"))
        .and(query_param("per_page", "30"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_releases_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    let release = outcome.result.unwrap();
    assert_eq!(release.tag_name, "v2.0.0");
    assert!(!release.prerelease);
    assert!(!release.draft);
}

#[tokio::test]
async fn test_prerelease_channel_includes_keyword_prereleases() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, mock_releases_json()).await;

    let settings = settings(|s| {
        s.release_channels = vec![ReleaseChannel::Stable, ReleaseChannel::Prerelease];
    });
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    assert_eq!(outcome.result.unwrap().tag_name, "v2.1.0-beta.1");
}

#[tokio::test]
async fn test_sub_channel_allow_list_restricts_prereleases() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, mock_releases_json()).await;

    let settings = settings(|s| {
        s.release_channels = vec![ReleaseChannel::Stable, ReleaseChannel::Prerelease];
        s.prerelease_sub_channels = vec!["rc".to_string()];
    });
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    assert_eq!(outcome.result.unwrap().tag_name, "v2.0.0");
}

#[tokio::test]
async fn test_draft_channel_selects_draft() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, mock_releases_json()).await;

    let settings = settings(|s| s.release_channels = vec![ReleaseChannel::Draft]);
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    assert_eq!(outcome.result.unwrap().tag_name, "v3.0.0-draft");
}

#[tokio::test]
async fn test_include_and_exclude_patterns() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, mock_releases_json()).await;

    let global = GlobalSettings::default();
    let overrides = RepoOverrides {
        include_regex: Some("^v".to_string()),
        exclude_regex: Some("v2".to_string()),
        ..RepoOverrides::default()
    };
    let settings = EffectiveSettings::resolve(&global, Some(&overrides));
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    assert_eq!(outcome.result.unwrap().tag_name, "v1.0.0");
    assert!(settings.is_customized);
}

#[tokio::test]
async fn test_no_matching_releases() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, mock_releases_json()).await;

    let settings = settings(|s| s.include_regex = Some("^release-".to_string()));
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    assert_eq!(outcome.result, Err(FetchError::NoMatchingReleases));
    assert!(outcome.etag.is_none());
}

#[tokio::test]
async fn test_token_is_sent_in_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_releases_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = GitHubProvider::new(reqwest::Client::new(), Some("test-token".to_string()))
        .with_base_url(mock_server.uri())
        .unwrap();
    let outcome = fetch_latest_release(&provider, &repo(), &settings(|_| {}), None).await;

    assert!(outcome.result.is_ok());
}

#[tokio::test]
async fn test_api_error_handling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    let Err(FetchError::ApiError { status, message }) = outcome.result else {
        panic!("Expected ApiError");
    };
    assert_eq!(status, Some(500));
    assert_eq!(message, "boom");
}

#[tokio::test]
async fn test_status_mapping() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/missing/repo/releases"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1700000000"),
        )
        .mount(&mock_server)
        .await;

    let provider = github(&mock_server);
    let missing = RepoRef::parse("missing/repo").unwrap();

    let outcome = fetch_latest_release(&provider, &missing, &settings(|_| {}), None).await;
    assert_eq!(outcome.result, Err(FetchError::RepoNotFound));

    let outcome = fetch_latest_release(&provider, &repo(), &settings(|_| {}), None).await;
    assert_eq!(outcome.result, Err(FetchError::RateLimit));
}

#[tokio::test]
async fn test_etag_round_trip() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("If-None-Match", "\"abc\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"abc\"")
                .set_body_json(mock_releases_json()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = github(&mock_server);

    let first = fetch_latest_release(&provider, &repo(), &settings(|_| {}), None).await;
    assert_eq!(first.etag.as_deref(), Some("\"abc\""));

    let second = fetch_latest_release(&provider, &repo(), &settings(|_| {}), Some("\"abc\"")).await;
    assert_eq!(second.result, Err(FetchError::NotModified));
    assert_eq!(second.etag.as_deref(), Some("\"abc\""));
}

fn release_page(count: usize, offset: usize) -> serde_json::Value {
    let releases: Vec<_> = (0..count)
        .map(|i| {
            let n = offset + i;
            serde_json::json!({
                "id": n + 1,
                "tag_name": format!("v0.{n}.0"),
                "name": null,
                "body": "notes",
                "html_url": format!("https://github.com/test/repo/releases/tag/v0.{n}.0"),
                "published_at": "2024-01-01T10:00:00Z"
            })
        })
        .collect();
    serde_json::Value::Array(releases)
}

#[tokio::test]
async fn test_pagination_requests_ceil_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"first\"")
                .set_body_json(release_page(100, 0)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(query_param("page", "2"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"second\"")
                .set_body_json(release_page(100, 100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let settings = settings(|s| s.releases_per_page = 150);
    let outcome = fetch_latest_release(&github(&mock_server), &repo(), &settings, None).await;

    // Equal timestamps keep the forge order.
    assert_eq!(outcome.result.unwrap().tag_name, "v0.0.0");
    assert_eq!(outcome.etag.as_deref(), Some("\"first\""));
}

#[tokio::test]
async fn test_empty_releases_fall_back_to_tag_commit() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, serde_json::json!([])).await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "v0.1.0", "commit": { "sha": "abc123" } }
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/git/ref/tags/v0.1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": { "type": "commit", "sha": "abc123" }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/commits/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "commit": {
                "message": "Initial public version",
                "committer": { "date": "2024-02-01T08:00:00Z" }
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    let release = outcome.result.unwrap();
    assert_eq!(release.id, 0);
    assert_eq!(release.tag_name, "v0.1.0");
    assert_eq!(release.body.as_deref(), Some("Initial public version"));
    assert_eq!(release.html_url, "https://github.com/test/repo/releases/tag/v0.1.0");
    assert!(!release.prerelease && !release.draft);
}

#[tokio::test]
async fn test_annotated_tag_message_preferred() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, serde_json::json!([])).await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "v0.2.0", "commit": { "sha": "def456" } }
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/git/ref/tags/v0.2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": { "type": "tag", "sha": "tagobj" }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/git/tags/tagobj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Release 0.2.0\n\n- faster",
            "tagger": { "date": "2024-02-02T08:00:00Z" }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/commits/def456"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    assert_eq!(
        outcome.result.unwrap().body.as_deref(),
        Some("Release 0.2.0\n\n- faster")
    );
}

#[tokio::test]
async fn test_tag_name_is_percent_encoded_in_path() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, serde_json::json!([])).await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "build#7?x%", "commit": { "sha": "def456" } }
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/git/ref/tags/build%237%3Fx%25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": { "type": "tag", "sha": "tagobj" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/git/tags/tagobj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Build 7"
        })))
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    let release = outcome.result.unwrap();
    assert_eq!(release.tag_name, "build#7?x%");
    assert_eq!(release.body.as_deref(), Some("Build 7"));
}

#[tokio::test]
async fn test_no_releases_and_no_tags() {
    let mock_server = MockServer::start().await;
    mount_releases(&mock_server, serde_json::json!([])).await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    assert_eq!(outcome.result, Err(FetchError::NoReleasesFound));
}

#[tokio::test]
async fn test_empty_body_uses_commit_message() {
    let mock_server = MockServer::start().await;
    mount_releases(
        &mock_server,
        serde_json::json!([{
            "id": 9,
            "tag_name": "v5.0.0",
            "name": "v5.0.0",
            "body": "",
            "html_url": "https://github.com/test/repo/releases/tag/v5.0.0",
            "published_at": "2024-05-01T10:00:00Z"
        }]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/commits/v5.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "commit": { "message": "Bump to 5.0.0" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome =
        fetch_latest_release(&github(&mock_server), &repo(), &settings(|_| {}), None).await;

    let release = outcome.result.unwrap();
    assert_eq!(release.id, 9);
    assert_eq!(release.body.as_deref(), Some("Bump to 5.0.0"));
}

fn codeberg(server: &MockServer, token: Option<&str>) -> CodebergProvider {
    CodebergProvider::new(reqwest::Client::new(), token.map(str::to_string))
        .with_base_url(server.uri())
        .unwrap()
}

fn codeberg_repo() -> RepoRef {
    RepoRef::parse("codeberg:test/repo").unwrap()
}

#[tokio::test]
async fn test_codeberg_retries_with_bearer_scheme() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("Authorization", "token secret"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("Authorization", "Bearer secret"))
        .and(query_param("limit", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "id": 7,
            "tag_name": "v1.4.0",
            "name": "1.4.0",
            "body": "Codeberg release",
            "prerelease": false,
            "draft": false,
            "html_url": "https://codeberg.org/test/repo/releases/tag/v1.4.0",
            "published_at": "2024-03-01T10:00:00Z"
        }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome = fetch_latest_release(
        &codeberg(&mock_server, Some("secret")),
        &codeberg_repo(),
        &settings(|_| {}),
        None,
    )
    .await;

    assert_eq!(outcome.result.unwrap().tag_name, "v1.4.0");
}

#[tokio::test]
async fn test_codeberg_page_size_is_capped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;

    let settings = settings(|s| s.releases_per_page = 120);
    let outcome =
        fetch_latest_release(&codeberg(&mock_server, None), &codeberg_repo(), &settings, None)
            .await;

    assert_eq!(outcome.result, Err(FetchError::NoReleasesFound));
}

#[tokio::test]
async fn test_codeberg_disabled_releases_fall_back_to_tags() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "name": "v0.9.0",
            "message": "Annotated notes",
            "commit": { "sha": "aaa", "created": "2024-01-05T00:00:00Z" }
        }])))
        .mount(&mock_server)
        .await;

    let outcome = fetch_latest_release(
        &codeberg(&mock_server, None),
        &codeberg_repo(),
        &settings(|_| {}),
        None,
    )
    .await;

    let release = outcome.result.unwrap();
    assert_eq!(release.tag_name, "v0.9.0");
    assert_eq!(release.body.as_deref(), Some("Annotated notes"));
    assert_eq!(release.html_url, "https://codeberg.org/test/repo/releases/tag/v0.9.0");
}

#[tokio::test]
async fn test_codeberg_missing_repository() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/test/repo"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let outcome = fetch_latest_release(
        &codeberg(&mock_server, None),
        &codeberg_repo(),
        &settings(|_| {}),
        None,
    )
    .await;

    assert_eq!(outcome.result, Err(FetchError::RepoNotFound));
}
