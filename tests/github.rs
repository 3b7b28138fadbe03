use std::fs;
use std::io::{Cursor, Write};
use std::time::Duration;

use flutter_workspace::download::Fetcher;
use flutter_workspace::github::{ArtifactQuery, Github, GithubError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        zip.start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn client(server: &MockServer, tmp: &std::path::Path) -> Github {
    Github::new(
        Fetcher::new(1, Duration::from_millis(0)),
        "secret",
        tmp.to_path_buf(),
    )
    .with_api(server.uri())
}

#[tokio::test]
async fn latest_successful_run_is_unpacked() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/meta-flutter/workspace-automation/actions/workflows/agl.yml/runs"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "workflow_runs": [
                {"id": 30, "conclusion": null},
                {"id": 20, "conclusion": "failure"},
                {"id": 10, "conclusion": "success"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/meta-flutter/workspace-automation/actions/runs/10/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artifacts": [
                {"id": 1, "name": "agl-image", "archive_download_url": format!("{}/download/1", server.uri())},
                {"id": 2, "name": "sdk", "archive_download_url": format!("{}/download/2", server.uri())}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/1"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_bytes(&[("image/core.ext4", "ext4"), ("README", "hi")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let github = client(&server, tmp.path());
    let dest_dir = dest.path().to_path_buf();

    let unpacked = tokio::task::spawn_blocking(move || {
        let names = vec!["agl-image".to_string(), "not-built".to_string()];
        let query = ArtifactQuery {
            owner: "meta-flutter",
            repo: "workspace-automation",
            workflow: "agl.yml",
            artifact_names: &names,
        };
        github.resolve_and_fetch(&query, &dest_dir)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        unpacked,
        vec![dest.path().join("README"), dest.path().join("image")]
    );
    assert_eq!(
        fs::read_to_string(dest.path().join("image/core.ext4")).unwrap(),
        "ext4"
    );
    assert!(!tmp.path().join("agl-image.zip").exists());
}

#[tokio::test]
async fn api_message_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/actions/workflows/w.yml/runs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Bad credentials",
            "documentation_url": "https://docs.github.com/rest"
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let github = client(&server, tmp.path());
    let err = tokio::task::spawn_blocking(move || github.workflow_runs("o", "r", "w.yml"))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(&err, GithubError::Api(m) if m == "Bad credentials"));
    assert_eq!(err.to_string(), "GitHub message: Bad credentials");
}

#[tokio::test]
async fn no_successful_run_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/actions/workflows/w.yml/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [{"id": 5, "conclusion": "cancelled"}]
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let github = client(&server, tmp.path());
    let dest = tmp.path().join("out");

    let err = tokio::task::spawn_blocking(move || {
        let names = vec!["x".to_string()];
        let query = ArtifactQuery {
            owner: "o",
            repo: "r",
            workflow: "w.yml",
            artifact_names: &names,
        };
        github.resolve_and_fetch(&query, &dest)
    })
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, GithubError::NoSuccessfulRun { .. }));
}
