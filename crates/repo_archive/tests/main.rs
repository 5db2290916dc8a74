use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{
        HeaderMap, Response, StatusCode,
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    routing::get,
    serve,
};
use chrono::Utc;
use futures::{StreamExt, stream};
use repo_archive::{
    AcquireRequest, AcquisitionErrorKind, AcquisitionStatus, AcquisitionTracker, ArchiveDownloader,
    ArchiveExtractor, ArchiveFormat, ArchiveUrlResolver, BearerTokenMiddleware, CancellationToken,
    ExpiringAccessGuard,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tempfile::{TempDir, tempdir};
use tokio::{net::TcpListener, sync::Notify};
use url::Url;
use zip::write::SimpleFileOptions;

const ZIP_ROUTE: &str = "/acme/demo/archive/refs/heads/main.zip";
const TAR_ROUTE: &str = "/acme/demo/archive/refs/heads/main.tar.gz";

fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in files {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

fn tar_gz_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// The archive layout hosting services produce: one wrapper folder holding
/// the repository root.
fn demo_archive() -> Vec<u8> {
    zip_bytes(&[
        ("demo-main/", ""),
        ("demo-main/README.md", "# demo\n"),
        ("demo-main/src/", ""),
        ("demo-main/src/main.rs", "fn main() {}\n"),
    ])
}

fn archive_response(body: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

fn serve_bytes(route: &str, body: Vec<u8>) -> Router {
    Router::new().route(
        route,
        get(move || {
            let body = body.clone();
            async move { archive_response(body) }
        }),
    )
}

struct TestHttpServer {
    url: Url,
}

impl TestHttpServer {
    async fn spawn(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();

        let server = serve(listener, router);
        tokio::spawn(async move {
            let _ = server.await;
        });

        Self { url }
    }

    /// Reference to the `acme/demo` repository on this server.
    fn repository(&self) -> String {
        self.url.join("acme/demo").unwrap().to_string()
    }
}

/// Workspace of a single test: the downloader's temp directory and the
/// directory destinations are created in.
struct Workspace {
    temp: TempDir,
    output: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            temp: tempdir().unwrap(),
            output: tempdir().unwrap(),
        }
    }

    fn destination(&self) -> PathBuf {
        self.output.path().join("demo")
    }

    fn tracker(&self) -> AcquisitionTracker {
        self.tracker_with(ClientBuilder::new(reqwest::Client::new()).build(), ArchiveFormat::Zip)
    }

    fn tracker_with(&self, client: ClientWithMiddleware, format: ArchiveFormat) -> AcquisitionTracker {
        AcquisitionTracker::new(
            ArchiveUrlResolver::default()
                .with_host_marker("127.0.0.1")
                .with_format(format),
            ArchiveDownloader::new(client).with_temp_dir(self.temp.path()),
            ArchiveExtractor::default(),
        )
    }

    fn assert_no_temporaries(&self) {
        assert!(
            entries(self.temp.path()).is_empty(),
            "leaked temporary files: {:?}",
            entries(self.temp.path())
        );
        let scratch: Vec<_> = entries(self.output.path())
            .into_iter()
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(scratch.is_empty(), "leaked scratch directories: {scratch:?}");
    }
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs_err::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn acquires_repository_without_wrapper_folder() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker();

    let attempt = tracker
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.status(), AcquisitionStatus::Completed, "{attempt:?}");
    assert!(attempt.completed_at().is_some());
    assert!(attempt.error_message().is_none());
    assert_eq!(entries(&workspace.destination()), ["README.md", "src"]);
    assert_eq!(
        attempt.content_root().unwrap().entries(),
        ["README.md", "src"]
    );
    assert_eq!(
        fs_err::read_to_string(workspace.destination().join("src/main.rs")).unwrap(),
        "fn main() {}\n"
    );
    assert_eq!(
        tracker.status(&workspace.destination()),
        AcquisitionStatus::NotStarted
    );
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn reacquiring_replaces_previous_contents() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker();

    fs_err::create_dir_all(workspace.destination().join("old")).unwrap();
    fs_err::write(workspace.destination().join("notes.txt"), "unrelated").unwrap();

    for _ in 0..2 {
        let attempt = tracker
            .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
            .await
            .unwrap();
        assert!(attempt.is_success(), "{attempt:?}");
        assert_eq!(entries(&workspace.destination()), ["README.md", "src"]);
    }
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn missing_repository_is_a_network_failure() {
    let router = Router::new().route(ZIP_ROUTE, get(|| async { status_response(StatusCode::NOT_FOUND) }));
    let server = TestHttpServer::spawn(router).await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.status(), AcquisitionStatus::Failed);
    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Network));
    let message = attempt.error_message().unwrap();
    assert!(message.starts_with("could not download the repository archive"), "{message}");
    assert!(message.contains("404"), "{message}");
    assert!(attempt.completed_at().is_none());
    assert!(!workspace.destination().exists());
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let router = Router::new().route(
        ZIP_ROUTE,
        get(|| async { status_response(StatusCode::SERVICE_UNAVAILABLE) }),
    );
    let server = TestHttpServer::spawn(router).await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    let kind = attempt.error_kind().unwrap();
    assert_eq!(kind, AcquisitionErrorKind::Network);
    assert!(kind.is_retryable());
    assert!(attempt.error_message().unwrap().contains("503"));
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn corrupt_archive_fails_extraction() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, b"<html>not an archive</html>".to_vec())).await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Extraction));
    assert!(!workspace.destination().exists());
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn archive_without_wrapper_folder_is_rejected() {
    let archive = zip_bytes(&[("README.md", "# demo\n"), ("LICENSE", "MIT\n")]);
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, archive)).await;
    let workspace = Workspace::new();

    fs_err::create_dir_all(workspace.destination()).unwrap();
    fs_err::write(workspace.destination().join("keep.txt"), "keep").unwrap();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Extraction));
    insta::assert_snapshot!(
        attempt.error_message().unwrap(),
        @"could not extract the repository archive: the archive had 2 top-level entries (LICENSE, README.md) instead of a single folder"
    );
    assert_eq!(entries(&workspace.destination()), ["keep.txt"]);
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn acquires_tarballs() {
    let archive = tar_gz_bytes(&[
        ("demo-main/README.md", "# demo\n"),
        ("demo-main/Cargo.toml", "[package]\n"),
    ]);
    let server = TestHttpServer::spawn(serve_bytes(TAR_ROUTE, archive)).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker_with(
        ClientBuilder::new(reqwest::Client::new()).build(),
        ArchiveFormat::TarGz,
    );

    let attempt = tracker
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert!(attempt.is_success(), "{attempt:?}");
    assert_eq!(entries(&workspace.destination()), ["Cargo.toml", "README.md"]);
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn explicit_branch_is_fetched() {
    let archive = zip_bytes(&[("demo-develop/CHANGELOG.md", "unreleased\n")]);
    let server = TestHttpServer::spawn(serve_bytes(
        "/acme/demo/archive/refs/heads/develop.zip",
        archive,
    ))
    .await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()).with_ref("develop"))
        .await
        .unwrap();

    assert!(attempt.is_success(), "{attempt:?}");
    assert_eq!(entries(&workspace.destination()), ["CHANGELOG.md"]);
}

#[tokio::test]
async fn second_acquisition_into_the_same_destination_is_busy() {
    let arrived = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let router = Router::new().route(
        ZIP_ROUTE,
        get({
            let arrived = arrived.clone();
            let release = release.clone();
            move || {
                let arrived = arrived.clone();
                let release = release.clone();
                async move {
                    arrived.notify_one();
                    release.notified().await;
                    archive_response(demo_archive())
                }
            }
        }),
    );
    let server = TestHttpServer::spawn(router).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker();

    let first = tokio::spawn({
        let tracker = tracker.clone();
        let request = AcquireRequest::new(server.repository(), workspace.destination());
        async move { tracker.acquire(request).await }
    });
    arrived.notified().await;

    assert_eq!(
        tracker.status(&workspace.destination()),
        AcquisitionStatus::InProgress
    );
    let busy = tracker
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap_err();
    assert_eq!(busy.kind(), AcquisitionErrorKind::Busy);
    assert!(busy.kind().is_retryable());

    release.notify_one();
    let attempt = first.await.unwrap().unwrap();
    assert_eq!(attempt.status(), AcquisitionStatus::Completed);
    assert_eq!(entries(&workspace.destination()), ["README.md", "src"]);
    assert_eq!(
        tracker.status(&workspace.destination()),
        AcquisitionStatus::NotStarted
    );
}

#[tokio::test]
async fn different_destinations_run_concurrently() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker();

    let first = workspace.output.path().join("first");
    let second = workspace.output.path().join("second");
    let (a, b) = tokio::join!(
        tracker.acquire(AcquireRequest::new(server.repository(), &first)),
        tracker.acquire(AcquireRequest::new(server.repository(), &second)),
    );

    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert_eq!(entries(&first), ["README.md", "src"]);
    assert_eq!(entries(&second), ["README.md", "src"]);
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn cancelling_mid_download_removes_the_partial_file() {
    let arrived = Arc::new(Notify::new());
    let router = Router::new().route(
        ZIP_ROUTE,
        get({
            let arrived = arrived.clone();
            move || {
                let arrived = arrived.clone();
                async move {
                    arrived.notify_one();
                    let first = stream::once(async {
                        Ok::<_, std::io::Error>(Bytes::from_static(b"PK\x03\x04partial"))
                    });
                    Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::from_stream(first.chain(stream::pending())))
                        .unwrap()
                }
            }
        }),
    );
    let server = TestHttpServer::spawn(router).await;
    let workspace = Workspace::new();
    let tracker = workspace.tracker();
    let cancel = CancellationToken::new();

    let acquisition = tokio::spawn({
        let tracker = tracker.clone();
        let request = AcquireRequest::new(server.repository(), workspace.destination())
            .with_cancellation(cancel.clone());
        async move { tracker.acquire(request).await }
    });
    arrived.notified().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let attempt = tokio::time::timeout(Duration::from_secs(10), acquisition)
        .await
        .expect("cancellation should end the acquisition")
        .unwrap()
        .unwrap();

    assert_eq!(attempt.status(), AcquisitionStatus::Failed);
    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Cancelled));
    assert!(!workspace.destination().exists());
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn expired_access_grant_is_access_denied() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();
    let guard = Arc::new(ExpiringAccessGuard::new(Utc::now() - chrono::Duration::minutes(5)));

    let attempt = workspace
        .tracker()
        .acquire(
            AcquireRequest::new(server.repository(), workspace.destination())
                .with_guard(guard.clone()),
        )
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::AccessDenied));
    assert_eq!(guard.active_scopes(), 0);
    assert!(!workspace.destination().exists());
}

#[tokio::test]
async fn valid_access_grant_is_released_after_acquisition() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();
    let guard = Arc::new(ExpiringAccessGuard::new(Utc::now() + chrono::Duration::hours(1)));

    let attempt = workspace
        .tracker()
        .acquire(
            AcquireRequest::new(server.repository(), workspace.destination())
                .with_guard(guard.clone()),
        )
        .await
        .unwrap();

    assert!(attempt.is_success(), "{attempt:?}");
    assert_eq!(guard.active_scopes(), 0);
}

fn token_router() -> Router {
    Router::new().route(
        ZIP_ROUTE,
        get(|headers: HeaderMap| async move {
            match headers.get(AUTHORIZATION) {
                Some(value) if value == "Bearer secret" => archive_response(demo_archive()),
                _ => status_response(StatusCode::FORBIDDEN),
            }
        }),
    )
}

#[tokio::test]
async fn bearer_token_is_attached_by_middleware() {
    let server = TestHttpServer::spawn(token_router()).await;
    let workspace = Workspace::new();
    let client = ClientBuilder::new(reqwest::Client::new())
        .with(BearerTokenMiddleware::new("secret").unwrap())
        .build();

    let attempt = workspace
        .tracker_with(client, ArchiveFormat::Zip)
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert!(attempt.is_success(), "{attempt:?}");
}

#[tokio::test]
async fn private_repository_without_token_is_forbidden() {
    let server = TestHttpServer::spawn(token_router()).await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Network));
    assert!(attempt.error_message().unwrap().contains("403"));
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn unresponsive_server_times_out_as_network_failure() {
    let router = Router::new().route(
        ZIP_ROUTE,
        get(|| async {
            std::future::pending::<()>().await;
            status_response(StatusCode::OK)
        }),
    );
    let server = TestHttpServer::spawn(router).await;
    let workspace = Workspace::new();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let attempt = workspace
        .tracker_with(ClientBuilder::new(client).build(), ArchiveFormat::Zip)
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::Network));
    let message = attempt.error_message().unwrap();
    assert!(message.contains("timed out"), "{message}");
    assert!(!message.contains("may not exist"), "{message}");
    assert!(!workspace.destination().exists());
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn unsupported_host_is_reference_invalid() {
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(
            "https://example.com/acme/demo",
            workspace.destination(),
        ))
        .await
        .unwrap();

    assert_eq!(attempt.error_kind(), Some(AcquisitionErrorKind::ReferenceInvalid));
    assert!(!attempt.error_kind().unwrap().is_retryable());
    workspace.assert_no_temporaries();
}

#[tokio::test]
async fn attempts_serialize_for_persistence() {
    let server = TestHttpServer::spawn(serve_bytes(ZIP_ROUTE, demo_archive())).await;
    let workspace = Workspace::new();

    let attempt = workspace
        .tracker()
        .acquire(AcquireRequest::new(server.repository(), workspace.destination()))
        .await
        .unwrap();

    let json = serde_json::to_value(&attempt).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(
        json["content-root"]["entries"],
        serde_json::json!(["README.md", "src"])
    );
    assert!(json.get("error-message").is_none());
}
