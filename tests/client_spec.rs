use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use project_sync::error::SyncError;
use project_sync::models::ProjectModel;
use project_sync::services::{ClientError, HttpProjectService, ProjectService};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<String>>>,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl Seen {
    fn record(&self, method: &str, path: &str, headers: &HeaderMap) {
        self.requests.lock().push(format!("{} {}", method, path));
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.tokens.lock().push(auth.to_string());
        }
    }
}

async fn no_project(State(seen): State<Seen>, headers: HeaderMap) -> Json<Value> {
    seen.record("GET", "", &headers);
    Json(json!({"project": null}))
}

async fn open_project(
    State(seen): State<Seen>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    seen.record("GET", &path, &headers);
    match path.as_str() {
        "missing" => (StatusCode::NOT_FOUND, "no project here").into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => Json(json!({
            "project": {
                "name": "banana",
                "path": path,
                "environment": "banana",
                "version": "1.0.0"
            }
        }))
        .into_response(),
    }
}

async fn create_project(
    State(seen): State<Seen>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Response {
    seen.record("POST", &path, &headers);
    if params.get("name").is_none() {
        return (StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    let name = params["name"].as_str().unwrap_or_default();
    Json(json!({"project": {"name": name, "path": format!("{}/{}", path, name)}})).into_response()
}

async fn delete_project(
    State(seen): State<Seen>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    seen.record("DELETE", &path, &headers);
    if path == "work/banana" {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn serve(token: Option<&str>) -> (HttpProjectService, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/api/projects", get(no_project))
        .route(
            "/api/projects/{*path}",
            get(open_project).post(create_project).delete(delete_project),
        )
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let service = HttpProjectService::new(
        format!("http://{}/api/", addr),
        token.map(str::to_string),
    );
    (service, seen)
}

mod open {
    use super::*;

    #[tokio::test]
    async fn returns_the_project_with_extra_keys() {
        let (service, seen) = serve(None).await;

        let project = service.open("work/banana").await.unwrap().unwrap();

        assert_eq!(project.name, "banana");
        assert_eq!(project.path, "work/banana");
        assert_eq!(project.environment.as_deref(), Some("banana"));
        assert_eq!(project.extra["version"], json!("1.0.0"));
        assert_eq!(*seen.requests.lock(), vec!["GET work/banana".to_string()]);
    }

    #[tokio::test]
    async fn empty_path_means_no_project() {
        let (service, seen) = serve(None).await;

        assert!(service.open("").await.unwrap().is_none());
        assert_eq!(*seen.requests.lock(), vec!["GET ".to_string()]);
    }

    #[tokio::test]
    async fn encodes_path_segments() {
        let (service, seen) = serve(None).await;

        let project = service.open("work/my project#1").await.unwrap().unwrap();

        assert_eq!(project.path, "work/my project#1");
        assert_eq!(*seen.requests.lock(), vec!["GET work/my project#1".to_string()]);
    }

    #[tokio::test]
    async fn keeps_backslashes_inside_their_segment() {
        let (service, seen) = serve(None).await;

        let project = service.open(r"work/a\b").await.unwrap().unwrap();

        assert_eq!(project.path, r"work/a\b");
        assert_eq!(*seen.requests.lock(), vec![r"GET work/a\b".to_string()]);
    }

    #[tokio::test]
    async fn maps_not_found() {
        let (service, _seen) = serve(None).await;

        let err = service.open("missing").await.unwrap_err();

        assert!(matches!(err, SyncError::Service(ClientError::NotFound(ref body)) if body == "no project here"));
    }

    #[tokio::test]
    async fn maps_server_errors() {
        let (service, _seen) = serve(None).await;

        let err = service.open("broken").await.unwrap_err();

        assert!(matches!(err, SyncError::Service(ClientError::Server(_))));
    }

    #[tokio::test]
    async fn sends_the_bearer_token() {
        let (service, seen) = serve(Some("s3cret")).await;

        service.open("work/banana").await.unwrap();

        assert_eq!(*seen.tokens.lock(), vec!["Bearer s3cret".to_string()]);
    }
}

mod create_and_delete {
    use super::*;

    #[tokio::test]
    async fn create_posts_the_template_parameters() {
        let (service, seen) = serve(None).await;

        let project = service.create("work", &json!({"name": "cherry"})).await.unwrap();

        assert_eq!(project, ProjectModel::new("cherry", "work/cherry"));
        assert_eq!(*seen.requests.lock(), vec!["POST work".to_string()]);
    }

    #[tokio::test]
    async fn create_maps_bad_requests() {
        let (service, _seen) = serve(None).await;

        let err = service.create("work", &json!({})).await.unwrap_err();

        assert!(matches!(err, SyncError::Service(ClientError::BadRequest(_))));
    }

    #[tokio::test]
    async fn delete_accepts_no_content() {
        let (service, seen) = serve(None).await;

        service.delete("work/banana").await.unwrap();

        assert_eq!(*seen.requests.lock(), vec!["DELETE work/banana".to_string()]);
    }

    #[tokio::test]
    async fn delete_reports_failures() {
        let (service, _seen) = serve(None).await;

        assert!(service.delete("work/apple").await.is_err());
    }
}
