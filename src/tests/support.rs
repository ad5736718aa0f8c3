//! Shared fixtures for the API and database tests.

use std::io::Cursor;

use axum::{
    body::{Body, Bytes},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::auth::{hash_password, issue_token};
use crate::config::AppConfig;
use crate::db;
use crate::server::{build_router, connect_pool};
use crate::state::AppState;
use crate::tasks::TaskContext;
use crate::types::{new_id, Dimensions, FileLocation, MediaFile, NewAlbum, NewUser, User, ROLE_ADMIN, ROLE_USER};

pub const PASSWORD: &str = "correct-horse-battery";
pub const BOUNDARY: &str = "galleria-test-boundary";

/// A router over a throwaway database and storage root. The directory lives as long
/// as the value.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.database.url = format!("sqlite://{}", dir.path().join("galleria.db").display());
        cfg.database.max_connections = 4;
        cfg.storage.root = dir.path().join("static");
        cfg.tasks.enabled = false;
        configure(&mut cfg);

        let pool = connect_pool(&cfg).await.unwrap();
        db::init_db(&pool).await.unwrap();
        let state = AppState::new(pool, cfg);
        state.storage.ensure_dirs().await.unwrap();

        let app = build_router(state.clone());
        Self { app, state, _dir: dir }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub fn task_context(&self) -> TaskContext {
        TaskContext { db: self.state.db.clone(), storage: self.state.storage.clone(), metrics: self.state.metrics.clone() }
    }

    pub async fn create_user(&self, email: &str, first_name: &str, role: &str) -> User {
        let user = NewUser {
            id: new_id(),
            first_name: first_name.to_string(),
            last_name: "Tester".to_string(),
            email: email.to_string(),
            role: role.to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            created_at: crate::types::now_ms(),
        };
        self.state.db.insert_user(&user).await.unwrap();
        self.state.db.get_user_by_id(&user.id).await.unwrap().unwrap()
    }

    pub fn token_for(&self, user: &User) -> String {
        issue_token(&self.state.config.auth, &user.id).unwrap()
    }

    /// An admin account and a token for it.
    pub async fn admin(&self) -> (User, String) {
        let user = self.create_user("admin@example.com", "Ada", ROLE_ADMIN).await;
        let token = self.token_for(&user);
        (user, token)
    }

    /// A regular account and a token for it.
    pub async fn member(&self) -> (User, String) {
        let user = self.create_user("member@example.com", "Max", ROLE_USER).await;
        let token = self.token_for(&user);
        (user, token)
    }

    pub async fn insert_album(&self, name: &str, draft: bool) -> String {
        let now = crate::types::now_ms();
        let album = NewAlbum {
            id: new_id(),
            name: name.to_string(),
            draft,
            hidden: false,
            nsfw: false,
            favorite: false,
            featured: false,
            posted_at: if draft { None } else { Some(now) },
            created_at: now,
        };
        self.state.db.insert_album(&album).await.unwrap();
        album.id
    }

    /// Writes a PNG under `files/` and records it, owned by `album_id`.
    pub async fn insert_file(&self, album_id: Option<&str>, name: &str, created_at: i64) -> MediaFile {
        let bytes = png_bytes(4, 3);
        let path = self.state.storage.file_path(FileLocation::Files, name);
        tokio::fs::write(&path, &bytes).await.unwrap();

        let file = MediaFile {
            id: new_id(),
            name: name.to_string(),
            extname: crate::storage::extname(name),
            format: Some("png".to_string()),
            size: bytes.len() as i64,
            metadata: Some(Dimensions { width: 4, height: 3 }),
            location: FileLocation::Files,
            album_id: album_id.map(str::to_string),
            album: None,
            created_at,
            modified_at: created_at,
        };
        self.state.db.insert_file(&file).await.unwrap();
        file
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// A `multipart/form-data` body with one file field named `file`.
pub fn multipart_body(file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n", file_name).as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn request(method: Method, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match token {
        Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
        None => builder,
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, token).body(Body::empty()).unwrap()
}

pub fn json(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    request(method, uri, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn text(method: Method, uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    request(method, uri, token)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn upload(uri: &str, token: Option<&str>, file_name: &str, data: &[u8]) -> Request<Body> {
    let content_type = mime_guess::from_path(file_name).first_or_octet_stream();
    request(Method::POST, uri, token)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(multipart_body(file_name, content_type.essence_str(), data)))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

/// The `error.message` of an error response.
pub async fn error_message(response: Response) -> String {
    let body = body_json(response).await;
    body["error"]["message"].as_str().unwrap_or_default().to_string()
}
