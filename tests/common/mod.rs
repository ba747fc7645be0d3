use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::routing::post;
use axum::{Json, Router};
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use officebridge::auth::jwt::JwtService;
use officebridge::bridge::{BridgeClient, BridgeConfig};
use officebridge::config::{AppConfig, DEFAULT_BRIDGE_EDIT_URL_TEMPLATE};
use officebridge::db::{self, PgPool, MIGRATIONS};
use officebridge::models::{
    Document, DownloadLog, NewDocument, NewUserDocumentVersion, UserDocumentVersion,
};
use officebridge::routes;
use officebridge::schema::{documents, download_logs, user_document_versions};
use officebridge::state::AppState;
use officebridge::storage::{document_key, ObjectStorage};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

use diesel_migrations::MigrationHarness;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_puts: AtomicBool,
    fail_presign: AtomicBool,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("bucket unavailable");
        }
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(key.to_string())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        if self.fail_presign.load(Ordering::SeqCst) {
            bail!("signer unavailable");
        }
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

#[allow(dead_code)]
impl FakeStorage {
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }
}

pub const BRIDGE_SECRET: &str = "bridge-test-secret";

#[derive(Default)]
struct BridgeScript {
    replies: HashMap<String, Value>,
    requests: Vec<Value>,
}

/// In-process stand-in for the bridge endpoint. Replies are scripted per action.
#[derive(Clone, Default)]
pub struct FakeBridge {
    script: Arc<Mutex<BridgeScript>>,
}

#[allow(dead_code)]
impl FakeBridge {
    async fn spawn(&self) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new()
            .route("/exec", post(handle_bridge_request))
            .with_state(self.script.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/exec"))
    }

    pub async fn reply(&self, action: &str, body: Value) {
        let mut script = self.script.lock().await;
        script.replies.insert(action.to_string(), body);
    }

    pub async fn requests(&self) -> Vec<Value> {
        self.script.lock().await.requests.clone()
    }

    pub async fn requests_for(&self, action: &str) -> Vec<Value> {
        self.requests()
            .await
            .into_iter()
            .filter(|request| request["action"] == action)
            .collect()
    }
}

async fn handle_bridge_request(
    State(script): State<Arc<Mutex<BridgeScript>>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut script = script.lock().await;
    let action = body["action"].as_str().unwrap_or_default().to_string();
    script.requests.push(body);
    let reply = script
        .replies
        .get(&action)
        .cloned()
        .unwrap_or_else(|| json!({ "error": format!("no scripted reply for {action}") }));
    Json(reply)
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    bridge: FakeBridge,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::build(true).await
    }

    pub async fn without_bridge() -> Result<Self> {
        Self::build(false).await
    }

    async fn build(with_bridge: bool) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let bridge = FakeBridge::default();
        let bridge_endpoint = if with_bridge {
            Some(bridge.spawn().await?)
        } else {
            None
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            bridge_endpoint,
            bridge_secret: Some(BRIDGE_SECRET.to_string()),
            bridge_timeout_seconds: 5,
            bridge_edit_url_template: DEFAULT_BRIDGE_EDIT_URL_TEMPLATE.to_string(),
            signed_url_ttl_seconds: 600,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let bridge_client = BridgeClient::new(BridgeConfig::from_app_config(&config))?;
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, bridge_client, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            bridge,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub fn bridge(&self) -> &FakeBridge {
        &self.bridge
    }

    pub fn token_for(&self, user_id: Uuid, role: &str) -> Result<String> {
        self.state.jwt.generate_token(user_id, role)
    }

    /// Inserts a document row and stores its bytes, bypassing the upload endpoint.
    pub async fn insert_document(&self, seed: DocumentSeed) -> Result<Document> {
        let id = Uuid::new_v4();
        let file_name = format!("{}.{}", seed.title.to_lowercase().replace(' ', "-"), seed.file_type);
        let file_path = document_key(id, &file_name);
        self.storage
            .put_object(&file_path, seed.bytes.clone(), None, None)
            .await?;

        let row = NewDocument {
            id,
            title: seed.title,
            description: seed.description,
            category: seed.category,
            tags: seed.tags,
            file_name,
            file_path,
            file_size: seed.bytes.len() as i64,
            mime_type: None,
            file_type: seed.file_type,
            checksum: String::new(),
            parent_document_id: seed.parent,
            is_featured: seed.is_featured,
            searchable_content: seed.searchable_content,
            uploaded_by: Uuid::new_v4(),
        };

        self.with_conn(move |conn| {
            let document = diesel::insert_into(documents::table)
                .values(&row)
                .get_result::<Document>(conn)
                .context("failed to insert document")?;
            Ok(document)
        })
        .await
    }

    pub async fn set_created_at(&self, document_id: Uuid, created_at: NaiveDateTime) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::update(documents::table.find(document_id))
                .set(documents::created_at.eq(created_at))
                .execute(conn)
                .context("failed to backdate document")?;
            Ok(())
        })
        .await
    }

    pub async fn set_template_id(&self, document_id: Uuid, template_id: &str) -> Result<()> {
        let template_id = template_id.to_string();
        self.with_conn(move |conn| {
            diesel::update(documents::table.find(document_id))
                .set(documents::template_id.eq(Some(template_id)))
                .execute(conn)
                .context("failed to set template id")?;
            Ok(())
        })
        .await
    }

    pub async fn find_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        self.with_conn(move |conn| {
            Ok(documents::table
                .find(document_id)
                .first::<Document>(conn)
                .optional()?)
        })
        .await
    }

    /// A draft version as a session would leave it, optionally without a bridge file.
    pub async fn insert_draft(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        bridge_file_id: Option<&str>,
    ) -> Result<UserDocumentVersion> {
        let row = NewUserDocumentVersion {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            version_number: 1,
            version_label: None,
            file_type: "docx".to_string(),
            content_html: None,
            pdf_annotations: None,
            is_draft: true,
            bridge_file_id: bridge_file_id.map(str::to_string),
            bridge_edit_url: None,
        };
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(user_document_versions::table)
                .values(&row)
                .get_result::<UserDocumentVersion>(conn)
                .context("failed to insert draft")?)
        })
        .await
    }

    pub async fn find_version(&self, version_id: Uuid) -> Result<Option<UserDocumentVersion>> {
        self.with_conn(move |conn| {
            Ok(user_document_versions::table
                .find(version_id)
                .first::<UserDocumentVersion>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn download_logs(&self, document_id: Uuid) -> Result<Vec<DownloadLog>> {
        self.with_conn(move |conn| {
            Ok(download_logs::table
                .filter(download_logs::document_id.eq(document_id))
                .load::<DownloadLog>(conn)?)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    /// Multipart upload with a `file` part plus plain text fields.
    pub async fn post_multipart(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        fields: &[(&str, &str)],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Runs `f` on a pooled connection off the async runtime.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

#[derive(Clone)]
pub struct DocumentSeed {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub file_type: String,
    pub parent: Option<Uuid>,
    pub is_featured: bool,
    pub searchable_content: Option<String>,
    pub bytes: Vec<u8>,
}

#[allow(dead_code)]
impl DocumentSeed {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            category: None,
            tags: Vec::new(),
            file_type: "docx".to_string(),
            parent: None,
            is_featured: false,
            searchable_content: None,
            bytes: b"PK\x03\x04 office bytes".to_vec(),
        }
    }

    pub fn child_of(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn file_type(mut self, file_type: &str) -> Self {
        self.file_type = file_type.to_string();
        self
    }

    pub fn featured(mut self) -> Self {
        self.is_featured = true;
        self
    }

    pub fn searchable(mut self, content: &str) -> Self {
        self.searchable_content = Some(content.to_string());
        self
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE download_logs, user_document_versions, documents RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
