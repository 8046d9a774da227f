//! Backblaze B2 object store
//!
//! Stores objects in one B2 bucket under their object key. Authorization
//! happens once at startup; an expired token is refreshed and the request
//! replayed once. Other retries are left to the caller.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, Response};
use sha1::{Digest, Sha1};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::b2_types::{
    AuthorizeAccountResponse, ListBucketsRequest, ListBucketsResponse, UploadResponse, UploadUrl,
};
use super::errors::{RemoteError, RemoteResult};
use super::ObjectStore;

/// Default B2 API host (production)
pub const B2_DEFAULT_ENDPOINT: &str = "https://api.backblazeb2.com";

/// Authorization path (v3 for nested apiInfo structure)
const AUTHORIZE_PATH: &str = "/b2api/v3/b2_authorize_account";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters for a B2 bucket
#[derive(Clone)]
pub struct B2Settings {
    pub key_id: String,
    pub key: String,
    pub bucket_name: String,
    /// Alternative API host (e.g. a local B2-compatible emulator)
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for B2Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Settings")
            .field("key_id", &self.key_id)
            .field("key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl B2Settings {
    fn authorize_url(&self) -> String {
        let base = self
            .endpoint
            .as_deref()
            .unwrap_or(B2_DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{}{}", base, AUTHORIZE_PATH)
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.key_id, self.key);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    }
}

/// Auth state that can be refreshed
struct AuthState {
    auth_token: String,
    api_url: String,
    download_url: String,
}

/// Object store backed by a B2 bucket
#[derive(Clone)]
pub struct B2Store {
    http_client: Client,
    settings: B2Settings,
    account_id: String,
    auth_state: Arc<RwLock<AuthState>>,
    bucket_id: String,
}

/// Turn a non-success HTTP response into a typed error
async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), &body))
}

async fn request_authorization(
    http_client: &Client,
    settings: &B2Settings,
) -> RemoteResult<AuthorizeAccountResponse> {
    let response = http_client
        .get(settings.authorize_url())
        .header("Authorization", settings.basic_auth_header())
        .send()
        .await?;

    let response = check_status(response).await?;
    Ok(response.json().await?)
}

impl B2Store {
    /// Authorize with B2 and resolve the bucket
    pub async fn authorize(settings: B2Settings) -> RemoteResult<Self> {
        info!(bucket = %settings.bucket_name, "Authorizing with B2 API...");

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Request(format!("Failed to create HTTP client: {}", e)))?;

        let auth = request_authorization(&http_client, &settings).await?;
        let api_url = auth.api_info.storage_api.api_url;
        let download_url = auth.api_info.storage_api.download_url;
        debug!(api_url = %api_url, download_url = %download_url, "B2 authorization successful");

        let mut store = Self {
            http_client,
            settings,
            account_id: auth.account_id,
            auth_state: Arc::new(RwLock::new(AuthState {
                auth_token: auth.authorization_token,
                api_url,
                download_url,
            })),
            bucket_id: String::new(),
        };

        store.bucket_id = store.get_bucket_id().await?;

        info!(
            bucket_name = %store.settings.bucket_name,
            bucket_id = %store.bucket_id,
            "B2 object store ready"
        );
        Ok(store)
    }

    /// Refresh the auth token by re-authorizing with B2
    async fn refresh_auth(&self) -> RemoteResult<()> {
        info!("Refreshing B2 auth token...");

        let auth = request_authorization(&self.http_client, &self.settings).await?;

        let mut state = self.auth_state.write().await;
        state.auth_token = auth.authorization_token;
        state.api_url = auth.api_info.storage_api.api_url;
        state.download_url = auth.api_info.storage_api.download_url;

        info!("B2 auth token refreshed successfully");
        Ok(())
    }

    /// Run a request, refreshing the token and replaying once if it expired
    async fn with_auth_refresh<F, Fut, T>(&self, operation: &str, key: &str, f: F) -> RemoteResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        match f().await {
            Err(RemoteError::AuthExpired) => {
                warn!(operation = operation, key = key, "Auth expired, refreshing token...");
                if let Err(e) = self.refresh_auth().await {
                    error!(error = %e, "Failed to refresh auth token");
                    return Err(e);
                }
                f().await
            }
            other => other,
        }
    }

    /// Look up the bucket ID from the configured bucket name
    async fn get_bucket_id(&self) -> RemoteResult<String> {
        let (api_url, token) = {
            let state = self.auth_state.read().await;
            (state.api_url.clone(), state.auth_token.clone())
        };
        let url = format!("{}/b2api/v2/b2_list_buckets", api_url);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", token)
            .json(&ListBucketsRequest {
                account_id: &self.account_id,
                bucket_name: &self.settings.bucket_name,
            })
            .send()
            .await?;

        let list: ListBucketsResponse = check_status(response).await?.json().await?;

        list.buckets
            .into_iter()
            .find(|b| b.bucket_name == self.settings.bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| {
                RemoteError::NotFound(format!("bucket '{}'", self.settings.bucket_name))
            })
    }

    /// Get an upload URL (valid for 24 hours, one per upload here)
    async fn get_upload_url(&self) -> RemoteResult<UploadUrl> {
        let (api_url, token) = {
            let state = self.auth_state.read().await;
            (state.api_url.clone(), state.auth_token.clone())
        };
        let url = format!("{}/b2api/v2/b2_get_upload_url", api_url);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", token)
            .json(&serde_json::json!({ "bucketId": self.bucket_id }))
            .send()
            .await?;

        let upload_url: UploadUrl = check_status(response).await?.json().await?;
        debug!(url = %upload_url.upload_url, "Got B2 upload URL");
        Ok(upload_url)
    }

    async fn upload_once(&self, key: &str, data: &Bytes) -> RemoteResult<UploadResponse> {
        let upload_url = self.get_upload_url().await?;

        let mut hasher = Sha1::new();
        hasher.update(data);
        let sha1 = format!("{:x}", hasher.finalize());

        let response = self
            .http_client
            .post(&upload_url.upload_url)
            .header("Authorization", &upload_url.authorization_token)
            .header("X-Bz-File-Name", urlencoding::encode(key).as_ref())
            .header("Content-Type", "b2/x-auto")
            .header("X-Bz-Content-Sha1", &sha1)
            .body(data.clone())
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn download_once(&self, key: &str) -> RemoteResult<Bytes> {
        let (download_url, token) = {
            let state = self.auth_state.read().await;
            (state.download_url.clone(), state.auth_token.clone())
        };
        let url = format!(
            "{}/file/{}/{}",
            download_url,
            self.settings.bucket_name,
            urlencoding::encode(key)
        );

        debug!(key = key, url = %url, "Downloading object from B2");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?;

        Ok(check_status(response).await?.bytes().await?)
    }
}

#[async_trait]
impl ObjectStore for B2Store {
    async fn put(&self, key: &str, data: Bytes) -> RemoteResult<String> {
        info!(key = key, size = data.len(), "Uploading object to B2");

        let uploaded = self
            .with_auth_refresh("upload", key, || self.upload_once(key, &data))
            .await?;

        info!(key = %uploaded.file_name, file_id = %uploaded.file_id, "Object uploaded to B2");
        Ok(uploaded.file_name)
    }

    async fn get(&self, key: &str) -> RemoteResult<Bytes> {
        let bytes = self
            .with_auth_refresh("download", key, || self.download_once(key))
            .await?;

        info!(key = key, size = bytes.len(), "Downloaded object from B2");
        Ok(bytes)
    }

    fn describe(&self) -> String {
        format!("b2://{}", self.settings.bucket_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::{Mock, MockServer};
    use serde_json::json;

    fn settings(server: &MockServer) -> B2Settings {
        B2Settings {
            key_id: "key-id".to_string(),
            key: "secret".to_string(),
            bucket_name: "files".to_string(),
            endpoint: Some(server.base_url()),
        }
    }

    async fn mock_authorize<'a>(server: &'a MockServer, token: &str) -> Mock<'a> {
        let base = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/b2api/v3/b2_authorize_account");
                then.status(200).json_body(json!({
                    "accountId": "acc-1",
                    "authorizationToken": token,
                    "apiInfo": { "storageApi": { "apiUrl": base, "downloadUrl": base } }
                }));
            })
            .await
    }

    /// Authorization issuing `tok-1` plus the bucket listing
    async fn mock_account(server: &MockServer) -> Mock<'_> {
        let authorize = mock_authorize(server, "tok-1").await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/b2api/v2/b2_list_buckets")
                    .header("Authorization", "tok-1");
                then.status(200).json_body(json!({
                    "buckets": [
                        { "bucketId": "other-id", "bucketName": "other" },
                        { "bucketId": "bucket-1", "bucketName": "files" }
                    ]
                }));
            })
            .await;
        authorize
    }

    #[test]
    fn test_authorize_url_uses_custom_endpoint() {
        let mut settings = B2Settings {
            key_id: "id".to_string(),
            key: "k".to_string(),
            bucket_name: "b".to_string(),
            endpoint: None,
        };
        assert_eq!(
            settings.authorize_url(),
            "https://api.backblazeb2.com/b2api/v3/b2_authorize_account"
        );

        settings.endpoint = Some("http://localhost:9000/".to_string());
        assert_eq!(
            settings.authorize_url(),
            "http://localhost:9000/b2api/v3/b2_authorize_account"
        );
    }

    #[test]
    fn test_basic_auth_header() {
        let settings = B2Settings {
            key_id: "id".to_string(),
            key: "k".to_string(),
            bucket_name: "b".to_string(),
            endpoint: None,
        };
        // base64("id:k")
        assert_eq!(settings.basic_auth_header(), "Basic aWQ6aw==");
    }

    #[tokio::test]
    async fn test_authorize_resolves_bucket() {
        let server = MockServer::start_async().await;
        mock_account(&server).await;

        let store = B2Store::authorize(settings(&server)).await.unwrap();
        assert_eq!(store.bucket_id, "bucket-1");
        assert_eq!(store.describe(), "b2://files");
    }

    #[tokio::test]
    async fn test_authorize_rejected_credentials() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/b2api/v3/b2_authorize_account");
                then.status(403).body("bad key");
            })
            .await;

        let err = B2Store::authorize(settings(&server)).await.err().unwrap();
        assert!(matches!(err, RemoteError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let server = MockServer::start_async().await;
        mock_account(&server).await;
        let upload_url = server.url("/upload");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/b2api/v2/b2_get_upload_url");
                then.status(200).json_body(json!({
                    "uploadUrl": upload_url,
                    "authorizationToken": "up-tok"
                }));
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/upload")
                    .header("Authorization", "up-tok")
                    .header("X-Bz-File-Name", "obj-1")
                    .header("X-Bz-Content-Sha1", "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
                then.status(200).json_body(json!({
                    "fileId": "4_z1",
                    "fileName": "obj-1",
                    "contentLength": 5,
                    "uploadTimestamp": 1700000000000u64
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/file/files/obj-1");
                then.status(200).body("hello");
            })
            .await;

        let store = B2Store::authorize(settings(&server)).await.unwrap();
        let key = store.put("obj-1", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(key, "obj-1");
        upload.assert_async().await;

        let bytes = store.get("obj-1").await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_object_is_not_found() {
        let server = MockServer::start_async().await;
        mock_account(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/file/files/gone");
                then.status(404).body("not_found");
            })
            .await;

        let store = B2Store::authorize(settings(&server)).await.unwrap();
        let err = store.get("gone").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_server_error_is_retryable() {
        let server = MockServer::start_async().await;
        mock_account(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/file/files/busy");
                then.status(503).body("service_unavailable");
            })
            .await;

        let store = B2Store::authorize(settings(&server)).await.unwrap();
        let err = store.get("busy").await.unwrap_err();
        assert!(matches!(err, RemoteError::Server(503, _)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_replayed() {
        let server = MockServer::start_async().await;
        let first_authorize = mock_account(&server).await;
        let store = B2Store::authorize(settings(&server)).await.unwrap();

        // Later authorizations hand out a new token
        first_authorize.delete_async().await;
        let reauthorize = mock_authorize(&server, "tok-2").await;

        let expired = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/file/files/obj-1")
                    .header("Authorization", "tok-1");
                then.status(401).body("expired_auth_token");
            })
            .await;
        let fresh = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/file/files/obj-1")
                    .header("Authorization", "tok-2");
                then.status(200).body("hello");
            })
            .await;

        let bytes = store.get("obj-1").await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        expired.assert_hits_async(1).await;
        reauthorize.assert_hits_async(1).await;
        fresh.assert_hits_async(1).await;

        // The refreshed token sticks for later requests
        store.get("obj-1").await.unwrap();
        expired.assert_hits_async(1).await;
        fresh.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_expired_token_replayed_only_once() {
        let server = MockServer::start_async().await;
        mock_account(&server).await;
        let store = B2Store::authorize(settings(&server)).await.unwrap();

        let download = server
            .mock_async(|when, then| {
                when.method(GET).path("/file/files/obj-1");
                then.status(401).body("expired_auth_token");
            })
            .await;

        let err = store.get("obj-1").await.unwrap_err();
        assert!(matches!(err, RemoteError::AuthExpired));
        download.assert_hits_async(2).await;
    }
}
