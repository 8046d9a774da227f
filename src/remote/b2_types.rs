//! B2 API wire types
//!
//! Request and response bodies for the handful of B2 calls the object store
//! adapter makes: authorize, list buckets, get upload URL, upload.

use serde::{Deserialize, Serialize};

/// Response from b2_authorize_account (v3 nests URLs under apiInfo)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub account_id: String,
    pub authorization_token: String,
    pub api_info: ApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub storage_api: StorageApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageApiInfo {
    pub api_url: String,
    pub download_url: String,
}

/// Request body for b2_list_buckets
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBucketsRequest<'a> {
    pub account_id: &'a str,
    pub bucket_name: &'a str,
}

/// Response from b2_list_buckets
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub bucket_id: String,
    pub bucket_name: String,
}

/// Upload URL from b2_get_upload_url
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub upload_url: String,
    pub authorization_token: String,
}

/// Response from a successful upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    pub file_name: String,
}
