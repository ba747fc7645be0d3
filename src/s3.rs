use anyhow::Result;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;
use crate::storage::S3Storage;

const CREDENTIALS_PROVIDER: &str = "officebridge-env";

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()));

    if let Some(endpoint) = config.aws_endpoint_url.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(credentials) = static_credentials(config) {
        loader = loader.credentials_provider(credentials);
    }

    let shared = loader.load().await;
    // MinIO-style endpoints only answer path-style requests.
    let s3_config = S3ConfigBuilder::from(&shared)
        .force_path_style(config.aws_endpoint_url.is_some())
        .build();

    Ok(S3Client::from_conf(s3_config))
}

/// Blob store for the configured bucket.
pub async fn build_storage(config: &AppConfig) -> Result<S3Storage> {
    let client = build_client(config).await?;
    Ok(S3Storage::new(client, config.s3_bucket.clone()))
}

fn static_credentials(config: &AppConfig) -> Option<Credentials> {
    match (&config.aws_access_key_id, &config.aws_secret_access_key) {
        (Some(access_key), Some(secret_key)) => Some(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        )),
        _ => None,
    }
}
