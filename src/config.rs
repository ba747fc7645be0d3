use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_BRIDGE_EDIT_URL_TEMPLATE: &str = "https://docs.google.com/document/d/{id}/edit";
pub const DEFAULT_BRIDGE_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_SIGNED_URL_TTL_SECONDS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub cors_allowed_origin: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
    pub bridge_endpoint: Option<String>,
    pub bridge_secret: Option<String>,
    pub bridge_timeout_seconds: u64,
    pub bridge_edit_url_template: String,
    pub signed_url_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "officebridge".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "officebridge-clients".to_string());
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
        let bridge_endpoint = non_empty_var("BRIDGE_ENDPOINT");
        let bridge_secret = non_empty_var("BRIDGE_SECRET");
        let bridge_timeout_seconds = env::var("BRIDGE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| DEFAULT_BRIDGE_TIMEOUT_SECONDS.to_string())
            .parse()
            .context("BRIDGE_TIMEOUT_SECONDS must be an integer")?;
        let bridge_edit_url_template = env::var("BRIDGE_EDIT_URL_TEMPLATE")
            .unwrap_or_else(|_| DEFAULT_BRIDGE_EDIT_URL_TEMPLATE.to_string());
        let signed_url_ttl_seconds = env::var("SIGNED_URL_TTL_SECONDS")
            .unwrap_or_else(|_| DEFAULT_SIGNED_URL_TTL_SECONDS.to_string())
            .parse()
            .context("SIGNED_URL_TTL_SECONDS must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            cors_allowed_origin,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            bridge_endpoint,
            bridge_secret,
            bridge_timeout_seconds,
            bridge_edit_url_template,
            signed_url_ttl_seconds,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    pub fn bridge_configured(&self) -> bool {
        self.bridge_endpoint.is_some() && self.bridge_secret.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
