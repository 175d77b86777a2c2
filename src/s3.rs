use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};

use crate::config::AppConfig;

const FALLBACK_REGION: &str = "us-east-1";

/// Static credentials when both halves are configured; otherwise the SDK's
/// default provider chain applies.
fn static_credentials(config: &AppConfig) -> Option<Credentials> {
    match (&config.aws_access_key_id, &config.aws_secret_access_key) {
        (Some(access_key), Some(secret_key)) => Some(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "kaisen-static",
        )),
        _ => None,
    }
}

/// Client for the photo bucket. Path-style addressing keeps MinIO and other
/// S3-compatible endpoints working.
pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region_provider =
        RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
            .or_default_provider()
            .or_else(FALLBACK_REGION);

    let mut loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);
    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(credentials) = static_credentials(config) {
        loader = loader.credentials_provider(credentials);
    }

    let shared = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&shared)
        .force_path_style(true)
        .build();
    Ok(S3Client::from_conf(s3_config))
}

/// Fails when the photo bucket is missing or unreachable with the configured
/// credentials.
pub async fn check_bucket(client: &S3Client, bucket: &str) -> Result<()> {
    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .with_context(|| format!("photo bucket {bucket} is not reachable"))?;
    Ok(())
}
