//! Basic usage example for barbican-keysource
//!
//! Reads the standard `OS_*` variables, stores a data key in Barbican and
//! reads it back. Set `BARBICAN_REFS` to a comma-separated list of
//! `region:<name>:<uuid>` references to exercise multi-region mode.

use anyhow::{Context, Result};
use barbican_keysource::{
    decrypt_multi_region_parallel, encrypt_multi_region, regions_from_keys,
    validate_multi_region_keys, AuthManager, AuthSettings, CancellationToken, MasterKey,
    MultiRegionOptions, SecurityValidator,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("barbican_keysource=debug")),
        )
        .init();

    let settings = AuthSettings::from_env();
    SecurityValidator::default().validate_auth_config(&settings)?;
    let config = settings
        .resolve()
        .context("set OS_AUTH_URL, a project and one credential method")?;
    let auth = Arc::new(AuthManager::new(config)?);

    let cancel = CancellationToken::new();
    auth.prewarm(&cancel).await?;
    println!("Token cached until {:?}", auth.token_expires_at());

    // Example 1: Single region
    println!("=== Example 1: Single region ===");
    let mut key = MasterKey::new("").with_auth_manager(auth.clone());
    key.encrypt(b"0123456789abcdef0123456789abcdef").await?;
    println!("Stored data key as {key}");

    let data_key = key.decrypt().await?;
    println!("Recovered {} bytes", data_key.len());
    for (field, value) in key.to_map() {
        if field != "enc" {
            println!("  {field}: {value}");
        }
    }

    // Example 2: Multi-region
    if let Ok(refs) = std::env::var("BARBICAN_REFS") {
        println!("\n=== Example 2: Multi-region ===");
        let mut keys: Vec<MasterKey> = MasterKey::from_secret_refs(&refs)
            .context("BARBICAN_REFS must be a comma-separated list of secret references")?
            .into_iter()
            .map(|k| k.with_auth_manager(auth.clone()))
            .collect();
        validate_multi_region_keys(&keys)?;
        println!("Regions: {}", regions_from_keys(&keys).join(", "));

        let stored = encrypt_multi_region(
            &cancel,
            b"0123456789abcdef0123456789abcdef",
            &mut keys,
            MultiRegionOptions::default(),
        )
        .await?;
        println!("Stored in {stored}/{} regions", keys.len());

        let data_key =
            decrypt_multi_region_parallel(&cancel, &keys, MultiRegionOptions::default()).await?;
        println!("Recovered {} bytes from the fastest region", data_key.len());
    }

    let stats = auth.stats();
    println!(
        "\nToken cache: {} hits, {} misses, {} authentications",
        stats.hits(),
        stats.misses(),
        stats.authentications()
    );

    Ok(())
}
