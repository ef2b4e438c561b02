//! Multi-region encryption and decryption
//!
//! Encryption fans out to every key at once and succeeds when at least one
//! region stores the data key. Decryption either walks the keys in order,
//! stopping at the first success, or races them and cancels the losers.
//! Keys that succeeded are never rolled back when a sibling fails.

use crate::{
    errors::{Error, ErrorKind, MultiRegionError, Operation, RegionFailure, Result},
    keysource::MasterKey,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Outcome of a multi-region operation
pub type MultiRegionResult<T> = std::result::Result<T, MultiRegionError>;

/// Fan-out tuning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiRegionOptions {
    /// Upper bound on concurrent regional calls; `None` runs every key at once
    pub max_concurrency: Option<usize>,
}

impl MultiRegionOptions {
    fn limit(&self, keys: usize) -> usize {
        self.max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or(keys)
            .clamp(1, keys.max(1))
    }
}

/// Bounded task group tagging each result with its key index
struct Fanout<T> {
    tasks: JoinSet<(usize, T)>,
    permits: Arc<Semaphore>,
    spawned: usize,
}

impl<T: Send + 'static> Fanout<T> {
    fn new(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit)),
            spawned: 0,
        }
    }

    fn spawn<F>(&mut self, index: usize, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        let _ = self.tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (index, fut.await)
        });
        self.spawned += 1;
    }

    async fn join_next(&mut self) -> Option<std::result::Result<(usize, T), JoinError>> {
        self.tasks.join_next().await
    }

    async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

fn task_failure(index: usize, region: String, err: JoinError) -> RegionFailure {
    RegionFailure {
        index,
        region,
        error: Error::new(ErrorKind::Api, "regional task failed").with_source(err),
    }
}

/// Attribute join errors to the indices that never reported
fn unreported_failures(
    reported: &[bool],
    regions: &[String],
    join_errors: Vec<JoinError>,
) -> Vec<RegionFailure> {
    reported
        .iter()
        .enumerate()
        .filter(|(_, done)| !**done)
        .map(|(i, _)| i)
        .zip(join_errors)
        .map(|(i, err)| task_failure(i, regions[i].clone(), err))
        .collect()
}

/// Encrypt `data_key` with every key in parallel
///
/// Successful keys are updated in place; failed keys are left untouched.
/// Returns the number of regions that stored the key.
pub async fn encrypt_multi_region(
    cancel: &CancellationToken,
    data_key: &[u8],
    keys: &mut [MasterKey],
    options: MultiRegionOptions,
) -> MultiRegionResult<usize> {
    if keys.is_empty() {
        return Err(MultiRegionError::NoKeys(Operation::Encrypt));
    }

    let data_key = Arc::new(Zeroizing::new(data_key.to_vec()));
    let regions: Vec<String> = keys.iter().map(MasterKey::effective_region).collect();
    let mut fanout = Fanout::new(options.limit(keys.len()));
    for (i, key) in keys.iter().enumerate() {
        let mut key = key.clone();
        let data_key = data_key.clone();
        let cancel = cancel.clone();
        fanout.spawn(i, async move {
            let result = key.encrypt_with(&cancel, &data_key).await;
            (key, result)
        });
    }

    let mut reported = vec![false; keys.len()];
    let mut failures = Vec::new();
    let mut join_errors = Vec::new();
    let mut succeeded = 0;
    while let Some(joined) = fanout.join_next().await {
        match joined {
            Ok((i, (key, Ok(())))) => {
                reported[i] = true;
                debug!(region = %regions[i], "successfully encrypted in region");
                keys[i] = key;
                succeeded += 1;
            }
            Ok((i, (_, Err(error)))) => {
                reported[i] = true;
                warn!(region = %regions[i], error = %error, "failed to encrypt in region");
                failures.push(RegionFailure {
                    index: i,
                    region: regions[i].clone(),
                    error,
                });
            }
            Err(e) => join_errors.push(e),
        }
    }
    failures.extend(unreported_failures(&reported, &regions, join_errors));
    failures.sort_by_key(|f| f.index);

    if succeeded == 0 {
        return Err(MultiRegionError::AllFailed {
            operation: Operation::Encrypt,
            failures,
        });
    }
    if !failures.is_empty() {
        warn!(
            failed_regions = failures.len(),
            successful_regions = succeeded,
            "some regions failed during encryption"
        );
    }
    Ok(succeeded)
}

/// Decrypt with the first key that works, trying keys in order
///
/// Keys without an encrypted data key are skipped.
pub async fn decrypt_multi_region(
    cancel: &CancellationToken,
    keys: &[MasterKey],
) -> MultiRegionResult<Zeroizing<Vec<u8>>> {
    if keys.is_empty() {
        return Err(MultiRegionError::NoKeys(Operation::Decrypt));
    }

    let mut failures = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if !key.has_encrypted_key() {
            continue;
        }
        let region = key.effective_region();
        debug!(region = %region, attempt = failures.len() + 1, "attempting decryption");
        match key.decrypt_with(cancel).await {
            Ok(data_key) => {
                debug!(region = %region, "successfully decrypted from region");
                return Ok(data_key);
            }
            Err(error) => {
                warn!(region = %region, error = %error, "decryption failed in region");
                failures.push(RegionFailure {
                    index: i,
                    region,
                    error,
                });
            }
        }
    }

    if failures.is_empty() {
        return Err(MultiRegionError::NoEncryptedKeys);
    }
    Err(MultiRegionError::AllFailed {
        operation: Operation::Decrypt,
        failures,
    })
}

/// Decrypt with every key at once and keep the first success
///
/// The remaining attempts are cancelled and awaited before returning.
pub async fn decrypt_multi_region_parallel(
    cancel: &CancellationToken,
    keys: &[MasterKey],
    options: MultiRegionOptions,
) -> MultiRegionResult<Zeroizing<Vec<u8>>> {
    if keys.is_empty() {
        return Err(MultiRegionError::NoKeys(Operation::Decrypt));
    }
    let candidates: Vec<usize> = (0..keys.len())
        .filter(|&i| keys[i].has_encrypted_key())
        .collect();
    if candidates.is_empty() {
        return Err(MultiRegionError::NoEncryptedKeys);
    }

    let regions: Vec<String> = keys.iter().map(MasterKey::effective_region).collect();
    let attempt = cancel.child_token();
    let mut fanout = Fanout::new(options.limit(candidates.len()));
    for &i in &candidates {
        let key = keys[i].clone();
        let attempt = attempt.clone();
        fanout.spawn(i, async move { key.decrypt_with(&attempt).await });
    }

    let mut reported = vec![true; keys.len()];
    for &i in &candidates {
        reported[i] = false;
    }
    let mut failures = Vec::new();
    let mut join_errors = Vec::new();
    while let Some(joined) = fanout.join_next().await {
        match joined {
            Ok((i, Ok(data_key))) => {
                debug!(region = %regions[i], "successfully decrypted from region (parallel)");
                attempt.cancel();
                fanout.drain().await;
                return Ok(data_key);
            }
            Ok((i, Err(error))) => {
                reported[i] = true;
                debug!(region = %regions[i], error = %error, "parallel decryption failed in region");
                failures.push(RegionFailure {
                    index: i,
                    region: regions[i].clone(),
                    error,
                });
            }
            Err(e) => join_errors.push(e),
        }
    }
    failures.extend(unreported_failures(&reported, &regions, join_errors));
    failures.sort_by_key(|f| f.index);
    debug!(attempted = fanout.spawned, "all parallel decryption attempts failed");

    Err(MultiRegionError::AllFailed {
        operation: Operation::Decrypt,
        failures,
    })
}

/// Keys grouped by effective region
pub fn group_keys_by_region(keys: &[MasterKey]) -> BTreeMap<String, Vec<&MasterKey>> {
    let mut groups: BTreeMap<String, Vec<&MasterKey>> = BTreeMap::new();
    for key in keys {
        groups.entry(key.effective_region()).or_default().push(key);
    }
    groups
}

/// Distinct effective regions, sorted
pub fn regions_from_keys(keys: &[MasterKey]) -> Vec<String> {
    group_keys_by_region(keys).into_keys().collect()
}

/// Check a key set before a multi-region operation
///
/// Fails on an empty set. Keys in one region that authenticate against
/// different identity URLs are only warned about.
pub fn validate_multi_region_keys(keys: &[MasterKey]) -> Result<()> {
    if keys.is_empty() {
        return Err(Error::validation("no master keys provided"));
    }

    for (region, group) in group_keys_by_region(keys) {
        let mut auth_urls = group
            .iter()
            .filter_map(|key| key.auth_config().map(|c| c.auth_url.as_str()));
        if let Some(first) = auth_urls.next() {
            if auth_urls.any(|url| url != first) {
                warn!(region = %region, "keys in same region have different auth URLs");
            }
        }
        debug!(region = %region, key_count = group.len(), "validated region key group");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, Credentials};
    use crate::client::SecretStore;
    use crate::keysource::tests::{MemoryStore, ID};
    use crate::models::SecretMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Blocks until cancelled
    #[derive(Debug, Default)]
    struct StuckStore {
        cancelled: AtomicBool,
    }

    #[async_trait]
    impl SecretStore for StuckStore {
        async fn create(
            &self,
            cancel: &CancellationToken,
            _payload: &[u8],
            _metadata: &SecretMetadata,
        ) -> Result<String> {
            cancel.cancelled().await;
            Err(Error::cancelled())
        }

        async fn get_payload(
            &self,
            cancel: &CancellationToken,
            _secret_ref: &str,
        ) -> Result<Zeroizing<Vec<u8>>> {
            cancel.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
            Err(Error::cancelled())
        }

        async fn delete(&self, _cancel: &CancellationToken, _secret_ref: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _cancel: &CancellationToken, _secret_ref: &str) -> Result<()> {
            Ok(())
        }
    }

    fn key(region: &str, store: Arc<dyn SecretStore>) -> MasterKey {
        MasterKey::with_region(ID, region).with_store(store)
    }

    #[tokio::test]
    async fn test_encrypt_all_regions() {
        let mut keys = vec![
            key("sjc3", Arc::new(MemoryStore::default())),
            key("dfw3", Arc::new(MemoryStore::default())),
            key("fra1", Arc::new(MemoryStore::default())),
        ];
        let n = encrypt_multi_region(&CancellationToken::new(), b"dek", &mut keys, Default::default())
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert!(keys.iter().all(MasterKey::has_encrypted_key));
    }

    #[tokio::test]
    async fn test_encrypt_partial_failure() {
        let mut keys = vec![
            key("sjc3", Arc::new(MemoryStore::default())),
            key("dfw3", Arc::new(MemoryStore::failing())),
        ];
        let options = MultiRegionOptions {
            max_concurrency: Some(1),
        };
        let n = encrypt_multi_region(&CancellationToken::new(), b"dek", &mut keys, options)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(keys[0].has_encrypted_key());
        assert!(!keys[1].has_encrypted_key());

        let data_key = decrypt_multi_region(&CancellationToken::new(), &keys).await.unwrap();
        assert_eq!(data_key.as_slice(), b"dek");
    }

    #[tokio::test]
    async fn test_encrypt_all_failed() {
        let mut keys = vec![
            key("sjc3", Arc::new(MemoryStore::failing())),
            key("dfw3", Arc::new(MemoryStore::failing())),
        ];
        let err = encrypt_multi_region(&CancellationToken::new(), b"dek", &mut keys, Default::default())
            .await
            .unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[0].region, "sjc3");
        assert_eq!(failures[1].region, "dfw3");
        assert_eq!(failures[1].error.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().starts_with("failed to encrypt in any region"));
    }

    #[tokio::test]
    async fn test_empty_key_sets() {
        let cancel = CancellationToken::new();
        assert!(matches!(
            encrypt_multi_region(&cancel, b"dek", &mut [], Default::default()).await,
            Err(MultiRegionError::NoKeys(Operation::Encrypt))
        ));
        assert!(matches!(
            decrypt_multi_region(&cancel, &[]).await,
            Err(MultiRegionError::NoKeys(Operation::Decrypt))
        ));
        let keys = vec![MasterKey::new(ID)];
        assert!(matches!(
            decrypt_multi_region(&cancel, &keys).await,
            Err(MultiRegionError::NoEncryptedKeys)
        ));
        assert!(matches!(
            decrypt_multi_region_parallel(&cancel, &keys, Default::default()).await,
            Err(MultiRegionError::NoEncryptedKeys)
        ));
    }

    #[tokio::test]
    async fn test_sequential_failover_in_order() {
        let good = Arc::new(MemoryStore::default());
        let mut seeded = key("dfw3", good.clone());
        seeded.encrypt(b"dek").await.unwrap();

        let mut broken = key("sjc3", Arc::new(MemoryStore::failing()));
        broken.set_encrypted_data_key(seeded.encrypted_data_key());

        let keys = vec![broken, seeded];
        let data_key = decrypt_multi_region(&CancellationToken::new(), &keys).await.unwrap();
        assert_eq!(data_key.as_slice(), b"dek");
    }

    #[tokio::test]
    async fn test_parallel_cancels_losers() {
        let good = Arc::new(MemoryStore::default());
        let mut seeded = key("dfw3", good);
        seeded.encrypt(b"dek").await.unwrap();

        let stuck = Arc::new(StuckStore::default());
        let mut slow = key("sjc3", stuck.clone());
        slow.set_encrypted_data_key(seeded.encrypted_data_key());

        let keys = vec![slow, seeded];
        let data_key = decrypt_multi_region_parallel(&CancellationToken::new(), &keys, Default::default())
            .await
            .unwrap();
        assert_eq!(data_key.as_slice(), b"dek");
        assert!(stuck.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_parallel_all_failed() {
        let mut keys = vec![
            key("sjc3", Arc::new(MemoryStore::failing())),
            key("dfw3", Arc::new(MemoryStore::failing())),
        ];
        for k in &mut keys {
            k.set_encrypted_data_key(format!("https://kms.example.com/v1/secrets/{ID}").as_bytes());
        }
        let err = decrypt_multi_region_parallel(&CancellationToken::new(), &keys, Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.failures()[0].region, "sjc3");
    }

    #[test]
    fn test_region_helpers() {
        let keys = vec![
            MasterKey::with_region(ID, "sjc3"),
            MasterKey::new(format!("region:dfw3:{ID}")),
            MasterKey::with_region(ID, "sjc3"),
            MasterKey::new(ID),
        ];
        let groups = group_keys_by_region(&keys);
        assert_eq!(groups["sjc3"].len(), 2);
        assert_eq!(groups["dfw3"].len(), 1);
        assert_eq!(regions_from_keys(&keys), vec!["RegionOne", "dfw3", "sjc3"]);
    }

    #[test]
    fn test_validate_multi_region_keys() {
        assert_eq!(
            validate_multi_region_keys(&[]).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let a = AuthConfig::new("https://ks-a.example/v3", Credentials::token("t")).with_project_id("p");
        let b = AuthConfig::new("https://ks-b.example/v3", Credentials::token("t")).with_project_id("p");
        let keys = vec![
            MasterKey::with_region(ID, "sjc3").with_auth_config(a),
            MasterKey::with_region(ID, "sjc3").with_auth_config(b),
        ];
        assert!(validate_multi_region_keys(&keys).is_ok());
    }
}
