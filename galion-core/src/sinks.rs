//! Interface-only traits for out-of-scope external collaborators: the
//! relational job-state mirror and the encrypted credential store. Full
//! implementations live outside this crate; what's here is the seam plus,
//! for the credential store, a reference implementation grounded on the
//! teacher's cookie-encryption machinery so the trait is exercised rather
//! than merely declared.

use async_trait::async_trait;

use crate::job::Job;

/// Mirrors terminal job-state transitions into an external system (a
/// relational database, a search index) that the Queue Manager's own
/// SQLite store does not serve directly.
#[async_trait]
pub trait JobStateMirror: Send + Sync {
    async fn on_job_completed(&self, job: &Job);
    async fn on_job_failed(&self, job: &Job);
}

/// No-op mirror, the default when no external system is configured.
pub struct NullJobStateMirror;

#[async_trait]
impl JobStateMirror for NullJobStateMirror {
    async fn on_job_completed(&self, _job: &Job) {}
    async fn on_job_failed(&self, _job: &Job) {}
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential stored for platform {0}")]
    NotFound(String),
    #[error("credential store backend error: {0}")]
    Backend(String),
}

/// Looks up per-platform authentication material (cookies, tokens) for
/// handlers whose [`crate::router::PlatformDescriptor::requires_credential`]
/// is set.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, platform_id: &str) -> Result<String, CredentialError>;
    async fn put(&self, platform_id: &str, secret: &str) -> Result<(), CredentialError>;
}

/// In-memory reference implementation: encrypts at rest with
/// ChaCha20-Poly1305 using a key held only for the process lifetime. A
/// production deployment would back this with the system keychain (the
/// teacher's `keyring`-backed `auth/storage.rs`) or a secrets manager;
/// this implementation exercises the same cipher without that external
/// dependency on a running keychain daemon, which would make this crate's
/// own tests environment-dependent.
pub struct EphemeralCredentialStore {
    cipher: chacha20poly1305::ChaCha20Poly1305,
    entries: dashmap::DashMap<String, Vec<u8>>,
}

impl Default for EphemeralCredentialStore {
    fn default() -> Self {
        use chacha20poly1305::KeyInit;
        let key = chacha20poly1305::ChaCha20Poly1305::generate_key(&mut rand::thread_rng());
        Self {
            cipher: chacha20poly1305::ChaCha20Poly1305::new(&key),
            entries: dashmap::DashMap::new(),
        }
    }
}

#[async_trait]
impl CredentialStore for EphemeralCredentialStore {
    async fn get(&self, platform_id: &str) -> Result<String, CredentialError> {
        use chacha20poly1305::aead::Aead;
        let entry = self
            .entries
            .get(platform_id)
            .ok_or_else(|| CredentialError::NotFound(platform_id.to_string()))?;
        let nonce = chacha20poly1305::Nonce::from_slice(&entry[..12]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &entry[12..])
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CredentialError::Backend(e.to_string()))
    }

    async fn put(&self, platform_id: &str, secret: &str) -> Result<(), CredentialError> {
        use chacha20poly1305::aead::Aead;
        use rand::RngCore;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        let mut stored = nonce_bytes.to_vec();
        stored.extend(ciphertext);
        self.entries.insert(platform_id.to_string(), stored);
        Ok(())
    }
}

/// Prevents a credential-store read from being reported through the
/// normal error path at the wrong log level.
pub fn credential_required_suggestion(platform_id: &str) -> String {
    format!(
        "Run `galion auth capture {platform_id}` to store a credential for this platform."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_store_roundtrips_secret() {
        let store = EphemeralCredentialStore::default();
        store.put("youtube", "session=abc123").await.unwrap();
        let fetched = store.get("youtube").await.unwrap();
        assert_eq!(fetched, "session=abc123");
    }

    #[tokio::test]
    async fn missing_platform_errors() {
        let store = EphemeralCredentialStore::default();
        let result = store.get("unknown").await;
        assert!(matches!(result, Err(CredentialError::NotFound(_))));
    }

    #[test]
    fn suggestion_names_the_platform() {
        assert!(credential_required_suggestion("tiktok").contains("tiktok"));
    }
}
