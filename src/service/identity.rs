use std::collections::HashMap;

use tracing::debug;

use crate::error::AttendanceError;
use crate::model::worker::{IdentityLookup, WorkerKey};
use crate::store::{AttendanceStore, StoreError};
use crate::utils::cipher::IdCipher;

/// Resolves dedup keys to worker keys. Keys minted during one batch are
/// remembered so the same person appearing twice gets one key.
pub struct IdentityResolver<'a> {
    store: &'a dyn AttendanceStore,
    minted: HashMap<IdentityLookup, WorkerKey>,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn AttendanceStore) -> Self {
        Self {
            store,
            minted: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, lookup: &IdentityLookup) -> Result<WorkerKey, AttendanceError> {
        if let Some(key) = self.minted.get(lookup) {
            return Ok(key.clone());
        }

        if let Some(key) = self
            .store
            .find_worker_key(lookup)
            .await
            .map_err(AttendanceError::store("resolve_worker_key"))?
        {
            return Ok(key);
        }

        let key = self
            .store
            .mint_worker_key()
            .await
            .map_err(AttendanceError::store("resolve_worker_key"))?
            .filter(|k| !k.trim().is_empty())
            .map(WorkerKey::from)
            .ok_or_else(|| AttendanceError::store("resolve_worker_key")(StoreError::KeyUnavailable))?;

        debug!(login_id = %lookup.login_id, worker_key = %key, "minted worker key");
        self.minted.insert(lookup.clone(), key.clone());
        Ok(key)
    }
}

/// Builds the dedup key from an encrypted fragment as stored by the device
/// pipeline. Matching goes through the blind index of the plaintext.
pub fn lookup_from_encrypted(
    cipher: &IdCipher,
    login_id: &str,
    name: &str,
    id_fragment_enc: Option<&str>,
) -> Result<IdentityLookup, StoreError> {
    let id_fragment_index = match id_fragment_enc.filter(|e| !e.trim().is_empty()) {
        Some(encoded) => {
            let plain = cipher.decode(encoded)?;
            Some(plain.trim().to_string())
                .filter(|p| !p.is_empty())
                .map(|p| cipher.blind_index(&p))
        }
        None => None,
    };
    Ok(IdentityLookup {
        login_id: login_id.trim().to_string(),
        name: name.trim().to_string(),
        id_fragment_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConflictCode;
    use crate::model::worker::WorkerIdentity;
    use crate::service::testing::{at, date};
    use crate::store::InMemoryAttendanceStore;
    use crate::utils::cipher::test_cipher;

    fn seeded(store: &InMemoryAttendanceStore, key: &str, index: Option<String>, day: u32, deleted: bool) {
        store.seed_worker(WorkerIdentity {
            worker_key: key.into(),
            site_id: 1,
            project_id: 10,
            login_id: "01012345678".to_string(),
            name: "Hong".to_string(),
            department: None,
            job_role: None,
            phone: None,
            is_retired: false,
            retired_on: None,
            id_fragment_enc: None,
            id_fragment_index: index,
            device_editable: true,
            is_deleted: deleted,
            registered_at: at(date(2025, 1, day), 9, 0, 0),
        });
    }

    #[actix_web::test]
    async fn most_recent_live_identity_wins() {
        let cipher = test_cipher();
        let store = InMemoryAttendanceStore::new();
        let index = Some(cipher.blind_index("900101"));
        seeded(&store, "old", index.clone(), 1, false);
        seeded(&store, "new", index.clone(), 5, false);
        seeded(&store, "gone", index.clone(), 9, true);

        let encrypted = cipher.encode("900101").unwrap();
        let lookup = lookup_from_encrypted(&cipher, "01012345678", "Hong", Some(&encrypted)).unwrap();
        let mut resolver = IdentityResolver::new(&store);
        assert_eq!(resolver.resolve(&lookup).await.unwrap(), WorkerKey::from("new"));
    }

    #[actix_web::test]
    async fn missing_fragment_only_matches_missing_fragment() {
        let cipher = test_cipher();
        let store = InMemoryAttendanceStore::new();
        seeded(&store, "with-id", Some(cipher.blind_index("900101")), 1, false);

        let lookup = lookup_from_encrypted(&cipher, "01012345678", "Hong", None).unwrap();
        let mut resolver = IdentityResolver::new(&store);
        let key = resolver.resolve(&lookup).await.unwrap();
        assert_ne!(key, WorkerKey::from("with-id"));
    }

    #[actix_web::test]
    async fn minted_keys_are_reused_within_a_batch() {
        let store = InMemoryAttendanceStore::new();
        let lookup = IdentityLookup {
            login_id: "010".to_string(),
            name: "Lee".to_string(),
            id_fragment_index: None,
        };
        let mut resolver = IdentityResolver::new(&store);
        let first = resolver.resolve(&lookup).await.unwrap();
        let second = resolver.resolve(&lookup).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_blank());
    }

    #[actix_web::test]
    async fn empty_key_generation_is_a_dependency_failure() {
        let store = InMemoryAttendanceStore::new();
        store.fail_on("mint_worker_key", 0);
        let lookup = IdentityLookup {
            login_id: "010".to_string(),
            name: "Lee".to_string(),
            id_fragment_index: None,
        };
        let err = IdentityResolver::new(&store).resolve(&lookup).await.unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::Dependency { operation: "resolve_worker_key", source: StoreError::KeyUnavailable }
        ));
        assert_eq!(err.conflict_code(), None::<ConflictCode>);
    }

    #[test]
    fn tampered_fragment_is_rejected() {
        let cipher = test_cipher();
        let err = lookup_from_encrypted(&cipher, "010", "Lee", Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAA")).unwrap_err();
        assert!(matches!(err, StoreError::Cipher(_)));
    }
}
