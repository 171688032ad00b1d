//! KDF parameter rotation.

use tracing::info;

use keyfort_common::{Error, Result, UserId};
use keyfort_crypto::{derive_master_key, rewrap_user_key, HashPurpose, KdfConfig, MasterKey};
use keyfort_keystore::KeyHierarchyStore;

use crate::accounts::AccountStore;

/// Re-derive the master key under new KDF parameters and re-wrap the user
/// key accordingly.
///
/// The new parameters are validated first, the current password must
/// still open the existing wrapped user key, and the result — new
/// parameters, re-wrapped user key, new server hash — is persisted as one
/// unit. The user key itself never changes, so nothing in the vault needs
/// re-encryption.
///
/// # Errors
/// - `InvalidInput` when the new parameters are out of bounds
/// - `NotFound` when the account has no KDF config or wrapped key yet
/// - `DecryptionFailed` when the password does not open the current key
pub async fn rotate_kdf(
    accounts: &dyn AccountStore,
    keys: &KeyHierarchyStore,
    user_id: &UserId,
    email: &str,
    password: &str,
    new_config: KdfConfig,
) -> Result<()> {
    new_config.validate()?;

    let old_config = accounts
        .kdf_config(user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no KDF config for {user_id}")))?;
    let wrapped = accounts
        .wrapped_user_key(user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no wrapped user key for {user_id}")))?;

    let (old_master, new_master) = {
        let password = password.to_string();
        let email = email.to_string();
        let new_config = new_config.clone();
        tokio::task::spawn_blocking(move || -> Result<(MasterKey, MasterKey)> {
            let old = derive_master_key(password.as_bytes(), &email, &old_config)?;
            let new = derive_master_key(password.as_bytes(), &email, &new_config)?;
            Ok((old, new))
        })
        .await
        .map_err(|e| Error::Crypto(format!("derivation task: {e}")))??
    };

    let new_wrapped = rewrap_user_key(&wrapped, &old_master, &new_master)?;
    let new_hash_b64 = new_master
        .hash(password.as_bytes(), HashPurpose::ServerAuthorization)
        .to_b64();

    accounts
        .persist_kdf_rotation(user_id, new_config.clone(), new_wrapped, new_hash_b64)
        .await?;

    // keep the in-memory hierarchy in step with what was persisted
    keys.set_kdf_config(user_id, new_config).await;
    keys.set_master_key(user_id, new_master).await;

    info!(user = %user_id, "KDF parameters rotated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountProfile, MemoryAccountStore};
    use crate::testutil::ServerAccount;

    async fn seeded(account: &ServerAccount) -> (MemoryAccountStore, KeyHierarchyStore, UserId) {
        let accounts = MemoryAccountStore::new();
        let keys = KeyHierarchyStore::new();
        let user = UserId::random();
        accounts
            .upsert_account(&user, AccountProfile::default())
            .await
            .unwrap();
        accounts
            .set_kdf_config(&user, account.kdf.clone())
            .await
            .unwrap();
        accounts
            .set_wrapped_user_key(&user, account.wrapped_user_key.clone())
            .await
            .unwrap();
        (accounts, keys, user)
    }

    #[tokio::test]
    async fn test_rotation_preserves_the_user_key() {
        let account = ServerAccount::provision("user@example.com", "correct-horse");
        let (accounts, keys, user) = seeded(&account).await;

        let new_config = KdfConfig::Argon2id {
            iterations: 2,
            memory_mib: 16,
            parallelism: 1,
        };
        rotate_kdf(
            &accounts,
            &keys,
            &user,
            &account.email,
            &account.password,
            new_config.clone(),
        )
        .await
        .unwrap();

        assert_eq!(accounts.kdf_config(&user).await.unwrap(), Some(new_config.clone()));

        // the new wrapped key opens under the new parameters to the same
        // user key as before
        let new_wrapped = accounts.wrapped_user_key(&user).await.unwrap().unwrap();
        assert_ne!(new_wrapped, account.wrapped_user_key);
        let new_master =
            derive_master_key(account.password.as_bytes(), &account.email, &new_config).unwrap();
        let unwrapped = KeyHierarchyStore::unwrap_user_key(&new_wrapped, &new_master).unwrap();
        assert_eq!(
            unwrapped.key().as_bytes(),
            account.user_key.key().as_bytes()
        );

        // the server hash changed along with the parameters
        let hash = accounts.server_hash_b64(&user).await.unwrap();
        assert_ne!(hash, account.server_hash_b64);
    }

    #[tokio::test]
    async fn test_wrong_password_blocks_rotation() {
        let account = ServerAccount::provision("user@example.com", "correct-horse");
        let (accounts, keys, user) = seeded(&account).await;

        let err = rotate_kdf(
            &accounts,
            &keys,
            &user,
            &account.email,
            "wrong-password",
            KdfConfig::default_argon2id(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));

        // nothing was persisted
        assert_eq!(
            accounts.kdf_config(&user).await.unwrap(),
            Some(account.kdf.clone())
        );
        assert_eq!(
            accounts.wrapped_user_key(&user).await.unwrap(),
            Some(account.wrapped_user_key.clone())
        );
    }

    #[tokio::test]
    async fn test_out_of_bounds_parameters_rejected_before_any_work() {
        let account = ServerAccount::provision("user@example.com", "correct-horse");
        let (accounts, keys, user) = seeded(&account).await;

        let err = rotate_kdf(
            &accounts,
            &keys,
            &user,
            &account.email,
            &account.password,
            KdfConfig::Pbkdf2 { iterations: 1 },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
