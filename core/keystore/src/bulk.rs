//! Parallel bulk decryption for large vault loads.

use tokio::task::JoinSet;
use zeroize::Zeroizing;

use keyfort_common::{Error, Result};
use keyfort_crypto::{decrypt_aes, EncString, SymmetricKey};

/// Decrypt a batch of envelopes under one key, fanning the work out over
/// blocking worker threads.
///
/// Results come back in input order, one per item: a single undecryptable
/// item yields an `Err` in its slot without failing the rest of the batch.
pub async fn decrypt_all(
    items: Vec<EncString>,
    key: &SymmetricKey,
) -> Vec<Result<Zeroizing<Vec<u8>>>> {
    if items.is_empty() {
        return Vec::new();
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(items.len());
    let chunk_size = items.len().div_ceil(workers);

    let total = items.len();
    let mut set = JoinSet::new();
    let mut chunks: Vec<EncString> = items;
    let mut start = 0;
    while !chunks.is_empty() {
        let rest = chunks.split_off(chunk_size.min(chunks.len()));
        let chunk = std::mem::replace(&mut chunks, rest);
        let len = chunk.len();
        let key = key.clone();
        set.spawn_blocking(move || {
            let results: Vec<Result<Zeroizing<Vec<u8>>>> =
                chunk.iter().map(|item| decrypt_aes(item, &key)).collect();
            (start, results)
        });
        start += len;
    }

    let mut slots: Vec<Option<Result<Zeroizing<Vec<u8>>>>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    while let Some(joined) = set.join_next().await {
        if let Ok((start, results)) = joined {
            for (offset, result) in results.into_iter().enumerate() {
                slots[start + offset] = Some(result);
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::Crypto("decrypt worker failed".to_string()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfort_crypto::encrypt_aes;

    #[tokio::test]
    async fn test_empty_batch() {
        let key = SymmetricKey::generate();
        assert!(decrypt_all(Vec::new(), &key).await.is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let key = SymmetricKey::generate();
        let items: Vec<EncString> = (0u8..100)
            .map(|i| encrypt_aes(&[i, i, i], &key).unwrap())
            .collect();

        let results = decrypt_all(items, &key).await;
        assert_eq!(results.len(), 100);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().unwrap().as_slice(), &[i as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_bad_item_does_not_fail_batch() {
        let key = SymmetricKey::generate();
        let other = SymmetricKey::generate();

        let items = vec![
            encrypt_aes(b"first", &key).unwrap(),
            encrypt_aes(b"second", &other).unwrap(),
            encrypt_aes(b"third", &key).unwrap(),
        ];

        let results = decrypt_all(items, &key).await;
        assert_eq!(results[0].as_ref().unwrap().as_slice(), b"first");
        assert!(matches!(results[1], Err(Error::DecryptionFailed)));
        assert_eq!(results[2].as_ref().unwrap().as_slice(), b"third");
    }
}
