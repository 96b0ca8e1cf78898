//! Merchant authentication by API key.
//!
//! The raw key is never stored; lookup is by SHA-256 hash with a
//! read-through cache validated by the store on every miss.

use sha2::{Digest, Sha256};

use crate::cache::{merchant_cache_key, MERCHANT_CACHE_TTL};
use crate::error::ServiceError;
use crate::models::Merchant;
use crate::repos::merchants;
use crate::state::AppState;

pub fn hash_api_key(api_key: &str) -> String {
    format!("{:x}", Sha256::digest(api_key.as_bytes()))
}

pub async fn authenticate_merchant(
    state: &AppState,
    api_key: &str,
) -> Result<Merchant, ServiceError> {
    if api_key.is_empty() {
        return Err(ServiceError::InvalidApiKey);
    }

    let hash = hash_api_key(api_key);
    let cache_key = merchant_cache_key(&hash);

    if let Some(merchant) = state.merchant_cache.get(&cache_key).await {
        return Ok(merchant);
    }

    let merchant = merchants::find_by_api_key_hash(&state.db, &hash)
        .await?
        .ok_or(ServiceError::InvalidApiKey)?;

    state
        .merchant_cache
        .insert(cache_key, merchant.clone(), MERCHANT_CACHE_TTL)
        .await;

    Ok(merchant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256_hex() {
        // SHA-256 of the empty string is a fixed vector.
        assert_eq!(
            hash_api_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_api_key("k").len(), 64);
        assert_ne!(hash_api_key("key-a"), hash_api_key("key-b"));
    }
}
