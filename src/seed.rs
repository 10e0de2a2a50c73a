use hmac::{Hmac, Mac, digest::KeyInit};
use sha2::Sha512;
use thiserror::Error;

const MIN_WORDS: usize = 12;
const PBKDF_ITERATIONS: u32 = 100_000;
const SEED_VERSION_SALT: &[u8] = b"TON seed version";
const DEFAULT_SEED_SALT: &[u8] = b"TON default seed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("seed phrase must have at least {MIN_WORDS} words, got {0}")]
    TooShort(usize),
    #[error("seed phrase failed the checksum test")]
    InvalidChecksum,
    #[error("seed phrase cannot key the HMAC")]
    InvalidKey,
}

/// Derives the 32-byte Ed25519 seed from a mnemonic phrase.
///
/// Words are split on whitespace and re-joined with single spaces before
/// hashing, so surrounding or repeated spaces do not change the key.
pub fn derive_private_key(phrase: &str) -> Result<[u8; 32], SeedError> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() < MIN_WORDS {
        return Err(SeedError::TooShort(words.len()));
    }
    let entropy = mnemonic_entropy(&words.join(" "))?;

    let mut version = [0u8; 1];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        &entropy,
        SEED_VERSION_SALT,
        PBKDF_ITERATIONS / 256,
        &mut version,
    );
    if version[0] != 0 {
        return Err(SeedError::InvalidChecksum);
    }

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha512>(&entropy, DEFAULT_SEED_SALT, PBKDF_ITERATIONS, &mut key);
    Ok(key)
}

// Keyed by the phrase itself over an empty message.
fn mnemonic_entropy(normalized: &str) -> Result<[u8; 64], SeedError> {
    let mac = <Hmac<Sha512> as KeyInit>::new_from_slice(normalized.as_bytes())
        .map_err(|_| SeedError::InvalidKey)?;
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "act actor across account ability about above action about about actor able actor abuse across act acquire absent access abstract act able acquire about";
    const VALID_KEY: &str = "e71155ef6dfd40ca66be0b6aac44b09b1effd60eb2a92c8dfedd1d77cceeb254";
    const BAD_CHECKSUM: &str = "abandon accuse able acid above acquire absorb act absurd actor access actual account ability achieve about acoustic absent across abstract action abuse actress accident";

    #[test]
    fn derives_known_key() {
        let key = derive_private_key(VALID).unwrap();
        assert_eq!(hex::encode(key), VALID_KEY);
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(
            derive_private_key(VALID).unwrap(),
            derive_private_key(VALID).unwrap()
        );
    }

    #[test]
    fn extra_whitespace_is_normalized() {
        let spaced = format!("  {}  ", VALID.replace(' ', "   "));
        assert_eq!(
            derive_private_key(&spaced).unwrap(),
            derive_private_key(VALID).unwrap()
        );
    }

    #[test]
    fn entropy_accepts_keys_past_block_size() {
        assert_eq!(
            hex::encode(mnemonic_entropy("key").unwrap()),
            "84fa5aa0279bbc473267d05a53ea03310a987cecc4c1535ff29b6d76b8f1444a728df3aadb89d4a9a6709e1998f373566e8f824a8ca93b1821f0b69bc2a2f65e"
        );
        assert_eq!(
            hex::encode(mnemonic_entropy(&"x".repeat(200)).unwrap()),
            "16298f4e11f0218254d37b094bad2f64a632a2657bbfd234bd7a2cf35113c6f08cb222534b1352aa2ff9b3ce0d2ecd192ab80a87512ccdbe7e08165e540b4ea1"
        );
    }

    #[test]
    fn rejects_short_phrases() {
        let phrase = "act actor across account ability about above action about about actor";
        assert_eq!(derive_private_key(phrase), Err(SeedError::TooShort(11)));
        assert_eq!(derive_private_key(""), Err(SeedError::TooShort(0)));
    }

    #[test]
    fn rejects_failed_checksum() {
        assert_eq!(
            derive_private_key(BAD_CHECKSUM),
            Err(SeedError::InvalidChecksum)
        );
    }
}
