use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use crc::{CRC_16_XMODEM, Crc};
use serde::{Deserialize, Deserializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid raw address: {0}")]
    InvalidRaw(String),
    #[error("invalid user-friendly address: {0}")]
    InvalidFriendly(String),
    #[error("address checksum mismatch")]
    ChecksumMismatch,
}

/// Account identifier on a workchain.
///
/// Equality compares the raw workchain and hash, never a rendered string:
/// the same account has several user-friendly encodings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId {
    pub workchain: i32,
    pub hash: [u8; 32],
}

impl AccountId {
    pub const fn new(workchain: i32, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if testnet {
            tag |= TAG_TESTNET;
        }

        let mut buf = Vec::with_capacity(36);
        buf.push(tag);
        buf.push(self.workchain as i8 as u8);
        buf.extend_from_slice(&self.hash);
        let crc = CRC16.checksum(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(buf)
    }

    fn from_raw(value: &str) -> Result<Self, AddressError> {
        let (wc, hash) = value
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidRaw(value.to_owned()))?;
        let workchain = wc
            .parse::<i32>()
            .map_err(|_| AddressError::InvalidRaw(value.to_owned()))?;
        let bytes = hex::decode(hash).map_err(|_| AddressError::InvalidRaw(value.to_owned()))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidRaw(value.to_owned()))?;
        Ok(Self { workchain, hash })
    }

    fn from_friendly(value: &str) -> Result<Self, AddressError> {
        if value.len() != 48 {
            return Err(AddressError::InvalidFriendly(value.to_owned()));
        }
        let bytes = URL_SAFE
            .decode(value)
            .or_else(|_| STANDARD.decode(value))
            .map_err(|_| AddressError::InvalidFriendly(value.to_owned()))?;
        if bytes.len() != 36 {
            return Err(AddressError::InvalidFriendly(value.to_owned()));
        }

        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::InvalidFriendly(value.to_owned()));
        }

        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if CRC16.checksum(&bytes[..34]) != expected {
            return Err(AddressError::ChecksumMismatch);
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8 as i32,
            hash,
        })
    }
}

impl FromStr for AccountId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.contains(':') {
            Self::from_raw(value)
        } else {
            Self::from_friendly(value)
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true, false))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = "EQC3dNlesgVD8YbAazcauIrXBPfiVhMMr5YYk2in0Mtsz0Bz";
    const COLLECTION_RAW: &str =
        "0:b774d95eb20543f186c06b371ab88ad704f7e256130caf96189368a7d0cb6ccf";

    #[test]
    fn parses_friendly_and_raw_forms_to_same_account() {
        let friendly: AccountId = COLLECTION.parse().unwrap();
        let raw: AccountId = COLLECTION_RAW.parse().unwrap();
        assert_eq!(friendly, raw);
        assert_eq!(friendly.to_raw(), COLLECTION_RAW);
        assert_eq!(friendly.to_string(), COLLECTION);
    }

    #[test]
    fn non_bounceable_rendering_is_the_same_account() {
        let account: AccountId = COLLECTION.parse().unwrap();
        let non_bounceable = account.to_friendly(false, false);
        assert_ne!(non_bounceable, COLLECTION);
        assert_eq!(non_bounceable.parse::<AccountId>().unwrap(), account);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut corrupted = COLLECTION.to_owned();
        corrupted.replace_range(10..11, "A");
        assert_eq!(
            corrupted.parse::<AccountId>(),
            Err(AddressError::ChecksumMismatch)
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("0:abcd".parse::<AccountId>().is_err());
        assert!("x:".parse::<AccountId>().is_err());
        assert!("EQC3dNles".parse::<AccountId>().is_err());
    }

    #[test]
    fn masterchain_workchain_round_trips_through_raw_form() {
        let account = AccountId::new(-1, [7u8; 32]);
        assert_eq!(account.to_raw().parse::<AccountId>().unwrap(), account);
        assert_eq!(account.to_string().parse::<AccountId>().unwrap(), account);
    }
}
