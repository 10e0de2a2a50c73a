use crate::{
    address::AccountId,
    cell::{Cell, CellBuilder, CellError, MAX_CELL_BITS},
};
use ed25519_dalek::{Signer, SigningKey};
use serde::Deserialize;
use std::{fmt, sync::Arc};

pub const DEFAULT_SUBWALLET_ID: u32 = 698_983_191;
const BASECHAIN: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletVersion {
    #[default]
    V3R2,
}

const WALLET_V3R2_CODE: &str = "b5ee9c724101010100710000deff0020dd2082014c97ba218201339cbab19f71b0ed44d0d31fd31f31d70bffe304e0a4f2608308d71820d31fd31fd31ff82313bbf263ed44d0d31fd31fd3ffd15132baf2a15144baf2a204f901541055f910f2a3f8009320d74a96d307d402fb00e8d101a4c8cb1fcb1fcbffc9ed5410bd6dad";

impl WalletVersion {
    fn code(&self) -> Result<Cell, CellError> {
        let boc = match self {
            WalletVersion::V3R2 => WALLET_V3R2_CODE,
        };
        let bytes =
            hex::decode(boc).map_err(|_| CellError::InvalidBoc("wallet code is not valid hex"))?;
        Cell::from_boc(&bytes)
    }
}

impl fmt::Display for WalletVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletVersion::V3R2 => write!(f, "v3r2"),
        }
    }
}

/// Plain value transfer with a text comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub recipient: AccountId,
    pub amount: u64,
    pub comment: String,
    pub bounce: bool,
    pub mode: u8,
}

/// Signing key plus the wallet contract address it controls. Built once at
/// startup and shared read-only by every worker.
#[derive(Clone)]
pub struct Wallet {
    key: SigningKey,
    version: WalletVersion,
    subwallet_id: u32,
    address: AccountId,
    state_init: Arc<Cell>,
}

impl Wallet {
    pub fn new(
        private_key: [u8; 32],
        version: WalletVersion,
        subwallet_id: u32,
    ) -> Result<Self, CellError> {
        let key = SigningKey::from_bytes(&private_key);
        let state_init = state_init(version.code()?, initial_data(&key, subwallet_id)?)?;
        let address = AccountId::new(BASECHAIN, state_init.hash());
        Ok(Self {
            key,
            version,
            subwallet_id,
            address,
            state_init: Arc::new(state_init),
        })
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn version(&self) -> WalletVersion {
        self.version
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Builds the signed external message carrying `transfers`, serialized
    /// as a bag of cells ready for submission. Seqno 0 means the contract is
    /// not deployed yet, so the message also carries its StateInit.
    pub fn transfer_message(
        &self,
        seqno: u32,
        valid_until: u32,
        transfers: &[Transfer],
    ) -> Result<Vec<u8>, CellError> {
        let mut signing = CellBuilder::new();
        signing
            .store_u32(self.subwallet_id)?
            .store_u32(valid_until)?
            .store_u32(seqno)?;
        for transfer in transfers {
            signing
                .store_u8(transfer.mode)?
                .store_reference(Arc::new(internal_message(transfer)?))?;
        }
        let signing = signing.build();

        let signature = self.key.sign(&signing.hash());
        let body = CellBuilder::new()
            .store_bytes(&signature.to_bytes())?
            .store_cell_contents(&signing)?
            .build();

        let mut message = CellBuilder::new();
        message
            .store_uint(0b10, 2)?
            .store_address(None)?
            .store_address(Some(&self.address))?
            .store_coins(0)?;
        if seqno == 0 {
            message
                .store_bit(true)?
                .store_bit(true)?
                .store_reference(self.state_init.clone())?;
        } else {
            message.store_bit(false)?;
        }
        message.store_bit(true)?.store_reference(Arc::new(body))?;
        Ok(message.build().to_boc())
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("version", &self.version)
            .field("subwallet_id", &self.subwallet_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn initial_data(key: &SigningKey, subwallet_id: u32) -> Result<Cell, CellError> {
    Ok(CellBuilder::new()
        .store_u32(0)?
        .store_u32(subwallet_id)?
        .store_bytes(&key.verifying_key().to_bytes())?
        .build())
}

// Only code and data present: bits `00110`, two references.
fn state_init(code: Cell, data: Cell) -> Result<Cell, CellError> {
    Ok(CellBuilder::new()
        .store_uint(0b00110, 5)?
        .store_reference(Arc::new(code))?
        .store_reference(Arc::new(data))?
        .build())
}

fn internal_message(transfer: &Transfer) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder
        .store_bit(false)?
        .store_bit(true)?
        .store_bit(transfer.bounce)?
        .store_bit(false)?
        .store_address(None)?
        .store_address(Some(&transfer.recipient))?
        .store_coins(transfer.amount)?
        .store_bit(false)?
        .store_coins(0)?
        .store_coins(0)?
        .store_u64(0)?
        .store_u32(0)?
        .store_bit(false)?;

    let comment = comment_body(&transfer.comment)?;
    if builder_fits(&builder, &comment) {
        builder.store_bit(false)?.store_cell_contents(&comment)?;
    } else {
        builder.store_bit(true)?.store_reference(Arc::new(comment))?;
    }
    Ok(builder.build())
}

fn comment_body(comment: &str) -> Result<Cell, CellError> {
    Ok(CellBuilder::new()
        .store_u32(0)?
        .store_bytes(comment.as_bytes())?
        .build())
}

fn builder_fits(builder: &CellBuilder, body: &Cell) -> bool {
    builder.bit_len() + 1 + body.bit_len() <= MAX_CELL_BITS
        && body.references().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_KEY: &str = "e71155ef6dfd40ca66be0b6aac44b09b1effd60eb2a92c8dfedd1d77cceeb254";

    fn wallet() -> Wallet {
        let key: [u8; 32] = hex::decode(PRIVATE_KEY).unwrap().try_into().unwrap();
        Wallet::new(key, WalletVersion::V3R2, DEFAULT_SUBWALLET_ID).unwrap()
    }

    fn transfer() -> Transfer {
        Transfer {
            recipient: AccountId::new(0, [9u8; 32]),
            amount: 1_051_000_000,
            comment: "bid".to_owned(),
            bounce: true,
            mode: 1,
        }
    }

    #[test]
    fn derives_v3r2_address() {
        let wallet = wallet();
        assert_eq!(
            hex::encode(wallet.public_key()),
            "cca1359ba28c5dba3e44630d6ad35139a3edf9c8b15f96b2456a61e6d521dc18"
        );
        assert_eq!(
            wallet.address().to_raw(),
            "0:8ee6605e5aaec5604000c157635e174e8d44a576f55ef7966923f4dbb633ab55"
        );
        assert_eq!(
            wallet.address().to_string(),
            "EQCO5mBeWq7FYEAAwVdjXhdOjUSldvVe95ZpI_TbtjOrVYMf"
        );
    }

    #[test]
    fn transfer_message_layout() {
        let wallet = wallet();
        let boc = wallet.transfer_message(7, 1_700_000_000, &[transfer()]).unwrap();
        let message = Cell::from_boc(&boc).unwrap();

        let mut parser = message.parser();
        assert_eq!(parser.load_uint(2).unwrap(), 0b10);
        assert_eq!(parser.load_address().unwrap(), None);
        assert_eq!(parser.load_address().unwrap(), Some(*wallet.address()));
        assert_eq!(parser.load_coins().unwrap(), 0);
        assert!(!parser.load_bit().unwrap());
        assert!(parser.load_bit().unwrap());

        let body = parser.load_reference().unwrap().clone();
        let mut body = body.parser();
        let signature = body.load_bytes(64).unwrap();
        assert_eq!(body.load_u32().unwrap(), DEFAULT_SUBWALLET_ID);
        assert_eq!(body.load_u32().unwrap(), 1_700_000_000);
        assert_eq!(body.load_u32().unwrap(), 7);
        assert_eq!(body.load_u8().unwrap(), 1);
        assert_eq!(signature.len(), 64);

        let internal = body.load_reference().unwrap().clone();
        let mut internal = internal.parser();
        assert!(!internal.load_bit().unwrap());
        assert!(internal.load_bit().unwrap());
        assert!(internal.load_bit().unwrap());
        assert!(!internal.load_bit().unwrap());
        assert_eq!(internal.load_address().unwrap(), None);
        assert_eq!(
            internal.load_address().unwrap(),
            Some(AccountId::new(0, [9u8; 32]))
        );
        assert_eq!(internal.load_coins().unwrap(), 1_051_000_000);
    }

    #[test]
    fn embedded_code_matches_published_hash() {
        let code = WalletVersion::V3R2.code().unwrap();
        assert_eq!(
            hex::encode(code.hash()),
            "84dafa449f98a6987789ba232358072bc0f76dc4524002a5d0918b9a75d2d599"
        );
    }

    #[test]
    fn first_transfer_deploys_wallet() {
        let wallet = wallet();
        let boc = wallet.transfer_message(0, 1_700_000_000, &[transfer()]).unwrap();
        let message = Cell::from_boc(&boc).unwrap();

        let mut parser = message.parser();
        parser.load_uint(2).unwrap();
        parser.load_address().unwrap();
        parser.load_address().unwrap();
        parser.load_coins().unwrap();
        assert!(parser.load_bit().unwrap());
        assert!(parser.load_bit().unwrap());
        assert!(parser.load_bit().unwrap());
        assert_eq!(parser.remaining_bits(), 0);
        assert_eq!(message.references().len(), 2);

        let init = message.references()[0].clone();
        assert_eq!(init.hash(), wallet.address().hash);
        assert_eq!(init.references().len(), 2);
        assert_eq!(
            init.references()[0].hash(),
            WalletVersion::V3R2.code().unwrap().hash()
        );

        let mut body = message.references()[1].parser();
        body.load_bytes(64).unwrap();
        body.load_u32().unwrap();
        body.load_u32().unwrap();
        assert_eq!(body.load_u32().unwrap(), 0);
    }

    #[test]
    fn signature_verifies_against_signing_cell() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let wallet = wallet();
        let boc = wallet.transfer_message(1, 100, &[transfer()]).unwrap();
        let message = Cell::from_boc(&boc).unwrap();
        let body = message.references()[0].clone();

        let mut parser = body.parser();
        let signature: [u8; 64] = parser.load_bytes(64).unwrap().try_into().unwrap();
        let mut signing = CellBuilder::new();
        for _ in 0..parser.remaining_bits() {
            signing.store_bit(parser.load_bit().unwrap()).unwrap();
        }
        for child in body.references() {
            signing.store_reference(child.clone()).unwrap();
        }
        let signing = signing.build();

        let key = VerifyingKey::from_bytes(&wallet.public_key()).unwrap();
        key.verify(&signing.hash(), &Signature::from_bytes(&signature))
            .unwrap();
    }
}
