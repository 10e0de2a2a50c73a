use crate::{
    address::AccountId,
    cell::{Cell, CellError},
};
use num_bigint::{BigInt, BigUint};
use std::{future::Future, time::Duration};
use thiserror::Error;

/// Failures talking to a chain node. All of them are transient from the
/// point of view of a domain worker.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node returned error {code:?}: {message}")]
    Rpc { code: Option<i64>, message: String },
    #[error("malformed node response: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::Decode(_) => ErrorClass::Decode,
            _ => ErrorClass::TransientNetwork,
        }
    }
}

/// How a domain worker treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientNetwork,
    Decode,
    AuctionUnavailable,
    InsufficientFunds,
    BidLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Uninit,
    Frozen,
    NonExist,
}

/// Code and data images a get-method runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractImage {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
}

impl ContractImage {
    pub fn is_deployed(&self) -> bool {
        !self.code.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub balance: u64,
    pub status: AccountStatus,
    pub image: ContractImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Null,
    Int(BigInt),
    Slice(Cell),
}

impl StackValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StackValue::Null)
    }

    pub fn is_slice(&self) -> bool {
        matches!(self, StackValue::Slice(_))
    }

    /// Decodes a `MsgAddress` slice; `addr_none` yields `Ok(None)`.
    pub fn as_address(&self) -> Result<Option<AccountId>, StackError> {
        match self {
            StackValue::Slice(cell) => Ok(cell.parser().load_address()?),
            other => Err(StackError::UnexpectedKind {
                expected: "slice",
                found: other.kind(),
            }),
        }
    }

    pub fn as_i64(&self) -> Result<i64, StackError> {
        match self {
            StackValue::Int(value) => {
                i64::try_from(value).map_err(|_| StackError::IntOutOfRange(value.to_string()))
            }
            other => Err(StackError::UnexpectedKind {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StackValue::Null => "null",
            StackValue::Int(_) => "int",
            StackValue::Slice(_) => "slice",
        }
    }
}

impl From<BigUint> for StackValue {
    fn from(value: BigUint) -> Self {
        StackValue::Int(BigInt::from(value))
    }
}

impl From<i64> for StackValue {
    fn from(value: i64) -> Self {
        StackValue::Int(BigInt::from(value))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackError {
    #[error("expected {expected} stack entry, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },
    #[error("integer {0} does not fit in 64 bits")]
    IntOutOfRange(String),
    #[error(transparent)]
    Cell(#[from] CellError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodOutput {
    pub exit_code: i32,
    pub stack: Vec<StackValue>,
}

impl GetMethodOutput {
    /// Exit code 1 is the alternative success code of the contract convention.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 || self.exit_code == 1
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    async fn account_state(&self, address: &AccountId) -> Result<AccountState, ChainError>;

    async fn run_get_method(
        &self,
        image: &ContractImage,
        address: &AccountId,
        method: &str,
        args: Vec<StackValue>,
    ) -> Result<GetMethodOutput, ChainError>;

    async fn seqno(&self, address: &AccountId) -> Result<u32, ChainError>;

    async fn send_message(&self, boc: Vec<u8>) -> Result<(), ChainError>;
}

/// Bounds a chain call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ChainError::Timeout(limit))?
}
