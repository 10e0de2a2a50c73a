use crate::{
    address::AccountId,
    cell::Cell,
    chain::{
        AccountState, AccountStatus, ChainClient, ChainError, ContractImage, GetMethodOutput,
        StackValue,
    },
};
use base64::{Engine, engine::general_purpose::STANDARD};
use num_bigint::{BigInt, Sign};
use reqwest::{Client, Url};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://toncenter.com/api/v2/";

/// `ChainClient` over the toncenter v2 HTTP API.
#[derive(Debug, Clone)]
pub struct ToncenterClient {
    http: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl ToncenterClient {
    pub fn new(
        endpoint: Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    fn url(&self, method: &str) -> Result<Url, ChainError> {
        self.endpoint
            .join(method)
            .map_err(|err| ChainError::Transport(err.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChainError> {
        let mut request = self.http.get(self.url(method)?).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request.send().await.map_err(transport)?;
        unwrap_envelope(response.json().await.map_err(transport)?)
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ChainError> {
        let mut request = self.http.post(self.url(method)?).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request.send().await.map_err(transport)?;
        unwrap_envelope(response.json().await.map_err(transport)?)
    }
}

#[async_trait::async_trait]
impl ChainClient for ToncenterClient {
    async fn account_state(&self, address: &AccountId) -> Result<AccountState, ChainError> {
        let info: AddressInformation = self
            .get("getAddressInformation", &[("address", address.to_raw())])
            .await?;
        info.try_into()
    }

    async fn run_get_method(
        &self,
        image: &ContractImage,
        address: &AccountId,
        method: &str,
        args: Vec<StackValue>,
    ) -> Result<GetMethodOutput, ChainError> {
        if !image.is_deployed() {
            return Err(ChainError::Rpc {
                code: None,
                message: format!("account {address} has no code"),
            });
        }
        let stack: Vec<Value> = args.iter().map(encode_stack_entry).collect();
        let body = json!({
            "address": address.to_raw(),
            "method": method,
            "stack": stack,
        });
        debug!(%address, method, "running get method");
        let result: RunGetMethodResult = self.post("runGetMethod", body).await?;
        let stack = result
            .stack
            .iter()
            .map(decode_stack_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GetMethodOutput {
            exit_code: result.exit_code,
            stack,
        })
    }

    async fn seqno(&self, address: &AccountId) -> Result<u32, ChainError> {
        let state = self.account_state(address).await?;
        // Not deployed yet: the first transfer carries the StateInit.
        if !state.image.is_deployed() {
            return Ok(0);
        }
        let output = self
            .run_get_method(&state.image, address, "seqno", Vec::new())
            .await?;
        decode_seqno(&output)
    }

    async fn send_message(&self, boc: Vec<u8>) -> Result<(), ChainError> {
        let _: Value = self
            .post("sendBoc", json!({ "boc": STANDARD.encode(boc) }))
            .await?;
        Ok(())
    }
}

fn decode_seqno(output: &GetMethodOutput) -> Result<u32, ChainError> {
    if !output.succeeded() {
        return Err(ChainError::Rpc {
            code: Some(output.exit_code as i64),
            message: "seqno get method failed".to_owned(),
        });
    }
    let value = output
        .stack
        .first()
        .ok_or_else(|| ChainError::Decode("empty seqno stack".to_owned()))?
        .as_i64()
        .map_err(|err| ChainError::Decode(err.to_string()))?;
    u32::try_from(value).map_err(|_| ChainError::Decode(format!("seqno {value} out of range")))
}

fn transport(err: reqwest::Error) -> ChainError {
    ChainError::Transport(err.to_string())
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    result: Option<Value>,
    error: Option<String>,
    code: Option<i64>,
}

fn unwrap_envelope<T: DeserializeOwned>(envelope: Envelope) -> Result<T, ChainError> {
    if !envelope.ok {
        return Err(ChainError::Rpc {
            code: envelope.code,
            message: envelope.error.unwrap_or_else(|| "unknown error".to_owned()),
        });
    }
    let result = envelope
        .result
        .ok_or_else(|| ChainError::Decode("missing result".to_owned()))?;
    serde_json::from_value(result).map_err(|err| ChainError::Decode(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct AddressInformation {
    balance: Value,
    #[serde(default)]
    code: String,
    #[serde(default)]
    data: String,
    state: String,
}

impl TryFrom<AddressInformation> for AccountState {
    type Error = ChainError;

    fn try_from(info: AddressInformation) -> Result<Self, Self::Error> {
        let balance = match &info.balance {
            Value::String(raw) => raw.parse::<u64>().ok(),
            Value::Number(number) => number.as_u64(),
            _ => None,
        }
        .ok_or_else(|| ChainError::Decode(format!("invalid balance {}", info.balance)))?;

        let status = match info.state.as_str() {
            "active" => AccountStatus::Active,
            "uninitialized" | "uninit" => AccountStatus::Uninit,
            "frozen" => AccountStatus::Frozen,
            _ => AccountStatus::NonExist,
        };

        Ok(AccountState {
            balance,
            status,
            image: ContractImage {
                code: decode_base64(&info.code)?,
                data: decode_base64(&info.data)?,
            },
        })
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>, ChainError> {
    STANDARD
        .decode(value)
        .map_err(|err| ChainError::Decode(format!("invalid base64: {err}")))
}

#[derive(Debug, Deserialize)]
struct RunGetMethodResult {
    exit_code: i32,
    #[serde(default)]
    stack: Vec<Value>,
}

fn encode_stack_entry(value: &StackValue) -> Value {
    match value {
        StackValue::Int(int) => json!(["num", format_hex(int)]),
        StackValue::Null => json!(["null", null]),
        StackValue::Slice(cell) => json!(["tvm.Slice", STANDARD.encode(cell.to_boc())]),
    }
}

fn format_hex(value: &BigInt) -> String {
    let (sign, magnitude) = value.clone().into_parts();
    let prefix = if sign == Sign::Minus { "-" } else { "" };
    format!("{prefix}0x{magnitude:x}")
}

fn decode_stack_entry(entry: &Value) -> Result<StackValue, ChainError> {
    let malformed = || ChainError::Decode(format!("malformed stack entry {entry}"));
    let pair = entry
        .as_array()
        .filter(|pair| pair.len() == 2)
        .ok_or_else(malformed)?;
    let kind = pair[0].as_str().ok_or_else(malformed)?;
    match kind {
        "num" | "int" => {
            let raw = pair[1].as_str().ok_or_else(malformed)?;
            parse_int(raw).map(StackValue::Int).ok_or_else(malformed)
        }
        "null" => Ok(StackValue::Null),
        "cell" | "slice" => {
            let bytes = pair[1]
                .get("bytes")
                .and_then(Value::as_str)
                .ok_or_else(malformed)?;
            let cell = Cell::from_boc(&decode_base64(bytes)?)
                .map_err(|err| ChainError::Decode(err.to_string()))?;
            Ok(StackValue::Slice(cell))
        }
        other => Err(ChainError::Decode(format!("unsupported stack entry kind {other}"))),
    }
}

fn parse_int(raw: &str) -> Option<BigInt> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => BigInt::parse_bytes(hex.as_bytes(), 16)?,
        None => BigInt::parse_bytes(digits.as_bytes(), 10)?,
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    #[test]
    fn decodes_numbers() {
        assert_eq!(
            decode_stack_entry(&json!(["num", "0x3b9aca00"])).unwrap(),
            StackValue::from(1_000_000_000)
        );
        assert_eq!(
            decode_stack_entry(&json!(["num", "-0x1"])).unwrap(),
            StackValue::from(-1)
        );
    }

    #[test]
    fn decodes_address_cells() {
        let account = AccountId::new(0, [5u8; 32]);
        let cell = CellBuilder::new()
            .store_address(Some(&account))
            .unwrap()
            .build();
        let entry = json!(["cell", { "bytes": STANDARD.encode(cell.to_boc()), "object": {} }]);
        let value = decode_stack_entry(&entry).unwrap();
        assert_eq!(value.as_address().unwrap(), Some(account));
    }

    #[test]
    fn rejects_unknown_entries() {
        assert!(decode_stack_entry(&json!(["tuple", []])).is_err());
        assert!(decode_stack_entry(&json!("num")).is_err());
    }

    #[test]
    fn encodes_big_integers_as_hex() {
        let value = StackValue::from(num_bigint::BigUint::from(255u32));
        assert_eq!(encode_stack_entry(&value), json!(["num", "0xff"]));
    }

    #[test]
    fn parses_address_information() {
        let envelope: Envelope = serde_json::from_value(json!({
            "ok": true,
            "result": {
                "balance": "5000000000",
                "code": "",
                "data": "",
                "state": "uninitialized",
                "last_transaction_id": {}
            }
        }))
        .unwrap();
        let info: AddressInformation = unwrap_envelope(envelope).unwrap();
        let state = AccountState::try_from(info).unwrap();
        assert_eq!(state.balance, 5_000_000_000);
        assert_eq!(state.status, AccountStatus::Uninit);
        assert!(!state.image.is_deployed());
    }

    #[test]
    fn decodes_seqno_output() {
        let output = GetMethodOutput {
            exit_code: 0,
            stack: vec![StackValue::from(12)],
        };
        assert_eq!(decode_seqno(&output).unwrap(), 12);

        let failed = GetMethodOutput {
            exit_code: -13,
            stack: Vec::new(),
        };
        assert!(matches!(
            decode_seqno(&failed),
            Err(ChainError::Rpc { code: Some(-13), .. })
        ));

        let negative = GetMethodOutput {
            exit_code: 0,
            stack: vec![StackValue::from(-1)],
        };
        assert!(matches!(decode_seqno(&negative), Err(ChainError::Decode(_))));
    }

    #[test]
    fn surfaces_node_errors() {
        let envelope: Envelope = serde_json::from_value(json!({
            "ok": false,
            "error": "rate limit exceeded",
            "code": 429
        }))
        .unwrap();
        let err = unwrap_envelope::<Value>(envelope).unwrap_err();
        assert!(matches!(err, ChainError::Rpc { code: Some(429), .. }));
    }
}
