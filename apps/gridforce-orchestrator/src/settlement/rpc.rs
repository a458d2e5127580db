use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::{SigningKey, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::rlp::{self, Item};
use super::{Settlement, SettlementError};

const MINT_SIGNATURE: &str = "mintReward(address,uint256)";
const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone)]
pub struct RpcSettlementConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub contract_address: String,
    pub gas_limit: u64,
}

/// Settlement backed by an Ethereum JSON-RPC node. Each mint is a signed
/// EIP-155 legacy transaction calling `mintReward(address,uint256)`.
pub struct RpcSettlement {
    http: reqwest::Client,
    rpc_url: String,
    key: SigningKey,
    operator: [u8; 20],
    contract: [u8; 20],
    chain_id: u64,
    gas_limit: u64,
    next_id: AtomicU64,
    mint_lock: Mutex<()>,
}

impl RpcSettlement {
    /// Parses the key and contract, then reads the chain id from the node.
    pub async fn connect(config: RpcSettlementConfig) -> Result<Self, SettlementError> {
        let key = parse_signing_key(&config.private_key)?;
        let contract = parse_address(&config.contract_address)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        let mut client = Self {
            http,
            rpc_url: config.rpc_url,
            operator: address_of(key.verifying_key()),
            key,
            contract,
            chain_id: 0,
            gas_limit: config.gas_limit,
            next_id: AtomicU64::new(1),
            mint_lock: Mutex::new(()),
        };
        let chain_id = client.quantity("eth_chainId", json!([])).await?;
        client.chain_id = u64::try_from(chain_id).map_err(|_| SettlementError::InvalidQuantity {
            method: "eth_chainId".into(),
            value: chain_id.to_string(),
        })?;
        info!(
            operator = %client.operator_address(),
            chain_id = client.chain_id,
            "settlement client ready"
        );
        Ok(client)
    }

    pub fn operator_address(&self) -> String {
        format!("0x{}", hex::encode(self.operator))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, SettlementError> {
        let raw: String = self.call(method, params).await?;
        parse_quantity(&raw).ok_or_else(|| SettlementError::InvalidQuantity {
            method: method.to_string(),
            value: raw,
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, SettlementError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let envelope: RpcEnvelope<R> = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(err) = envelope.error {
            return Err(SettlementError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| SettlementError::MissingResult(method.to_string()))
    }
}

#[async_trait]
impl Settlement for RpcSettlement {
    async fn mint(&self, wallet: &str, amount: u64) -> Result<String, SettlementError> {
        let recipient = parse_address(wallet)?;
        let wei = u128::from(amount)
            .checked_mul(WEI_PER_TOKEN)
            .ok_or(SettlementError::AmountOverflow(amount))?;

        // Nonce lookup through submission must not interleave between mints.
        let _guard = self.mint_lock.lock().await;
        let nonce = self
            .quantity(
                "eth_getTransactionCount",
                json!([self.operator_address(), "pending"]),
            )
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: u128::from(self.gas_limit),
            to: self.contract,
            value: 0,
            data: mint_calldata(&recipient, wei),
        };
        let raw = tx.sign(&self.key, self.chain_id)?;
        debug!(nonce = %nonce, gas_price = %gas_price, wallet, "submitting mint transaction");
        self.call(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<R> {
    result: Option<R>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LegacyTransaction {
    nonce: u128,
    gas_price: u128,
    gas_limit: u128,
    to: [u8; 20],
    value: u128,
    data: Vec<u8>,
}

impl LegacyTransaction {
    fn fields(&self) -> Vec<Item> {
        vec![
            Item::uint(self.nonce),
            Item::uint(self.gas_price),
            Item::uint(self.gas_limit),
            Item::bytes(self.to.to_vec()),
            Item::uint(self.value),
            Item::bytes(self.data.clone()),
        ]
    }

    fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut fields = self.fields();
        fields.push(Item::uint(u128::from(chain_id)));
        fields.push(Item::uint(0));
        fields.push(Item::uint(0));
        rlp::encode(&Item::List(fields))
    }

    fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        keccak256(&self.signing_payload(chain_id))
    }

    fn sign(&self, key: &SigningKey, chain_id: u64) -> Result<Vec<u8>, SettlementError> {
        let hash = self.signing_hash(chain_id);
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&hash)
            .map_err(|err| SettlementError::Signing(err.to_string()))?;
        let bytes = signature.to_bytes();
        let v = u128::from(recovery_id.to_byte()) + 35 + 2 * u128::from(chain_id);

        let mut fields = self.fields();
        fields.push(Item::uint(v));
        fields.push(Item::uint_bytes(&bytes[..32]));
        fields.push(Item::uint_bytes(&bytes[32..]));
        Ok(rlp::encode(&Item::List(fields)))
    }
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn address_of(key: &VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn parse_signing_key(value: &str) -> Result<SigningKey, SettlementError> {
    let bytes = hex::decode(strip_hex_prefix(value))
        .map_err(|err| SettlementError::InvalidKey(err.to_string()))?;
    SigningKey::from_slice(&bytes).map_err(|err| SettlementError::InvalidKey(err.to_string()))
}

fn parse_address(value: &str) -> Result<[u8; 20], SettlementError> {
    let bytes = hex::decode(strip_hex_prefix(value))
        .map_err(|_| SettlementError::InvalidAddress(value.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SettlementError::InvalidAddress(value.to_string()))
}

fn parse_quantity(value: &str) -> Option<u128> {
    let digits = strip_hex_prefix(value);
    if digits.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(digits, 16).ok()
}

fn mint_calldata(recipient: &[u8; 20], wei: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&keccak256(MINT_SIGNATURE.as_bytes())[..4]);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&wei.to_be_bytes());
    data
}
