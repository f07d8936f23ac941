//! GPv2 order data, EIP-712 hashing and ABI codec

use crate::error::{KeeperError, KeeperResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// EIP-712 type string of a settlement order
pub const ORDER_TYPE: &str = "Order(address sellToken,address buyToken,address receiver,uint256 sellAmount,uint256 buyAmount,uint32 validTo,bytes32 appData,uint256 feeAmount,string kind,bool partiallyFillable,string sellTokenBalance,string buyTokenBalance)";

/// Length of an order UID: digest, owner, validTo
pub const ORDER_UID_LENGTH: usize = 56;

/// Whether the order sells an exact amount or buys an exact amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Sell,
    Buy,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Sell => "sell",
            OrderKind::Buy => "buy",
        }
    }

    /// `keccak256` of the kind name, as carried in the signed order
    pub fn marker(&self) -> H256 {
        H256(keccak256(self.as_str()))
    }

    pub fn from_marker(marker: H256) -> Option<Self> {
        [OrderKind::Sell, OrderKind::Buy]
            .into_iter()
            .find(|kind| kind.marker() == marker)
    }
}

/// Where sell funds are drawn from and buy funds credited to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    Erc20,
    External,
    Internal,
}

impl BalanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceKind::Erc20 => "erc20",
            BalanceKind::External => "external",
            BalanceKind::Internal => "internal",
        }
    }

    pub fn marker(&self) -> H256 {
        H256(keccak256(self.as_str()))
    }

    pub fn from_marker(marker: H256) -> Option<Self> {
        [BalanceKind::Erc20, BalanceKind::External, BalanceKind::Internal]
            .into_iter()
            .find(|kind| kind.marker() == marker)
    }
}

/// Settlement order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub sell_token: Address,
    pub buy_token: Address,
    pub receiver: Address,
    pub sell_amount: U256,
    pub buy_amount: U256,
    pub valid_to: u32,
    pub app_data: H256,
    pub fee_amount: U256,
    pub kind: OrderKind,
    pub partially_fillable: bool,
    pub sell_token_balance: BalanceKind,
    pub buy_token_balance: BalanceKind,
}

impl Order {
    /// EIP-712 struct hash
    pub fn struct_hash(&self) -> H256 {
        let mut tokens = vec![Token::FixedBytes(keccak256(ORDER_TYPE).to_vec())];
        tokens.extend(self.tokens());
        H256(keccak256(ethers::abi::encode(&tokens)))
    }

    /// EIP-712 signing digest under `domain_separator`
    pub fn digest(&self, domain_separator: H256) -> H256 {
        let mut message = Vec::with_capacity(66);
        message.extend_from_slice(b"\x19\x01");
        message.extend_from_slice(domain_separator.as_bytes());
        message.extend_from_slice(self.struct_hash().as_bytes());
        H256(keccak256(message))
    }

    /// Settlement order UID: digest, owner and validTo packed together
    pub fn uid(&self, domain_separator: H256, owner: Address) -> Bytes {
        let mut uid = Vec::with_capacity(ORDER_UID_LENGTH);
        uid.extend_from_slice(self.digest(domain_separator).as_bytes());
        uid.extend_from_slice(owner.as_bytes());
        uid.extend_from_slice(&self.valid_to.to_be_bytes());
        Bytes::from(uid)
    }

    /// `abi.encode(order)`, the signed payload format
    pub fn abi_encode(&self) -> Bytes {
        Bytes::from(ethers::abi::encode(&self.tokens()))
    }

    /// Decode an `abi.encode(order)` payload
    pub fn abi_decode(data: &[u8]) -> KeeperResult<Self> {
        let params = [
            ParamType::Address,
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(32),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
            ParamType::Bool,
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
        ];
        let tokens = ethers::abi::decode(&params, data)
            .map_err(|e| KeeperError::InvalidSignaturePayload(e.to_string()))?;
        let mut tokens = tokens.into_iter();
        let mut next = || {
            tokens
                .next()
                .ok_or_else(|| KeeperError::InvalidSignaturePayload("truncated order".to_string()))
        };

        let sell_token = address(next()?)?;
        let buy_token = address(next()?)?;
        let receiver = address(next()?)?;
        let sell_amount = uint(next()?)?;
        let buy_amount = uint(next()?)?;
        let valid_to = uint(next()?)?;
        if valid_to > U256::from(u32::MAX) {
            return Err(KeeperError::InvalidSignaturePayload(
                "validTo out of range".to_string(),
            ));
        }
        let app_data = word(next()?)?;
        let fee_amount = uint(next()?)?;
        let kind = OrderKind::from_marker(word(next()?)?)
            .ok_or_else(|| KeeperError::InvalidSignaturePayload("unknown order kind".to_string()))?;
        let partially_fillable = next()?
            .into_bool()
            .ok_or_else(|| KeeperError::InvalidSignaturePayload("expected bool".to_string()))?;
        let sell_token_balance = balance(word(next()?)?)?;
        let buy_token_balance = balance(word(next()?)?)?;

        Ok(Self {
            sell_token,
            buy_token,
            receiver,
            sell_amount,
            buy_amount,
            valid_to: valid_to.as_u32(),
            app_data,
            fee_amount,
            kind,
            partially_fillable,
            sell_token_balance,
            buy_token_balance,
        })
    }

    fn tokens(&self) -> Vec<Token> {
        vec![
            Token::Address(self.sell_token),
            Token::Address(self.buy_token),
            Token::Address(self.receiver),
            Token::Uint(self.sell_amount),
            Token::Uint(self.buy_amount),
            Token::Uint(U256::from(self.valid_to)),
            Token::FixedBytes(self.app_data.as_bytes().to_vec()),
            Token::Uint(self.fee_amount),
            Token::FixedBytes(self.kind.marker().as_bytes().to_vec()),
            Token::Bool(self.partially_fillable),
            Token::FixedBytes(self.sell_token_balance.marker().as_bytes().to_vec()),
            Token::FixedBytes(self.buy_token_balance.marker().as_bytes().to_vec()),
        ]
    }
}

fn address(token: Token) -> KeeperResult<Address> {
    token
        .into_address()
        .ok_or_else(|| KeeperError::InvalidSignaturePayload("expected address".to_string()))
}

fn uint(token: Token) -> KeeperResult<U256> {
    token
        .into_uint()
        .ok_or_else(|| KeeperError::InvalidSignaturePayload("expected uint".to_string()))
}

fn word(token: Token) -> KeeperResult<H256> {
    token
        .into_fixed_bytes()
        .filter(|bytes| bytes.len() == 32)
        .map(|bytes| H256::from_slice(&bytes))
        .ok_or_else(|| KeeperError::InvalidSignaturePayload("expected bytes32".to_string()))
}

fn balance(marker: H256) -> KeeperResult<BalanceKind> {
    BalanceKind::from_marker(marker)
        .ok_or_else(|| KeeperError::InvalidSignaturePayload("unknown balance kind".to_string()))
}
