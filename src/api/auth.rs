//! Owner authentication for registry requests
//!
//! A registry request carries an EIP-191 signature over a digest binding the
//! action, the account, a deadline and every field of the request. The
//! recovered signer is the caller the owner check runs against.

use crate::error::{KeeperError, KeeperResult};
use crate::registry::DepositId;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Signature, H256};
use ethers::utils::keccak256;
use serde::Deserialize;
use tracing::debug;

/// Furthest a request deadline may lie in the future, in seconds
pub const MAX_REQUEST_LIFETIME: u64 = 300;

/// Signature fields of an owner request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnerSignature {
    pub deadline: Option<u64>,
    /// 65-byte `r ‖ s ‖ v` signature of the request digest
    pub signature: Option<Bytes>,
}

/// Registry change an owner signs for
pub enum RegistryAction<'a> {
    Add {
        ids: &'a [DepositId],
        pubkeys: &'a [Bytes],
        signatures: &'a [Bytes],
    },
    Remove {
        ids: &'a [DepositId],
    },
}

impl RegistryAction<'_> {
    fn tag(&self) -> &'static str {
        match self {
            RegistryAction::Add { .. } => "addValidators",
            RegistryAction::Remove { .. } => "removeValidators",
        }
    }

    /// Digest the owner signs with `personal_sign`
    pub fn digest(&self, account: Address, deadline: u64) -> H256 {
        let mut tokens = vec![
            Token::FixedBytes(keccak256(self.tag()).to_vec()),
            Token::Address(account),
            Token::Uint(deadline.into()),
        ];
        match self {
            RegistryAction::Add {
                ids,
                pubkeys,
                signatures,
            } => {
                tokens.push(id_tokens(ids));
                tokens.push(bytes_tokens(pubkeys));
                tokens.push(bytes_tokens(signatures));
            }
            RegistryAction::Remove { ids } => tokens.push(id_tokens(ids)),
        }
        H256(keccak256(encode(&tokens)))
    }
}

fn id_tokens(ids: &[DepositId]) -> Token {
    Token::Array(
        ids.iter()
            .map(|id| Token::FixedBytes(id.as_bytes().to_vec()))
            .collect(),
    )
}

fn bytes_tokens(values: &[Bytes]) -> Token {
    Token::Array(values.iter().map(|b| Token::Bytes(b.to_vec())).collect())
}

/// Address that signed `action` for `account`.
///
/// Missing, expired, far-future or malformed signatures are `Unauthorized`.
pub fn authenticate(
    action: &RegistryAction<'_>,
    account: Address,
    auth: &OwnerSignature,
    now: u64,
) -> KeeperResult<Address> {
    let (Some(deadline), Some(signature)) = (auth.deadline, auth.signature.as_ref()) else {
        debug!("Unsigned {} request", action.tag());
        return Err(KeeperError::Unauthorized);
    };
    if deadline < now || deadline > now.saturating_add(MAX_REQUEST_LIFETIME) {
        debug!("{} request deadline {} outside window", action.tag(), deadline);
        return Err(KeeperError::Unauthorized);
    }

    let signature = Signature::try_from(&signature[..]).map_err(|e| {
        debug!("Malformed request signature: {}", e);
        KeeperError::Unauthorized
    })?;
    let digest = action.digest(account, deadline);
    signature.recover(digest.as_bytes()).map_err(|e| {
        debug!("Request signature does not recover: {}", e);
        KeeperError::Unauthorized
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    const NOW: u64 = 1_700_000_000;

    pub(crate) fn owner_wallet() -> LocalWallet {
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .unwrap()
    }

    pub(crate) fn stranger_wallet() -> LocalWallet {
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
            .parse()
            .unwrap()
    }

    /// Signature fields for `action`, signed by `wallet`
    pub(crate) async fn sign(
        wallet: &LocalWallet,
        action: &RegistryAction<'_>,
        account: Address,
        deadline: u64,
    ) -> OwnerSignature {
        let digest = action.digest(account, deadline);
        let signature = wallet.sign_message(digest.as_bytes()).await.unwrap();
        OwnerSignature {
            deadline: Some(deadline),
            signature: Some(Bytes::from(signature.to_vec())),
        }
    }

    fn account() -> Address {
        Address::from_low_u64_be(0xc3)
    }

    #[tokio::test]
    async fn test_recovers_signer() {
        let ids = [H256::repeat_byte(1)];
        let action = RegistryAction::Remove { ids: &ids };
        let auth = sign(&owner_wallet(), &action, account(), NOW + 60).await;

        let caller = authenticate(&action, account(), &auth, NOW).unwrap();
        assert_eq!(caller, owner_wallet().address());
    }

    #[tokio::test]
    async fn test_signature_is_bound_to_request_contents() {
        let ids = [H256::repeat_byte(1)];
        let pubkeys = [Bytes::from(vec![1u8; 48])];
        let signatures = [Bytes::from(vec![1u8; 96])];
        let signed = RegistryAction::Add {
            ids: &ids,
            pubkeys: &pubkeys,
            signatures: &signatures,
        };
        let auth = sign(&owner_wallet(), &signed, account(), NOW + 60).await;

        let swapped = [Bytes::from(vec![2u8; 48])];
        let tampered = RegistryAction::Add {
            ids: &ids,
            pubkeys: &swapped,
            signatures: &signatures,
        };
        let caller = authenticate(&tampered, account(), &auth, NOW).unwrap();
        assert_ne!(caller, owner_wallet().address());

        // Same ids, other action
        let removal = RegistryAction::Remove { ids: &ids };
        assert_ne!(
            removal.digest(account(), NOW + 60),
            signed.digest(account(), NOW + 60)
        );
        // Other account
        assert_ne!(
            signed.digest(Address::from_low_u64_be(0xc4), NOW + 60),
            signed.digest(account(), NOW + 60)
        );
    }

    #[tokio::test]
    async fn test_deadline_window() {
        let ids = [H256::repeat_byte(1)];
        let action = RegistryAction::Remove { ids: &ids };

        let expired = sign(&owner_wallet(), &action, account(), NOW - 1).await;
        assert!(matches!(
            authenticate(&action, account(), &expired, NOW),
            Err(KeeperError::Unauthorized)
        ));

        let far = sign(
            &owner_wallet(),
            &action,
            account(),
            NOW + MAX_REQUEST_LIFETIME + 1,
        )
        .await;
        assert!(matches!(
            authenticate(&action, account(), &far, NOW),
            Err(KeeperError::Unauthorized)
        ));

        let edge = sign(&owner_wallet(), &action, account(), NOW + MAX_REQUEST_LIFETIME).await;
        assert!(authenticate(&action, account(), &edge, NOW).is_ok());
    }

    #[test]
    fn test_missing_or_malformed_signature() {
        let ids = [H256::repeat_byte(1)];
        let action = RegistryAction::Remove { ids: &ids };

        let unsigned = OwnerSignature::default();
        assert!(matches!(
            authenticate(&action, account(), &unsigned, NOW),
            Err(KeeperError::Unauthorized)
        ));

        let short = OwnerSignature {
            deadline: Some(NOW + 60),
            signature: Some(Bytes::from(vec![7u8; 10])),
        };
        assert!(matches!(
            authenticate(&action, account(), &short, NOW),
            Err(KeeperError::Unauthorized)
        ));
    }
}
