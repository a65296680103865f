use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::address::Address;

use super::{serde_amount, Amount, Ledger, TokenMetadata};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("state root mismatch: recorded {recorded}, computed {computed}")]
    RootMismatch { recorded: String, computed: String },
    #[error("balances sum to {sum}, total supply is {total_supply}")]
    SupplyMismatch { sum: Amount, total_supply: Amount },
    #[error("balances overflow when summed")]
    SupplyOverflow,
    #[error("null address appears in {0}")]
    NullAddress(&'static str),
    #[error("duplicate {kind} entry for {account}")]
    DuplicateEntry { kind: &'static str, account: Address },
    #[error("zero-valued {kind} entry for {account}")]
    ZeroEntry { kind: &'static str, account: Address },
    #[error("total supply must be positive")]
    ZeroSupply,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    /// Unix seconds of the last save; zero until persisted.
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    pub account: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceEntry {
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub token: TokenMetadata,
    #[serde(with = "serde_amount")]
    pub total_supply: Amount,
    pub balances: Vec<BalanceEntry>,
    pub allowances: Vec<AllowanceEntry>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl Ledger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: SnapshotMetadata {
                height: self.height,
                timestamp: 0,
            },
            token: self.metadata.clone(),
            total_supply: self.total_supply,
            balances: self
                .balances
                .iter()
                .map(|(account, amount)| BalanceEntry {
                    account: *account,
                    amount: *amount,
                })
                .collect(),
            allowances: self
                .allowances
                .iter()
                .map(|((owner, spender), amount)| AllowanceEntry {
                    owner: *owner,
                    spender: *spender,
                    amount: *amount,
                })
                .collect(),
            state_root: self.state_root(),
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.metadata,
            self.total_supply,
            self.height,
            &self.balances,
            &self.allowances,
        )
    }

    /// Rebuilds a ledger from a snapshot, refusing anything that could not
    /// have been produced by ledger operations.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, SnapshotError> {
        if snapshot.total_supply == 0 {
            return Err(SnapshotError::ZeroSupply);
        }

        let mut balances = BTreeMap::new();
        for entry in &snapshot.balances {
            if entry.account.is_zero() {
                return Err(SnapshotError::NullAddress("balances"));
            }
            if entry.amount == 0 {
                return Err(SnapshotError::ZeroEntry {
                    kind: "balance",
                    account: entry.account,
                });
            }
            if balances.insert(entry.account, entry.amount).is_some() {
                return Err(SnapshotError::DuplicateEntry {
                    kind: "balance",
                    account: entry.account,
                });
            }
        }

        let mut allowances = BTreeMap::new();
        for entry in &snapshot.allowances {
            if entry.owner.is_zero() || entry.spender.is_zero() {
                return Err(SnapshotError::NullAddress("allowances"));
            }
            if entry.amount == 0 {
                return Err(SnapshotError::ZeroEntry {
                    kind: "allowance",
                    account: entry.owner,
                });
            }
            if allowances
                .insert((entry.owner, entry.spender), entry.amount)
                .is_some()
            {
                return Err(SnapshotError::DuplicateEntry {
                    kind: "allowance",
                    account: entry.owner,
                });
            }
        }

        let sum = balances
            .values()
            .try_fold(0u128, |acc: Amount, v| acc.checked_add(*v))
            .ok_or(SnapshotError::SupplyOverflow)?;
        if sum != snapshot.total_supply {
            return Err(SnapshotError::SupplyMismatch {
                sum,
                total_supply: snapshot.total_supply,
            });
        }

        let computed = compute_state_root(
            &snapshot.token,
            snapshot.total_supply,
            snapshot.meta.height,
            &balances,
            &allowances,
        );
        if computed != snapshot.state_root {
            return Err(SnapshotError::RootMismatch {
                recorded: hex::encode(snapshot.state_root),
                computed: hex::encode(computed),
            });
        }

        debug!(
            height = snapshot.meta.height,
            holders = balances.len(),
            allowances = allowances.len(),
            "ledger restored from snapshot"
        );
        Ok(Self {
            metadata: snapshot.token,
            total_supply: snapshot.total_supply,
            balances,
            allowances,
            height: snapshot.meta.height,
        })
    }
}

fn compute_state_root(
    token: &TokenMetadata,
    total_supply: Amount,
    height: u64,
    balances: &BTreeMap<Address, Amount>,
    allowances: &BTreeMap<(Address, Address), Amount>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(1 + balances.len() + allowances.len());

    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update((token.name.len() as u64).to_le_bytes());
    hasher.update(token.name.as_bytes());
    hasher.update((token.symbol.len() as u64).to_le_bytes());
    hasher.update(token.symbol.as_bytes());
    hasher.update([token.decimals]);
    hasher.update(total_supply.to_le_bytes());
    hasher.update(height.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, amount) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"bal");
        hasher.update(account.as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for ((owner, spender), amount) in allowances {
        let mut hasher = Sha256::new();
        hasher.update(b"allow");
        hasher.update(owner.as_bytes());
        hasher.update(spender.as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"blp-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Lists accounts that appear anywhere in a snapshot.
pub fn known_accounts(snapshot: &LedgerSnapshot) -> BTreeSet<Address> {
    let mut accounts: BTreeSet<Address> = snapshot.balances.iter().map(|e| e.account).collect();
    for entry in &snapshot.allowances {
        accounts.insert(entry.owner);
        accounts.insert(entry.spender);
    }
    accounts
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let raw = hex::decode(&encoded).map_err(D::Error::custom)?;
        raw.as_slice()
            .try_into()
            .map_err(|_| D::Error::custom(format!("state root must be 32 bytes, got {}", raw.len())))
    }
}
