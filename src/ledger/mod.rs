use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::Address;

pub mod events;
pub mod snapshot;

use events::{EventSink, TokenEvent};

/// Amount in the token's smallest unit.
pub type Amount = u128;

pub const DECIMALS: u8 = 18;
pub const TOTAL_SUPPLY_TOKENS: u128 = 1_000_000_000;
pub const TOTAL_SUPPLY: Amount = TOTAL_SUPPLY_TOKENS * 10u128.pow(DECIMALS as u32); // 1e27 units

/// Allowance value that delegated transfers never decrement.
pub const UNLIMITED_ALLOWANCE: Amount = Amount::MAX;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid recipient: the null address cannot receive tokens")]
    InvalidRecipient,
    #[error("invalid sender: the null address cannot send tokens")]
    InvalidSender,
    #[error("invalid approver: the null address cannot grant allowances")]
    InvalidApprover,
    #[error("invalid spender: allowances cannot be granted to the null address")]
    InvalidSpender,
    #[error("insufficient balance in {account}: has {available}, needs {requested}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        requested: Amount,
    },
    #[error("insufficient allowance for {spender} over {owner}: has {available}, needs {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        available: Amount,
        requested: Amount,
    },
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("total supply must be positive")]
    ZeroSupply,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "BLPToken".to_string(),
            symbol: "BLP".to_string(),
            decimals: DECIMALS,
        }
    }
}

/// Balances and allowances of a fixed-supply token.
///
/// Every mutating operation either applies completely and then reports its
/// events to the sink, or returns an error without touching any state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ledger {
    metadata: TokenMetadata,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    // (owner, spender) -> amount
    allowances: BTreeMap<(Address, Address), Amount>,
    height: u64,
}

impl Ledger {
    /// Issues `total_supply` to `initial_holder`. This is the only way units
    /// come into existence.
    pub fn initialize(
        initial_holder: Address,
        total_supply: Amount,
        metadata: TokenMetadata,
        sink: &mut impl EventSink,
    ) -> Result<Self, LedgerError> {
        if initial_holder.is_zero() {
            return Err(rejected("initialize", LedgerError::InvalidRecipient));
        }
        if total_supply == 0 {
            return Err(rejected("initialize", LedgerError::ZeroSupply));
        }
        let mut balances = BTreeMap::new();
        balances.insert(initial_holder, total_supply);
        let ledger = Self {
            metadata,
            total_supply,
            balances,
            allowances: BTreeMap::new(),
            height: 1,
        };
        info!(
            holder = %initial_holder,
            total_supply,
            symbol = %ledger.metadata.symbol,
            "token issued"
        );
        sink.emit(TokenEvent::Transfer {
            from: Address::ZERO,
            to: initial_holder,
            amount: total_supply,
        });
        Ok(ledger)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.metadata.decimals
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.metadata
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Count of applied state transitions, issuance included.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    /// Accounts with a nonzero balance, in address order.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    /// Sum of all balances, `None` on overflow. Equals the total supply in
    /// every reachable state.
    pub fn circulating_sum(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
    }

    /// True when replaying `log` from scratch lands on exactly this state.
    pub fn matches_log(&self, log: &events::EventLog) -> bool {
        match log.replay() {
            Some(replayed) => {
                replayed.balances == self.balances && replayed.allowances == self.allowances
            }
            None => false,
        }
    }

    pub fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
        sink: &mut impl EventSink,
    ) -> Result<(), LedgerError> {
        if caller.is_zero() {
            return Err(rejected("transfer", LedgerError::InvalidSender));
        }
        if to.is_zero() {
            return Err(rejected("transfer", LedgerError::InvalidRecipient));
        }
        self.move_balance(caller, to, amount)
            .map_err(|e| rejected("transfer", e))?;
        self.height += 1;
        debug!(from = %caller, to = %to, amount, "transfer applied");
        sink.emit(TokenEvent::Transfer {
            from: *caller,
            to: *to,
            amount,
        });
        Ok(())
    }

    /// Overwrites the allowance of `spender` over `caller`'s balance.
    pub fn approve(
        &mut self,
        caller: &Address,
        spender: &Address,
        amount: Amount,
        sink: &mut impl EventSink,
    ) -> Result<(), LedgerError> {
        if caller.is_zero() {
            return Err(rejected("approve", LedgerError::InvalidApprover));
        }
        if spender.is_zero() {
            return Err(rejected("approve", LedgerError::InvalidSpender));
        }
        self.set_allowance(caller, spender, amount);
        self.height += 1;
        debug!(owner = %caller, spender = %spender, amount, "approval applied");
        sink.emit(TokenEvent::Approval {
            owner: *caller,
            spender: *spender,
            amount,
        });
        Ok(())
    }

    /// Moves `amount` from `from` to `to` on behalf of `from`, spending the
    /// caller's allowance. An allowance of [`UNLIMITED_ALLOWANCE`] is left as is,
    /// and an `Approval` event follows only when the allowance actually moved.
    pub fn transfer_from(
        &mut self,
        caller: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
        sink: &mut impl EventSink,
    ) -> Result<(), LedgerError> {
        if caller.is_zero() {
            return Err(rejected("transfer_from", LedgerError::InvalidSpender));
        }
        if from.is_zero() {
            return Err(rejected("transfer_from", LedgerError::InvalidSender));
        }
        if to.is_zero() {
            return Err(rejected("transfer_from", LedgerError::InvalidRecipient));
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(rejected(
                "transfer_from",
                LedgerError::InsufficientBalance {
                    account: *from,
                    available,
                    requested: amount,
                },
            ));
        }
        let allowance = self.allowance(from, caller);
        if allowance < amount {
            return Err(rejected(
                "transfer_from",
                LedgerError::InsufficientAllowance {
                    owner: *from,
                    spender: *caller,
                    available: allowance,
                    requested: amount,
                },
            ));
        }

        self.move_balance(from, to, amount)
            .map_err(|e| rejected("transfer_from", e))?;
        let remaining = if amount == 0 || allowance == UNLIMITED_ALLOWANCE {
            None
        } else {
            let remaining = allowance - amount;
            self.set_allowance(from, caller, remaining);
            Some(remaining)
        };
        self.height += 1;
        debug!(
            spender = %caller,
            from = %from,
            to = %to,
            amount,
            "delegated transfer applied"
        );

        sink.emit(TokenEvent::Transfer {
            from: *from,
            to: *to,
            amount,
        });
        if let Some(remaining) = remaining {
            sink.emit(TokenEvent::Approval {
                owner: *from,
                spender: *caller,
                amount: remaining,
            });
        }
        Ok(())
    }

    // All checks happen before the first write.
    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                available: from_balance,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        set_entry(&mut self.balances, *from, from_balance - amount);
        set_entry(&mut self.balances, *to, to_balance);
        Ok(())
    }

    fn set_allowance(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        set_entry(&mut self.allowances, (*owner, *spender), amount);
    }
}

// Zero entries are removed so "never set" and "drained" look the same.
fn set_entry<K: Ord>(map: &mut BTreeMap<K, Amount>, key: K, amount: Amount) {
    if amount == 0 {
        map.remove(&key);
    } else {
        map.insert(key, amount);
    }
}

fn rejected(op: &'static str, err: LedgerError) -> LedgerError {
    warn!(op, error = %err, "ledger operation rejected");
    err
}

/// Amounts travel as decimal strings: JSON numbers cannot carry the full
/// `u128` range through every serde path.
pub(crate) mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
