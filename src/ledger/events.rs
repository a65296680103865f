use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;

use super::Amount;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    /// Balance movement. Issuance is reported with `from == Address::ZERO`.
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "super::serde_amount")]
        amount: Amount,
    },
    /// New allowance of `spender` over `owner`'s balance.
    Approval {
        owner: Address,
        spender: Address,
        #[serde(with = "super::serde_amount")]
        amount: Amount,
    },
}

impl TokenEvent {
    pub fn involves(&self, account: &Address) -> bool {
        match self {
            TokenEvent::Transfer { from, to, .. } => from == account || to == account,
            TokenEvent::Approval { owner, spender, .. } => owner == account || spender == account,
        }
    }
}

/// Receives events after a ledger operation has been applied.
pub trait EventSink {
    fn emit(&mut self, event: TokenEvent);
}

/// Drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&mut self, _event: TokenEvent) {}
}

/// Append-only, ordered record of emitted events.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<TokenEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&TokenEvent> {
        self.events.last()
    }

    pub fn involving<'a>(&'a self, account: &'a Address) -> impl Iterator<Item = &'a TokenEvent> {
        self.events.iter().filter(move |e| e.involves(account))
    }
}

/// Holdings rebuilt from an event log alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayedState {
    pub balances: BTreeMap<Address, Amount>,
    pub allowances: BTreeMap<(Address, Address), Amount>,
}

impl EventLog {
    /// Folds every event in order. Returns `None` if the log moves more than
    /// an account holds or overflows, which a genuine log never does.
    pub fn replay(&self) -> Option<ReplayedState> {
        let mut state = ReplayedState::default();
        for event in &self.events {
            match event {
                TokenEvent::Transfer { from, to, amount } => {
                    if !from.is_zero() {
                        let held = state.balances.get(from).copied().unwrap_or(0);
                        let left = held.checked_sub(*amount)?;
                        if left == 0 {
                            state.balances.remove(from);
                        } else {
                            state.balances.insert(*from, left);
                        }
                    }
                    if *amount > 0 {
                        let entry = state.balances.entry(*to).or_insert(0);
                        *entry = entry.checked_add(*amount)?;
                    }
                }
                TokenEvent::Approval {
                    owner,
                    spender,
                    amount,
                } => {
                    if *amount == 0 {
                        state.allowances.remove(&(*owner, *spender));
                    } else {
                        state.allowances.insert((*owner, *spender), *amount);
                    }
                }
            }
        }
        Some(state)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: TokenEvent) {
        self.events.push(event);
    }
}

impl EventSink for Vec<TokenEvent> {
    fn emit(&mut self, event: TokenEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    #[test]
    fn log_keeps_order_and_filters_by_account() {
        let mut log = EventLog::new();
        log.emit(TokenEvent::Transfer {
            from: Address::ZERO,
            to: addr(1),
            amount: 10,
        });
        log.emit(TokenEvent::Approval {
            owner: addr(1),
            spender: addr(2),
            amount: 5,
        });
        log.emit(TokenEvent::Transfer {
            from: addr(1),
            to: addr(3),
            amount: 1,
        });
        assert_eq!(log.len(), 3);
        assert_eq!(log.involving(&addr(2)).count(), 1);
        assert_eq!(log.involving(&addr(1)).count(), 3);
        assert!(matches!(log.last(), Some(TokenEvent::Transfer { amount: 1, .. })));
    }

    #[test]
    fn replay_folds_transfers_and_latest_approvals() {
        let mut log = EventLog::new();
        log.emit(TokenEvent::Transfer {
            from: Address::ZERO,
            to: addr(1),
            amount: 100,
        });
        log.emit(TokenEvent::Transfer {
            from: addr(1),
            to: addr(2),
            amount: 100,
        });
        log.emit(TokenEvent::Approval {
            owner: addr(2),
            spender: addr(3),
            amount: 40,
        });
        log.emit(TokenEvent::Approval {
            owner: addr(2),
            spender: addr(3),
            amount: 15,
        });
        let state = log.replay().unwrap();
        assert_eq!(state.balances.get(&addr(1)), None);
        assert_eq!(state.balances.get(&addr(2)), Some(&100));
        assert_eq!(state.allowances.get(&(addr(2), addr(3))), Some(&15));

        log.emit(TokenEvent::Transfer {
            from: addr(1),
            to: addr(2),
            amount: 1,
        });
        assert!(log.replay().is_none());
    }

    #[test]
    fn events_serialize_tagged() {
        let event = TokenEvent::Approval {
            owner: addr(1),
            spender: addr(2),
            amount: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "approval");
        assert_eq!(json["amount"], "7");
        let back: TokenEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
