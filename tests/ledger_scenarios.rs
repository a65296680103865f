use blp_token::{
    Address, Amount, EventLog, Ledger, LedgerError, NoopSink, TokenEvent, TokenMetadata,
    TOTAL_SUPPLY,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn addr(b: u8) -> Address {
    Address::new([b; 20])
}

fn deploy(owner: Address) -> (Ledger, EventLog) {
    let mut log = EventLog::new();
    let ledger = Ledger::initialize(owner, TOTAL_SUPPLY, TokenMetadata::default(), &mut log)
        .expect("issuance");
    (ledger, log)
}

fn assert_supply_intact(ledger: &Ledger) {
    assert_eq!(ledger.circulating_sum(), Some(ledger.total_supply()));
}

#[test]
fn whole_supply_goes_to_the_dao_wallet() {
    let owner = addr(0xda);
    let (ledger, log) = deploy(owner);
    assert_eq!(ledger.balance_of(&owner), 1_000_000_000 * 10u128.pow(18));
    assert_eq!(ledger.total_supply(), ledger.balance_of(&owner));
    assert_eq!(ledger.decimals(), 18);
    assert_eq!(ledger.name(), "BLPToken");
    assert_eq!(ledger.symbol(), "BLP");
    assert_eq!(ledger.holders().count(), 1);
    assert_eq!(log.len(), 1);
}

#[test]
fn direct_transfer_moves_exact_amount() {
    let (owner, recipient) = (addr(1), addr(2));
    let (mut ledger, mut log) = deploy(owner);
    ledger.transfer(&owner, &recipient, 1000, &mut log).unwrap();

    assert_eq!(ledger.balance_of(&owner), TOTAL_SUPPLY - 1000);
    assert_eq!(ledger.balance_of(&recipient), 1000);
    assert_supply_intact(&ledger);
    assert_eq!(
        log.last(),
        Some(&TokenEvent::Transfer {
            from: owner,
            to: recipient,
            amount: 1000,
        })
    );
}

#[test]
fn approved_spender_drains_allowance_then_is_refused() {
    let (owner, spender, recipient) = (addr(1), addr(2), addr(3));
    let (mut ledger, mut log) = deploy(owner);

    ledger.approve(&owner, &spender, 500, &mut log).unwrap();
    assert_eq!(ledger.allowance(&owner, &spender), 500);

    ledger
        .transfer_from(&spender, &owner, &recipient, 500, &mut log)
        .unwrap();
    assert_eq!(ledger.allowance(&owner, &spender), 0);
    assert_eq!(ledger.balance_of(&owner), TOTAL_SUPPLY - 500);
    assert_eq!(ledger.balance_of(&recipient), 500);
    assert_supply_intact(&ledger);

    let events_before = log.len();
    let err = ledger
        .transfer_from(&spender, &owner, &recipient, 1, &mut log)
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientAllowance {
            owner,
            spender,
            available: 0,
            requested: 1,
        }
    );
    assert_eq!(log.len(), events_before);
    assert_eq!(ledger.balance_of(&recipient), 500);
}

#[test]
fn null_recipient_is_refused_everywhere() {
    let (owner, spender) = (addr(1), addr(2));
    let (mut ledger, _) = deploy(owner);
    ledger.approve(&owner, &spender, 10, &mut NoopSink).unwrap();

    assert_eq!(
        ledger.transfer(&owner, &Address::ZERO, 0, &mut NoopSink),
        Err(LedgerError::InvalidRecipient)
    );
    assert_eq!(
        ledger.transfer_from(&spender, &owner, &Address::ZERO, 5, &mut NoopSink),
        Err(LedgerError::InvalidRecipient)
    );
    assert_eq!(ledger.allowance(&owner, &spender), 10);
    assert_eq!(ledger.balance_of(&owner), TOTAL_SUPPLY);
}

#[test]
fn random_operations_preserve_supply_and_replay_cleanly() {
    let accounts: Vec<Address> = (1..=6).map(addr).collect();
    let (mut ledger, mut log) = deploy(accounts[0]);
    let mut rng = StdRng::seed_from_u64(0xb1b);

    for _ in 0..2_000 {
        let a = accounts[rng.gen_range(0..accounts.len())];
        let b = accounts[rng.gen_range(0..accounts.len())];
        let c = accounts[rng.gen_range(0..accounts.len())];
        let held = ledger.balance_of(&a);
        // Occasionally ask for more than is held to exercise the failure path.
        let amount: Amount = if held == 0 || rng.gen_bool(0.1) {
            held.saturating_add(rng.gen_range(0..1_000))
        } else {
            rng.gen_range(0..=held)
        };

        let before = ledger.clone();
        let result = match rng.gen_range(0..3) {
            0 => ledger.transfer(&a, &b, amount, &mut log),
            1 => ledger.approve(&a, &b, amount, &mut log),
            _ => ledger.transfer_from(&b, &a, &c, amount, &mut log),
        };
        if result.is_err() {
            assert_eq!(ledger, before, "failed operation mutated state");
        }
        assert_supply_intact(&ledger);
    }

    assert!(ledger.matches_log(&log));
    let snapshot = ledger.snapshot();
    assert_eq!(Ledger::restore(snapshot).unwrap(), ledger);
}
