// Onchain resolution daemon for a Lightning Network channel.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! End-to-end scenarios driving the registry/classifier/deconstructors
//! the way `main.rs` does, minus the process boundary: transactions and
//! messages are built in-process and fed straight to the library.

use bitcoin::blockdata::locktime::absolute::LockTime;
use bitcoin::blockdata::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{ScriptBuf, Txid};

use onchaind::classify::{build_commitment_locktime_and_sequence, classify, commit_number_obscurer, ClosingKind};
use onchaind::deconstruct::{our_unilateral, their_unilateral, UnilateralContext};
use onchaind::feerate::FeerateRange;
use onchaind::keys::derive_keyset;
use onchaind::registry::Registry;
use onchaind::scripts::{p2wpkh, p2wsh, to_self_wscript};
use onchaind::types::{HtlcStub, OutputType, Side, TxType};

fn secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

fn pubkey<C: bitcoin::secp256k1::Signing>(secp: &Secp256k1<C>, byte: u8) -> PublicKey {
    PublicKey::from_secret_key(secp, &secret(byte))
}

fn funding_txid() -> Txid {
    Txid::from_slice(&[0xAA; 32]).unwrap()
}

fn single_input_tx(spend: Txid, locktime: u32, sequence: u32, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 2,
        lock_time: LockTime::from_consensus(locktime),
        input: vec![TxIn {
            previous_output: OutPoint::new(spend, 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence(sequence),
            witness: Witness::new(),
        }],
        output: outputs,
    }
}

/// Scenario 1: mutual close resolves the funding output immediately, at
/// depth zero pending confirmations, with no deconstruction at all.
#[test]
fn scenario_mutual_close_resolves_immediately() {
    let mut registry = Registry::new();
    registry.track(funding_txid(), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);

    let closing_tx = single_input_tx(funding_txid(), 0, 0xFFFFFFFF, vec![TxOut { value: 995_000, script_pubkey: ScriptBuf::new() }]);
    assert!(matches!(classify(&closing_tx, 0, 0, None).unwrap(), ClosingKind::MutualClose));

    registry.resolved_by_other(0, closing_tx.txid(), TxType::MutualClose);
    assert_eq!(registry.get(0).resolved.unwrap().tx_type, TxType::MutualClose);
    assert!(!registry.all_irrevocably_resolved());
    registry.apply_depth(closing_tx.txid(), 100);
    assert!(registry.all_irrevocably_resolved());
}

/// Scenario 2: we broadcast our own commitment with a single delayed
/// output; the daemon proposes the delayed-claim spend and it resolves
/// only once both the commitment and the claim reach 100 confirmations.
#[test]
fn scenario_our_unilateral_single_output() {
    let secp = Secp256k1::new();
    let per_commitment_point = pubkey(&secp, 1);
    let other_revocation_basepoint = pubkey(&secp, 2);
    let self_delayed_basepoint = pubkey(&secp, 3);
    let self_htlc_basepoint = pubkey(&secp, 4);
    let other_htlc_basepoint = pubkey(&secp, 9);
    let other_payment_basepoint = pubkey(&secp, 5);

    let keys = derive_keyset(
        &secp,
        &per_commitment_point,
        &self_delayed_basepoint,
        &self_htlc_basepoint,
        &other_revocation_basepoint,
        &other_htlc_basepoint,
        &other_payment_basepoint,
    )
    .unwrap();

    let to_self_delay = 144u16;
    let wscript = to_self_wscript(&keys.revocation_pubkey, &keys.delayed_pubkey, to_self_delay);
    let outputs = vec![TxOut { value: 995_000, script_pubkey: p2wsh(&wscript) }];

    let obscurer = commit_number_obscurer(&other_payment_basepoint, &other_payment_basepoint);
    let (locktime, sequence) = build_commitment_locktime_and_sequence(0, obscurer);
    let commitment_tx = single_input_tx(funding_txid(), locktime, sequence, outputs);

    let kind = classify(&commitment_tx, obscurer, 0, None).unwrap();
    assert!(matches!(kind, ClosingKind::OurUnilateral { commitment_number: 0 }));

    let mut registry = Registry::new();
    registry.track(funding_txid(), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);
    registry.resolved_by_other(0, commitment_tx.txid(), TxType::OurUnilateral);

    let ctx = UnilateralContext {
        tx: &commitment_tx,
        blockheight: 100,
        broadcaster: Side::Local,
        keys,
        self_delayed_privkey: secret(3),
        self_htlc_privkey: secret(4),
        to_self_delay,
        wallet_destination: ScriptBuf::new(),
        htlcs: &[],
        funding_satoshi: 1_000_000,
    };
    our_unilateral(&secp, &mut registry, &ctx, 253).unwrap();

    assert_eq!(registry.len(), 2);
    let claim = registry.get(1).proposal.as_ref().unwrap();
    assert_eq!(claim.depth_required, to_self_delay as u32);

    registry.apply_depth(commitment_tx.txid(), 100);
    assert!(!registry.all_irrevocably_resolved());
    let claim_tx = claim.tx.clone().unwrap();
    let fired = registry.apply_depth(commitment_tx.txid(), 144);
    assert_eq!(fired, vec![1]);
    assert!(registry.resolved_by_proposal(1, claim_tx.txid()));
    registry.apply_depth(claim_tx.txid(), 100);
    assert!(registry.all_irrevocably_resolved());
}

/// Scenario 3: the counterparty broadcasts their current (non-revoked)
/// commitment, carrying an HTLC they offered us; our own output resolves
/// immediately, the HTLC is stashed for a later preimage claim.
#[test]
fn scenario_their_unilateral_with_htlc_offered_to_us() {
    let secp = Secp256k1::new();
    let our_remote_pubkey = pubkey(&secp, 10);
    let revocation = pubkey(&secp, 11);
    let broadcaster_htlc = pubkey(&secp, 12);
    let our_htlc = pubkey(&secp, 13);

    let keys = onchaind::types::KeySet {
        revocation_pubkey: revocation,
        delayed_pubkey: pubkey(&secp, 14),
        remote_pubkey: our_remote_pubkey,
        broadcaster_htlc_pubkey: broadcaster_htlc,
        nonbroadcaster_htlc_pubkey: our_htlc,
    };

    let htlc = HtlcStub { owner: Side::Remote, cltv_expiry: 700_500, ripemd: [7u8; 20] };
    let commitment_tx = single_input_tx(
        funding_txid(),
        0x20000001,
        0x80000000,
        vec![
            TxOut { value: 400_000, script_pubkey: p2wpkh(&our_remote_pubkey) },
            TxOut { value: 50_000, script_pubkey: ScriptBuf::new() },
        ],
    );

    let mut registry = Registry::new();
    registry.track(funding_txid(), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);
    registry.resolved_by_other(0, commitment_tx.txid(), TxType::TheirUnilateral);

    let ctx = UnilateralContext {
        tx: &commitment_tx,
        blockheight: 100,
        broadcaster: Side::Remote,
        keys,
        self_delayed_privkey: secret(20),
        self_htlc_privkey: secret(13),
        to_self_delay: 144,
        wallet_destination: ScriptBuf::new(),
        htlcs: &[(1, htlc)],
        funding_satoshi: 1_000_000,
    };
    their_unilateral(&secp, &mut registry, &ctx).unwrap();

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.get(1).output_type, OutputType::OutputToUs);
    assert_eq!(registry.get(1).proposal.as_ref().unwrap().depth_required, 0);
    assert_eq!(registry.get(2).output_type, OutputType::OurHtlc);
    assert!(registry.get(2).pending_htlc_claim.is_some());
}

/// Scenario 4: a revoked commitment is detected and routed to the loud
/// cheat-handling stub rather than silently ignored.
#[test]
fn scenario_revoked_commitment_is_detected() {
    let secp = Secp256k1::new();
    let funder = pubkey(&secp, 30);
    let fundee = pubkey(&secp, 31);
    let obscurer = commit_number_obscurer(&funder, &fundee);

    let (locktime, sequence) = build_commitment_locktime_and_sequence(5, obscurer);
    let tx = single_input_tx(funding_txid(), locktime, sequence, vec![TxOut { value: 900_000, script_pubkey: ScriptBuf::new() }]);

    let kind = classify(&tx, obscurer, 9, Some(5)).unwrap();
    assert!(matches!(kind, ClosingKind::TheirUnilateralRevoked { commitment_number: 5, owner: Side::Remote }));
}

/// Scenario 5: the fee-rate range narrows exactly per the literal vector
/// in SPEC_FULL.md, matching the behavior a `spent` depth confirmation
/// of a known-multiplier transaction would trigger.
#[test]
fn scenario_feerate_narrowing_matches_literal_vector() {
    let mut range = FeerateRange::init(1_000_000, &[995_000]);
    assert_eq!((range.min, range.max), (0, 6907));
    range.narrow(3313, onchaind::feerate::HTLC_TIMEOUT_MULTIPLIER);
    assert_eq!((range.min, range.max), (3489, 6504));
}

/// Scenario 6: every output reaching its irrevocable-resolution depth is
/// exactly the condition that ends the event loop; a single unresolved
/// output (even at high depth) keeps it open.
#[test]
fn scenario_all_irrevocably_resolved_gates_on_every_output() {
    let mut registry = Registry::new();
    let h0 = registry.track(funding_txid(), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);
    let h1 = registry.track(funding_txid(), 100, TxType::TheirUnilateral, 1, 50_000, OutputType::TheirHtlc);
    registry.resolved_by_other(h0, Txid::from_slice(&[1u8; 32]).unwrap(), TxType::TheirUnilateral);
    registry.propose_at_block(h1, None, 244, TxType::TheirHtlcTimeoutToThem);

    registry.apply_depth(Txid::from_slice(&[1u8; 32]).unwrap(), 100);
    assert!(!registry.all_irrevocably_resolved());

    let fired = registry.apply_depth(funding_txid(), 144);
    assert_eq!(fired, vec![h1]);
    registry.ignore(h1);
    registry.apply_depth(funding_txid(), 100);
    assert!(registry.all_irrevocably_resolved());
}
