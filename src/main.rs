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

//! `onchaind`: watches whatever transaction spends a channel's funding
//! output, classifies it, and drives every resulting output to an
//! irrevocably resolved state per BOLT-5. Spoken to by a master process
//! over framed stdin/stdout (`wire.rs`); never touches the network or a
//! wallet itself.

#![deny(non_upper_case_globals, non_camel_case_types, non_snake_case, unused_mut)]

use std::io;
use std::process::ExitCode;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Transaction;
use clap::Parser;
use tracing::{error, info};

use onchaind::classify::{classify, commit_number_obscurer, ClosingKind};
use onchaind::deconstruct::{handle_their_cheat, our_unilateral, their_unilateral, UnilateralContext};
use onchaind::error::FatalError;
use onchaind::keys::derive_keyset;
use onchaind::registry::Registry;
use onchaind::types::{HtlcStub, OutputType, Side, TxType};
use onchaind::wire::{read_message, write_message, DaemonMessage, FundingSpentMessage, InitMessage, MasterMessage, OnchainHtlcMessage};

/// On-chain resolution daemon for a single Lightning Network channel.
#[derive(Parser, Debug)]
#[command(name = "onchaind", version, about)]
struct Args {
    /// Current network feerate, satoshi per 1000 weight units. Until the
    /// first `funding_spent` message carries a fresher one, this value
    /// is used for any proposal the daemon needs to build on its own
    /// initiative (there are none before that point).
    #[arg(long, default_value_t = 253)]
    initial_feerate_per_kw: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_env("ONCHAIND_LOG").unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

fn run(args: Args) -> Result<(), FatalError> {
    let secp = Secp256k1::new();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    let init = read_init(&mut input)?;
    info!("initialized: funding {}:{}, {} sat, funder={:?}", init.funding_txid, init.funding_outnum, init.funding_satoshi, init.funder);

    let mut htlcs = Vec::with_capacity(init.htlc_count as usize);
    for _ in 0..init.htlc_count {
        let htlc = read_onchain_htlc(&mut input)?;
        htlcs.push((htlc.outnum, htlc.stub));
    }

    let mut registry = Registry::new();
    registry.track(init.funding_txid, 0, TxType::FundingTransaction, init.funding_outnum, init.funding_satoshi, OutputType::FundingOutput);
    write_message(&mut output, &DaemonMessage::InitReply)?;

    let funding_spent = match read_message(&mut input)? {
        Some(MasterMessage::FundingSpent(msg)) => msg,
        Some(_) => return Err(FatalError::BadCommand("expected funding_spent as the next message after init".into())),
        None => {
            info!("master closed the connection before the funding output was spent");
            return Ok(());
        }
    };

    let feerate_per_kw = if funding_spent.feerate_per_kw > 0 { funding_spent.feerate_per_kw } else { args.initial_feerate_per_kw };

    let tx: Transaction = bitcoin::consensus::deserialize(&funding_spent.raw_tx)
        .map_err(|e| FatalError::BadCommand(format!("funding_spent carried an unparseable transaction: {e}")))?;

    let (funder_payment_basepoint, fundee_payment_basepoint) = match init.funder {
        Side::Local => (init.local_payment_basepoint, init.remote_payment_basepoint),
        Side::Remote => (init.remote_payment_basepoint, init.local_payment_basepoint),
    };
    let obscurer = commit_number_obscurer(&funder_payment_basepoint, &fundee_payment_basepoint);

    let kind = classify(&tx, obscurer, init.our_commitment_number, funding_spent.their_last_revoked)?;
    let txid = tx.txid();

    match kind {
        ClosingKind::MutualClose => {
            info!("funding output closed by mutual close");
            registry.resolved_by_other(0, txid, TxType::MutualClose);
        }
        ClosingKind::OurUnilateral { commitment_number } => {
            info!("funding output closed by our own unilateral commitment #{commitment_number}");
            registry.resolved_by_other(0, txid, TxType::OurUnilateral);
            let ctx = build_unilateral_context(&secp, &init, &funding_spent, &tx, Side::Local, &htlcs)?;
            our_unilateral(&secp, &mut registry, &ctx, feerate_per_kw)?;
        }
        ClosingKind::TheirUnilateralCurrent { commitment_number } => {
            info!("funding output closed by their current unilateral commitment #{commitment_number}");
            registry.resolved_by_other(0, txid, TxType::TheirUnilateral);
            let ctx = build_unilateral_context(&secp, &init, &funding_spent, &tx, Side::Remote, &htlcs)?;
            their_unilateral(&secp, &mut registry, &ctx)?;
        }
        ClosingKind::TheirUnilateralRevoked { commitment_number, .. } => {
            registry.resolved_by_other(0, txid, TxType::TheirUnilateral);
            handle_their_cheat(commitment_number)?;
        }
    }

    onchaind::eventloop::run(&secp, &mut registry, &mut input, &mut output, feerate_per_kw)
}

fn read_init<R: io::Read>(input: &mut R) -> Result<InitMessage, FatalError> {
    match read_message(input)? {
        Some(MasterMessage::Init(msg)) => Ok(msg),
        Some(_) => Err(FatalError::BadCommand("expected init as the first message".into())),
        None => Err(FatalError::BadCommand("master closed the connection before sending init".into())),
    }
}

fn read_onchain_htlc<R: io::Read>(input: &mut R) -> Result<OnchainHtlcMessage, FatalError> {
    match read_message(input)? {
        Some(MasterMessage::OnchainHtlc(msg)) => Ok(msg),
        Some(_) => Err(FatalError::BadCommand("expected onchain_htlc while reading the HTLC set".into())),
        None => Err(FatalError::BadCommand("master closed the connection while sending the HTLC set".into())),
    }
}

/// Derives the keyset and secrets needed to deconstruct whichever side's
/// commitment was actually broadcast, from the one-shot material carried
/// in `funding_spent`.
fn build_unilateral_context<'a, C: bitcoin::secp256k1::Signing>(
    secp: &Secp256k1<C>,
    init: &InitMessage,
    funding_spent: &FundingSpentMessage,
    tx: &'a Transaction,
    broadcaster: Side,
    htlcs: &'a [(u32, HtlcStub)],
) -> Result<UnilateralContext<'a>, FatalError> {
    let self_payment_privkey = secret_key(&funding_spent.self_payment_basepoint_secret)?;
    let self_delayed_privkey = secret_key(&funding_spent.self_delayed_payment_basepoint_secret)?;
    let self_htlc_privkey = secret_key(&funding_spent.self_htlc_basepoint_secret)?;
    let self_payment_basepoint = PublicKey::from_secret_key(secp, &self_payment_privkey);
    let self_delayed_basepoint = PublicKey::from_secret_key(secp, &self_delayed_privkey);
    let self_htlc_basepoint = PublicKey::from_secret_key(secp, &self_htlc_privkey);

    let keys = match broadcaster {
        Side::Local => derive_keyset(
            secp,
            &funding_spent.per_commitment_point,
            &self_delayed_basepoint,
            &self_htlc_basepoint,
            &funding_spent.other_revocation_basepoint,
            &funding_spent.other_htlc_basepoint,
            &funding_spent.other_payment_basepoint,
        )?,
        Side::Remote => derive_keyset(
            secp,
            &funding_spent.per_commitment_point,
            &funding_spent.other_delayed_payment_basepoint,
            &funding_spent.other_htlc_basepoint,
            &funding_spent.self_revocation_basepoint,
            &self_htlc_basepoint,
            &self_payment_basepoint,
        )?,
    };

    Ok(UnilateralContext {
        tx,
        blockheight: funding_spent.blockheight,
        broadcaster,
        keys,
        self_delayed_privkey,
        self_htlc_privkey,
        to_self_delay: init.to_self_delay,
        wallet_destination: bitcoin::ScriptBuf::new(),
        htlcs,
        funding_satoshi: init.funding_satoshi,
    })
}

fn secret_key(bytes: &[u8; 32]) -> Result<SecretKey, FatalError> {
    SecretKey::from_slice(bytes).map_err(|e| FatalError::CryptoFailed(format!("invalid basepoint secret: {e}")))
}
