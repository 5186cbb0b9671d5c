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

//! The daemon's main loop: one message from the master in, zero or more
//! reactions out, until every tracked output reaches its 100-block
//! irrevocable-resolution depth. Mirrors the `while (!all_irrevocably_resolved())`
//! loop at the bottom of `onchain.c`'s `main`.

use std::io::{Read, Write};

use bitcoin::secp256k1::{Secp256k1, Signing};
use tracing::{info, warn};

use crate::deconstruct::claim_with_preimage;
use crate::error::FatalError;
use crate::registry::Registry;
use crate::wire::{read_message, write_message, DaemonMessage, MasterMessage};

/// Drives the registry to completion, reading frames from `input` and
/// writing frames to `output`, until either every output is irrevocably
/// resolved or the master closes the pipe. `feerate_per_kw` is whatever
/// the master last reported as the current network feerate; the daemon
/// does not estimate fees itself (spec.md §1).
pub fn run<C: Signing, R: Read, W: Write>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    input: &mut R,
    output: &mut W,
    feerate_per_kw: u64,
) -> Result<(), FatalError> {
    while !registry.all_irrevocably_resolved() {
        let Some(msg) = read_message(input)? else {
            info!("master closed the connection before every output was resolved");
            return Ok(());
        };
        handle_message(secp, registry, msg, output, feerate_per_kw)?;
    }
    info!("every tracked output is irrevocably resolved; exiting");
    Ok(())
}

fn handle_message<C: Signing, W: Write>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    msg: MasterMessage,
    output: &mut W,
    feerate_per_kw: u64,
) -> Result<(), FatalError> {
    match msg {
        MasterMessage::Init(_) | MasterMessage::OnchainHtlc(_) => {
            // Handled by main.rs before entering the loop; receiving one
            // here means the master is repeating itself or our own
            // protocol state machine is out of sync.
            Err(FatalError::BadCommand("init/onchain_htlc received after the loop had already started".into()))
        }
        MasterMessage::Depth(depth) => {
            let fired = registry.apply_depth(depth.txid, depth.depth);
            for handle in fired {
                fire_proposal(registry, handle, output)?;
            }
            Ok(())
        }
        MasterMessage::Spent(spent) => {
            let handle = registry
                .iter()
                .position(|out| out.outpoint() == (spent.spent_txid, spent.spent_outnum))
                .ok_or_else(|| FatalError::BadCommand(format!("spent notification for untracked output {}:{}", spent.spent_txid, spent.spent_outnum)))?;
            if !registry.resolved_by_proposal(handle, spent.spending_txid) {
                registry.unknown_spend(handle, spent.spending_txid);
                warn!("output {}:{} spent by a transaction we did not propose", spent.spent_txid, spent.spent_outnum);
            }
            write_message(output, &DaemonMessage::UnwatchTx(spent.spending_txid))
        }
        MasterMessage::KnownPreimage(known) => {
            match claim_with_preimage(secp, registry, known.preimage, feerate_per_kw)? {
                Some(handle) => {
                    info!("preimage resolves output #{}; broadcasting HTLC-success claim", handle);
                    fire_proposal(registry, handle, output)
                }
                None => {
                    warn!("known_preimage matched no pending HTLC claim");
                    Ok(())
                }
            }
        }
    }
}

fn fire_proposal<W: Write>(registry: &Registry, handle: usize, output: &mut W) -> Result<(), FatalError> {
    let out = registry.get(handle);
    match &out.proposal {
        Some(proposal) => match &proposal.tx {
            Some(tx) => write_message(output, &DaemonMessage::BroadcastTx(tx.clone())),
            None => Ok(()),
        },
        None => Ok(()),
    }
}
