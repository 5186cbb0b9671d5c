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

//! Framed messages exchanged with the master process over stdin/stdout.
//! Each frame is a 2-byte big-endian message type, a 2-byte big-endian
//! payload length, and the payload itself, lightning-encoded per BOLT-1's
//! own TLV-free message framing. Mirrors the `onchain_init`/`depth`/
//! `spend` message family read by `onchain.c`'s `main` loop, collapsed
//! into a single typed enum instead of the source's raw `msg_type()`
//! dispatch.

use std::io::{self, Read, Write};

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Transaction, Txid};
use lightning_encoding::{LightningDecode, LightningEncode};

use crate::error::FatalError;
use crate::types::{HtlcStub, Side};

/// One-time setup sent by the master when the daemon is spawned. Kept
/// deliberately small; anything not needed to recognize the funding
/// output and recover the commitment obscurer is the master's problem,
/// not ours.
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct InitMessage {
    pub funding_txid: Txid,
    pub funding_outnum: u32,
    pub funding_satoshi: u64,
    pub to_self_delay: u16,
    pub our_commitment_number: u64,
    pub funder: Side,
    pub local_payment_basepoint: PublicKey,
    pub remote_payment_basepoint: PublicKey,
    pub htlc_count: u16,
}

/// An HTLC carried by our latest commitment, sent `htlc_count` times
/// right after `init` so the daemon can recognize it in whatever
/// transaction ultimately spends the funding output.
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct OnchainHtlcMessage {
    pub outnum: u32,
    pub stub: HtlcStub,
}

/// The funding output has been spent. Carries everything the daemon
/// needs to classify the spend and, if it is a unilateral close, derive
/// every output's witness script: the raw transaction, the
/// per-commitment point it was built from, and the secrets backing our
/// own three basepoints. Key derivation and per-commitment-point
/// generation are themselves out of scope (spec.md §1); the master is
/// assumed to have already computed `per_commitment_point` for whichever
/// commitment turns out to have been broadcast.
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct FundingSpentMessage {
    pub raw_tx: Vec<u8>,
    pub blockheight: u32,
    pub per_commitment_point: PublicKey,
    pub other_revocation_basepoint: PublicKey,
    pub other_delayed_payment_basepoint: PublicKey,
    pub other_htlc_basepoint: PublicKey,
    pub other_payment_basepoint: PublicKey,
    /// Our own revocation basepoint. Only the public key crosses the
    /// wire: we never need to spend via the revocation branch of our
    /// own scripts (that's the counterparty's doing, should they ever
    /// broadcast a commitment we've since revoked), only to recognize
    /// it when deriving the counterparty's `revocation_pubkey`.
    pub self_revocation_basepoint: PublicKey,
    pub self_payment_basepoint_secret: [u8; 32],
    pub self_delayed_payment_basepoint_secret: [u8; 32],
    pub self_htlc_basepoint_secret: [u8; 32],
    pub feerate_per_kw: u64,
    /// Highest commitment number the shachain store already holds the
    /// counterparty's revocation secret for, if any (spec.md §1: the
    /// store itself is assumed provided; only this query result crosses
    /// the wire).
    pub their_last_revoked: Option<u64>,
}

/// A new confirmation-depth reading for a transaction the daemon is
/// watching (the closing transaction, or one of its own proposals).
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct DepthMessage {
    pub txid: Txid,
    pub depth: u32,
}

/// A tracked output was spent, by whatever transaction the master saw
/// confirm or enter the mempool.
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct SpentMessage {
    pub spent_txid: Txid,
    pub spent_outnum: u32,
    pub spending_txid: Txid,
}

/// The master learned a payment preimage (via the onion or gossip) that
/// may resolve one of our tracked HTLC outputs.
#[derive(Clone, Debug, PartialEq, Eq, LightningEncode, LightningDecode)]
pub struct KnownPreimageMessage {
    pub preimage: [u8; 32],
}

/// Messages the daemon reads from the master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MasterMessage {
    Init(InitMessage),
    OnchainHtlc(OnchainHtlcMessage),
    FundingSpent(FundingSpentMessage),
    Depth(DepthMessage),
    Spent(SpentMessage),
    KnownPreimage(KnownPreimageMessage),
}

/// Messages the daemon writes to the master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DaemonMessage {
    InitReply,
    BroadcastTx(Transaction),
    UnwatchTx(Txid),
}

const TYPE_INIT: u16 = 0x0000;
const TYPE_ONCHAIN_HTLC: u16 = 0x0001;
const TYPE_FUNDING_SPENT: u16 = 0x0002;
const TYPE_DEPTH: u16 = 0x0003;
const TYPE_SPENT: u16 = 0x0004;
const TYPE_KNOWN_PREIMAGE: u16 = 0x0005;
const TYPE_INIT_REPLY: u16 = 0x1000;
const TYPE_BROADCAST_TX: u16 = 0x1001;
const TYPE_UNWATCH_TX: u16 = 0x1002;

fn write_frame<W: Write>(mut dst: W, msg_type: u16, payload: &[u8]) -> Result<(), FatalError> {
    if payload.len() > u16::MAX as usize {
        return Err(FatalError::InternalError(format!("frame payload too large: {} bytes", payload.len())));
    }
    let mut header = Vec::with_capacity(4);
    header.extend_from_slice(&msg_type.to_be_bytes());
    header.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    dst.write_all(&header)
        .and_then(|_| dst.write_all(payload))
        .map_err(|e| FatalError::InternalError(format!("write failed: {e}")))
}

fn decode<T: LightningDecode>(payload: &[u8]) -> Result<T, FatalError> {
    T::lightning_decode(io::Cursor::new(payload)).map_err(|e| FatalError::BadCommand(format!("malformed payload: {e}")))
}

/// Reads and decodes one message from the master. Returns `Ok(None)` on a
/// clean EOF (the master closed the pipe — normal shutdown, not fatal).
pub fn read_message<R: Read>(src: &mut R) -> Result<Option<MasterMessage>, FatalError> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match src.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(FatalError::BadCommand("connection closed mid-frame-header".into())),
            Ok(n) => filled += n,
            Err(e) => return Err(FatalError::BadCommand(format!("read failed: {e}"))),
        }
    }
    let msg_type = u16::from_be_bytes([header[0], header[1]]);
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len];
    src.read_exact(&mut payload).map_err(|e| FatalError::BadCommand(format!("short frame payload: {e}")))?;

    let msg = match msg_type {
        TYPE_INIT => MasterMessage::Init(decode(&payload)?),
        TYPE_ONCHAIN_HTLC => MasterMessage::OnchainHtlc(decode(&payload)?),
        TYPE_FUNDING_SPENT => MasterMessage::FundingSpent(decode(&payload)?),
        TYPE_DEPTH => MasterMessage::Depth(decode(&payload)?),
        TYPE_SPENT => MasterMessage::Spent(decode(&payload)?),
        TYPE_KNOWN_PREIMAGE => MasterMessage::KnownPreimage(decode(&payload)?),
        other => return Err(FatalError::BadCommand(format!("unknown message type 0x{other:04x}"))),
    };
    Ok(Some(msg))
}

/// Encodes and writes one message to the master.
pub fn write_message<W: Write>(dst: &mut W, msg: &DaemonMessage) -> Result<(), FatalError> {
    match msg {
        DaemonMessage::InitReply => write_frame(dst, TYPE_INIT_REPLY, &[]),
        DaemonMessage::BroadcastTx(tx) => {
            let payload = bitcoin::consensus::encode::serialize(tx);
            write_frame(dst, TYPE_BROADCAST_TX, &payload)
        }
        DaemonMessage::UnwatchTx(txid) => {
            let payload = txid.lightning_serialize();
            write_frame(dst, TYPE_UNWATCH_TX, &payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn pubkey(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    #[test]
    fn init_message_round_trips() {
        let msg = InitMessage {
            funding_txid: Txid::from_slice(&[3u8; 32]).unwrap(),
            funding_outnum: 0,
            funding_satoshi: 1_000_000,
            to_self_delay: 144,
            our_commitment_number: 0,
            funder: Side::Local,
            local_payment_basepoint: pubkey(1),
            remote_payment_basepoint: pubkey(2),
            htlc_count: 0,
        };
        let bytes = msg.lightning_serialize();
        let decoded = InitMessage::lightning_decode(io::Cursor::new(bytes)).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn funding_spent_message_round_trips() {
        let msg = FundingSpentMessage {
            raw_tx: vec![1, 2, 3],
            blockheight: 700_000,
            per_commitment_point: pubkey(3),
            other_revocation_basepoint: pubkey(4),
            other_delayed_payment_basepoint: pubkey(5),
            other_htlc_basepoint: pubkey(10),
            other_payment_basepoint: pubkey(6),
            self_revocation_basepoint: pubkey(11),
            self_payment_basepoint_secret: [7u8; 32],
            self_delayed_payment_basepoint_secret: [8u8; 32],
            self_htlc_basepoint_secret: [9u8; 32],
            feerate_per_kw: 3000,
            their_last_revoked: Some(41),
        };
        let bytes = msg.lightning_serialize();
        let decoded = FundingSpentMessage::lightning_decode(io::Cursor::new(bytes)).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn frame_round_trips_through_read_message() {
        let depth = DepthMessage { txid: Txid::from_slice(&[1u8; 32]).unwrap(), depth: 6 };
        let payload = depth.lightning_serialize();
        let mut buf = Vec::new();
        write_frame(&mut buf, TYPE_DEPTH, &payload).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let msg = read_message(&mut cursor).unwrap().unwrap();
        match msg {
            MasterMessage::Depth(d) => assert_eq!(d, depth),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn clean_eof_yields_none() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        assert!(read_message(&mut cursor).unwrap().is_none());
    }
}
