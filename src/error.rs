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

use std::process::ExitCode;

use thiserror::Error;

/// Fatal conditions that terminate the daemon. The master is expected to
/// restart it with a fresh `init` message; there is no retry loop here.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Error)]
pub enum FatalError {
    #[error("received a malformed or unexpected message from the master: {0}")]
    BadCommand(String),

    #[error("cryptographic key derivation failed: {0}")]
    CryptoFailed(String),

    #[error("internal invariant violated: {0}")]
    InternalError(String),
}

impl FatalError {
    /// Numeric status the source's `status_failed` would have written to
    /// the master before aborting; mapped here to the process exit code.
    pub fn exit_code(&self) -> ExitCode {
        let code: u8 = match self {
            FatalError::BadCommand(_) => 1,
            FatalError::CryptoFailed(_) => 2,
            FatalError::InternalError(_) => 3,
        };
        ExitCode::from(code)
    }
}

pub type Result<T> = std::result::Result<T, FatalError>;
