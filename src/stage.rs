// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use crate::constants::{KERMIT_TIMEOUT_SECS, MENU_TIMEOUT};

/// A stage of a flashing session.
///
/// Stages run strictly in the order of [`Stage::ALL`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Stage {
    /// Probe the bootloader menu until the target answers.
    AwaitDevice,
    /// Switch both sides to the high baudrate.
    BaudNegotiation,
    /// Select the image slot to be written.
    TargetSelect,
    /// Kermit send-init exchange and parameter negotiation.
    KermitInit,
    /// Kermit file header.
    FileHeader,
    /// Kermit file data, one packet at a time.
    Data,
    /// Kermit end of file.
    Eof,
    /// Kermit break (end of transmission).
    Break,
    /// Wait for the bootloader to report the upgrade result.
    Verify,
}

impl Stage {
    pub const COUNT: usize = 9;

    /// Every stage, in execution order.
    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::AwaitDevice,
        Stage::BaudNegotiation,
        Stage::TargetSelect,
        Stage::KermitInit,
        Stage::FileHeader,
        Stage::Data,
        Stage::Eof,
        Stage::Break,
        Stage::Verify,
    ];

    /// Default response timeout of the stage.
    ///
    /// - **Note:** the menu keystrokes sent before the baudrate confirmation
    ///   always use the short menu timeout, this is the timeout of the
    ///   confirmation itself.
    pub fn timeout(&self) -> Duration {
        match *self {
            Stage::AwaitDevice | Stage::TargetSelect => MENU_TIMEOUT,
            Stage::BaudNegotiation => Duration::from_secs(5),
            Stage::KermitInit
            | Stage::FileHeader
            | Stage::Data
            | Stage::Eof
            | Stage::Break => Duration::from_secs(u64::from(KERMIT_TIMEOUT_SECS)),
            Stage::Verify => Duration::from_secs(30),
        }
    }

    /// Whether a timeout on this stage is retried instead of being fatal.
    ///
    /// Only the device probe is retried, the target may simply not have
    /// been reset yet.
    #[inline]
    pub fn is_retried(&self) -> bool {
        matches!(*self, Stage::AwaitDevice)
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Stage::AwaitDevice => "await-device",
            Stage::BaudNegotiation => "baud-negotiation",
            Stage::TargetSelect => "target-select",
            Stage::KermitInit => "kermit-init",
            Stage::FileHeader => "file-header",
            Stage::Data => "data",
            Stage::Eof => "eof",
            Stage::Break => "break",
            Stage::Verify => "verify",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}
