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

use std::io;

use crate::Stage;

/// Errors returned by the image encoder, the Kermit codec and the device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The flash address can't be expressed relative to the flash base.
    #[error("flash address {address:#010X} is below the flash base {base:#010X}")]
    Address { address: u32, base: u32 },
    /// Filesystem or serial port failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A packet would exceed the negotiated maximum length.
    #[error("packet length {length} exceeds the maximum of {max}")]
    Format { length: usize, max: usize },
    /// The bootloader answered with something other than an ACK.
    #[error("{reason}, response: `{}`", .response.escape_ascii())]
    Protocol {
        reason: &'static str,
        response: Vec<u8>,
    },
    /// The expected response didn't arrive in time.
    #[error(
        "timed out waiting for `{}`, received: `{}`",
        .expected.escape_ascii(),
        .received.escape_ascii()
    )]
    Timeout { expected: Vec<u8>, received: Vec<u8> },
    /// The file is not a well formed RPS container.
    #[error("invalid RPS image: {0}")]
    InvalidImage(&'static str),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(*self, Error::Timeout { .. })
    }
}

impl From<serial::Error> for Error {
    fn from(e: serial::Error) -> Self {
        Error::Io(e.into())
    }
}

/// A fatal error, attributed to the stage of the transfer it happened on.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl StageError {
    /// What the operator has to do before trying again.
    ///
    /// The bootloader is left somewhere inside its menu after any failure
    /// and won't answer the probe again until it is reset.
    pub fn hint(&self) -> &'static str {
        match self.stage {
            Stage::AwaitDevice => {
                "check the serial connection, then reset the target and run the flasher again"
            }
            _ => "power-cycle or reset the target before running the flasher again",
        }
    }
}

pub(crate) trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E> InStage<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError {
            stage,
            source: e.into(),
        })
    }
}
