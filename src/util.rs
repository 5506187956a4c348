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

//! # Utilities
//!
//! Convenience wrappers running a whole flashing session on a [`Device`].

use std::io::Read;

use crate::{kermit::ByteSource, Device, ImageType, Stage, StageError};

/// Progress of a flashing session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Event {
    /// A stage is about to start.
    Stage(Stage),
    /// Data packet acknowledged.
    Transferred { sent: u64, total: u64 },
}

/// Flash an RPS image, from waiting for the device to the bootloader
/// verdict.
///
/// `image` is read once, `size` is only used to report progress. The
/// session stops at the first failure, there's no way to resume it: reset
/// the device and start over.
pub fn flash_image<P, R, F>(
    device: &mut Device<P>,
    image_type: ImageType,
    image: R,
    size: u64,
    mut on_event: F,
) -> Result<(), StageError>
where
    P: serial::SerialPort,
    R: Read,
    F: FnMut(Event),
{
    let mut source = ByteSource::new(image);

    for stage in Stage::ALL.iter().copied() {
        on_event(Event::Stage(stage));

        match stage {
            Stage::AwaitDevice => device.wait_for_device()?,
            Stage::BaudNegotiation => device.increase_baudrate()?,
            Stage::TargetSelect => device.select_target(image_type)?,
            Stage::KermitInit => device.kermit_init()?,
            Stage::FileHeader => device.send_file_header()?,
            Stage::Data => device.send_file_data(&mut source, |sent| {
                on_event(Event::Transferred { sent, total: size })
            })?,
            Stage::Eof => device.send_eof()?,
            Stage::Break => device.send_break()?,
            Stage::Verify => device.check_firmware()?,
        }
    }

    Ok(())
}
