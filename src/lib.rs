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

//! # SiWx917 Serial Bootloader library
//!
//! This a library to flash firmware through the UART of the Silicon Labs
//! SiWx917 mask ROM bootloader. The bootloader offers a textual menu and
//! receives images with the Kermit file transfer protocol.
//!
//! - [`rps`] wraps raw firmware binaries in the RPS container the bootloader
//!   expects.
//! - [`kermit`] encodes the Kermit packets.
//! - [`Device`] drives the bootloader through a flashing session, see
//!   [`util::flash_image`] for the whole sequence.
//!
//! # Wiring
//!
//! 1. Connect an USB-UART adapter: TX to GPIO_9, RX to GPIO_8.
//! 2. Connect JTAG_TDO_SWO to ground and reset the chip.
//! 3. Once flashed, disconnect JTAG_TDO_SWO and reset the chip if the
//!    firmware doesn't start.

use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

use serial::{SerialPort, SerialPortSettings};

#[rustfmt::skip]
pub mod constants;
pub mod kermit;
pub mod rps;
pub mod util;

mod error;
mod stage;
mod target;

#[cfg(test)]
mod fake;

pub use self::error::{Error, StageError};
pub use self::stage::Stage;
pub use self::target::{ImageType, ParseImageTypeError};

use self::constants::*;
use self::error::InStage;
use self::kermit::ByteSource;

/// A SiWx917 in bootloader mode, connected through a serial port.
///
/// The device owns the port and the Kermit session for a single flashing
/// session. Every method is a stage, they must be called in the order of
/// [`Stage::ALL`].
pub struct Device<P> {
    port: P,
    kermit: kermit::Session,
    timeouts: [Duration; Stage::COUNT],
}

impl<P> Device<P>
where
    P: SerialPort,
{
    /// Create a new `Device` from an already opened and configured port.
    ///
    /// The port is expected at [`DEFAULT_BAUD_RATE`], see [`port_settings`].
    pub fn new(port: P) -> Self {
        let mut timeouts = [Duration::default(); Stage::COUNT];
        for stage in Stage::ALL.iter() {
            timeouts[stage.index()] = stage.timeout();
        }

        Device {
            port,
            kermit: kermit::Session::new(),
            timeouts,
        }
    }

    /// Override the response timeout of a stage.
    pub fn set_timeout(&mut self, stage: Stage, timeout: Duration) {
        self.timeouts[stage.index()] = timeout;
    }

    pub fn timeout(&self, stage: Stage) -> Duration {
        self.timeouts[stage.index()]
    }

    /// The Kermit session of this device.
    pub fn session(&self) -> &kermit::Session {
        &self.kermit
    }

    /// Give the port back, closing the session.
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Write `command` and read until the received bytes end with
    /// `expected`.
    fn raw_transaction(
        &mut self,
        command: &[u8],
        expected: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        if !command.is_empty() {
            self.port.write_all(command)?;
            self.port.flush()?;
        }

        let rx = self.read_until(expected, timeout);

        log::trace!("TX: `{}`", command.escape_ascii());
        match rx {
            Ok(ref rx) => log::trace!("RX: `{}`", rx.escape_ascii()),
            Err(Error::Timeout { ref received, .. }) => {
                log::trace!("RX (timed out): `{}`", received.escape_ascii())
            }
            Err(_) => (),
        }

        rx
    }

    fn read_until(&mut self, expected: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        self.port.set_timeout(timeout.min(MENU_TIMEOUT))?;

        let start_time = Instant::now();
        let mut rx = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected EOF",
                    )));
                }
                Ok(_) => {
                    rx.push(byte[0]);
                    if rx.ends_with(expected) {
                        return Ok(rx);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => (),
                Err(e) => return Err(e.into()),
            }

            if start_time.elapsed() >= timeout {
                return Err(Error::Timeout {
                    expected: expected.to_vec(),
                    received: rx,
                });
            }
        }
    }

    /// Send a Kermit packet and validate its acknowledgement.
    fn kermit_transaction(&mut self, stage: Stage, packet: &[u8]) -> Result<Vec<u8>, StageError> {
        let timeout = self.timeout(stage);
        let rx = self.raw_transaction(packet, &[EOL], timeout).in_stage(stage)?;
        self.kermit.decode_ack(&rx).in_stage(stage)?;

        Ok(rx)
    }

    fn menu_handshake(&mut self) -> Result<(), Error> {
        let timeout = self.timeout(Stage::AwaitDevice);
        self.raw_transaction(MENU_PROBE, MENU_PROBE_BANNER, timeout)?;
        self.raw_transaction(MENU_ENTER, MENU_ENTER_BANNER, timeout)?;

        Ok(())
    }

    /// Probe the bootloader menu until the device answers.
    ///
    /// Timeouts are retried forever: the device may not have been reset
    /// into the bootloader yet.
    pub fn wait_for_device(&mut self) -> Result<(), StageError> {
        const STAGE: Stage = Stage::AwaitDevice;

        log::info!("Waiting for the bootloader menu");

        let mut attempts = 0u64;
        loop {
            match self.menu_handshake() {
                Ok(()) => break,
                Err(e) if e.is_timeout() && STAGE.is_retried() => {
                    attempts += 1;
                    if attempts % 50 == 0 {
                        log::debug!("No answer after {} probes", attempts);
                    }
                }
                Err(e) => return Err(e).in_stage(STAGE),
            }
        }

        log::info!("Bootloader menu found");

        Ok(())
    }

    /// Switch the bootloader and the port to [`HIGH_BAUD_RATE`].
    ///
    /// Once the bootloader switched, both sides are out of sync on any
    /// failure, nothing is retried.
    pub fn increase_baudrate(&mut self) -> Result<(), StageError> {
        const STAGE: Stage = Stage::BaudNegotiation;

        self.raw_transaction(MENU_BAUD, MENU_BAUD_BANNER, MENU_TIMEOUT)
            .in_stage(STAGE)?;
        self.raw_transaction(MENU_BAUD_921600, MENU_BAUD_921600_ECHO, MENU_TIMEOUT)
            .in_stage(STAGE)?;

        log::debug!("Switching port to {} baud", HIGH_BAUD_RATE);
        self.port
            .reconfigure(&|settings: &mut dyn SerialPortSettings| {
                settings.set_baud_rate(serial::BaudRate::BaudOther(HIGH_BAUD_RATE))
            })
            .in_stage(STAGE)?;

        self.raw_transaction(MENU_BAUD_CONFIRM, MENU_BAUD_CONFIRM_BANNER, MENU_TIMEOUT)
            .in_stage(STAGE)?;

        let timeout = self.timeout(STAGE);
        self.raw_transaction(MENU_PROBE, MENU_BAUD_READY_BANNER, timeout)
            .in_stage(STAGE)?;

        log::info!("Baudrate switched to {}", HIGH_BAUD_RATE);

        Ok(())
    }

    /// Select the image slot to be written.
    pub fn select_target(&mut self, image_type: ImageType) -> Result<(), StageError> {
        let timeout = self.timeout(Stage::TargetSelect);
        for (keystroke, banner) in image_type.keystrokes().iter() {
            self.raw_transaction(keystroke, banner, timeout)
                .in_stage(Stage::TargetSelect)?;
        }

        log::info!("Selected `{}` image", image_type);

        Ok(())
    }

    /// Open the Kermit session and take the packet lengths from the
    /// bootloader.
    pub fn kermit_init(&mut self) -> Result<(), StageError> {
        let packet = self.kermit.encode_init_packet().in_stage(Stage::KermitInit)?;
        let rx = self.kermit_transaction(Stage::KermitInit, &packet)?;
        self.kermit
            .apply_init_negotiation(&rx)
            .in_stage(Stage::KermitInit)?;

        log::debug!(
            "Regular packet length: {}",
            self.kermit.max_packet_length()
        );
        log::debug!(
            "Extended packet length: {}",
            self.kermit.max_ext_packet_length()
        );

        Ok(())
    }

    pub fn send_file_header(&mut self) -> Result<(), StageError> {
        let packet = self
            .kermit
            .encode_file_header_packet(FILE_NAME)
            .in_stage(Stage::FileHeader)?;
        self.kermit_transaction(Stage::FileHeader, &packet)?;

        Ok(())
    }

    /// Send the whole `source` as data packets.
    ///
    /// `progress` is called after each acknowledged packet with the number
    /// of bytes sent so far.
    pub fn send_file_data<R, F>(
        &mut self,
        source: &mut ByteSource<R>,
        mut progress: F,
    ) -> Result<(), StageError>
    where
        R: Read,
        F: FnMut(u64),
    {
        let mut packets = 0usize;
        while let Some(packet) = self
            .kermit
            .encode_file_data_packet(source)
            .in_stage(Stage::Data)?
        {
            self.kermit_transaction(Stage::Data, &packet)?;
            packets += 1;
            progress(source.consumed());
        }

        log::info!(
            "Sent {} bytes in {} data packets",
            source.consumed(),
            packets
        );

        Ok(())
    }

    pub fn send_eof(&mut self) -> Result<(), StageError> {
        let packet = self.kermit.encode_eof_packet().in_stage(Stage::Eof)?;
        self.kermit_transaction(Stage::Eof, &packet)?;

        Ok(())
    }

    pub fn send_break(&mut self) -> Result<(), StageError> {
        let packet = self.kermit.encode_break_packet().in_stage(Stage::Break)?;
        self.kermit_transaction(Stage::Break, &packet)?;

        Ok(())
    }

    /// Wait for the bootloader to report a successful upgrade.
    pub fn check_firmware(&mut self) -> Result<(), StageError> {
        let timeout = self.timeout(Stage::Verify);
        self.raw_transaction(&[], UPGRADE_SUCCESS_BANNER, timeout)
            .in_stage(Stage::Verify)?;

        log::info!("Bootloader reported a successful upgrade");

        Ok(())
    }
}

impl<P> std::fmt::Debug for Device<P>
where
    P: SerialPort,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Device")
            .field("kermit", &self.kermit)
            .field("port", &())
            .finish()
    }
}

/// Default serial port settings.
///
/// Only the baudrate changes during a session, and only when the bootloader
/// is told to.
pub fn port_settings() -> serial::PortSettings {
    serial::PortSettings {
        baud_rate: serial::BaudRate::Baud115200,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityNone,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}
