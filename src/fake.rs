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

//! In-memory bootloader answering on a fake serial port.

use std::{collections::VecDeque, io, thread, time::Duration};

use serial::{SerialPort, SerialPortSettings};

use crate::{
    constants::*,
    kermit::{
        check, ctl,
        test::{ack_packet, init_ack_params},
        tochar, unchar,
    },
    port_settings, ImageType,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Menu {
    Probe,
    Main,
    Baud,
    BaudSet,
    Ready,
    Slot(ImageType),
    Kermit,
}

pub struct FakeBootloader {
    /// Probes ignored before the menu shows up.
    pub silent_probes: usize,
    /// Never report the bootloader ready after the baudrate change.
    pub stall_baud_ready: bool,
    /// Packet type answered with a NAK.
    pub nak_packet: Option<u8>,
    pub maxl: u8,
    pub maxlx: usize,
    pub upgrade_banner: &'static [u8],

    pub probes: usize,
    pub settings: serial::PortSettings,
    pub selected: Option<ImageType>,
    pub file_name: Vec<u8>,
    pub received: Vec<u8>,
    pub longest_data_packet: usize,
    pub eof: bool,
    pub done: bool,

    menu: Menu,
    baud_rate: usize,
    sequence: u8,
    timeout: Duration,
    rx: VecDeque<u8>,
}

impl FakeBootloader {
    pub fn new() -> Self {
        FakeBootloader {
            silent_probes: 0,
            stall_baud_ready: false,
            nak_packet: None,
            maxl: DEFAULT_MAX_PACKET_LENGTH as u8,
            maxlx: DEFAULT_MAX_EXT_PACKET_LENGTH,
            upgrade_banner: UPGRADE_SUCCESS_BANNER,
            probes: 0,
            settings: port_settings(),
            selected: None,
            file_name: Vec::new(),
            received: Vec::new(),
            longest_data_packet: 0,
            eof: false,
            done: false,
            menu: Menu::Probe,
            baud_rate: DEFAULT_BAUD_RATE,
            sequence: 0,
            timeout: Duration::from_millis(100),
            rx: VecDeque::new(),
        }
    }

    fn port_baud_rate(&self) -> usize {
        match self.settings.baud_rate() {
            Some(serial::BaudRate::Baud115200) => 115_200,
            Some(serial::BaudRate::BaudOther(n)) => n,
            other => panic!("unexpected baudrate {:?}", other),
        }
    }

    fn answer(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    fn keystroke(&mut self, key: &[u8]) {
        match (self.menu, key) {
            (Menu::Probe, MENU_PROBE) => {
                self.probes += 1;
                if self.probes > self.silent_probes {
                    self.answer(b"\r\n\r\nEnter 'U'");
                }
            }
            (Menu::Probe, MENU_ENTER) => {
                self.answer(b"\r\nU\r\nB Change UART Baud Rate\r\n");
                self.menu = Menu::Main;
            }
            (Menu::Main, MENU_BAUD) => {
                self.answer(b"\r\n1 9600\r\n4 921600\r\n5 115200\r\n");
                self.menu = Menu::Baud;
            }
            (Menu::Baud, MENU_BAUD_921600) => {
                self.answer(b"4");
                self.baud_rate = HIGH_BAUD_RATE;
                self.menu = Menu::BaudSet;
            }
            (Menu::BaudSet, MENU_BAUD_CONFIRM) => {
                self.answer(b"\r\nBaud Rate was updated successfully!");
                self.menu = Menu::Ready;
            }
            (Menu::Ready, MENU_PROBE) => {
                if !self.stall_baud_ready {
                    self.answer(b"\r\nWaiting for Correct Option...\r\n");
                }
            }
            (Menu::Ready, MENU_M4_SLOT) => {
                self.answer(MENU_M4_SLOT_BANNER);
                self.menu = Menu::Slot(ImageType::M4);
            }
            (Menu::Ready, MENU_TA_SLOT) => {
                self.answer(MENU_TA_SLOT_BANNER);
                self.menu = Menu::Slot(ImageType::Ta);
            }
            (Menu::Slot(ImageType::M4), MENU_M4_IMAGE) => {
                self.answer(MENU_M4_IMAGE_BANNER);
                self.selected = Some(ImageType::M4);
                self.menu = Menu::Kermit;
            }
            (Menu::Slot(ImageType::Ta), MENU_TA_IMAGE) => {
                self.answer(MENU_TA_IMAGE_BANNER);
                self.selected = Some(ImageType::Ta);
                self.menu = Menu::Kermit;
            }
            _ => (),
        }
    }

    fn packet(&mut self, pkt: &[u8]) {
        assert_eq!(pkt[0], MARK);
        assert_eq!(*pkt.last().unwrap(), EOL);

        let seq = unchar(pkt[2]);
        let packet_type = pkt[3];
        assert_eq!(seq, self.sequence, "out of order packet");

        let data = match unchar(pkt[1]) {
            0 => {
                let len = usize::from(unchar(pkt[4])) * 95 + usize::from(unchar(pkt[5]));
                assert_eq!(pkt[6], check(&pkt[1..6]), "bad extended header check");
                assert_eq!(pkt.len(), 7 + len + 1);
                assert_eq!(pkt[6 + len], check(&pkt[1..6 + len]), "bad check");
                self.longest_data_packet = self.longest_data_packet.max(len);
                &pkt[7..6 + len]
            }
            len => {
                let len = usize::from(len);
                assert_eq!(pkt.len(), len + 3);
                assert!(len <= usize::from(self.maxl));
                assert_eq!(pkt[len + 1], check(&pkt[1..len + 1]), "bad check");
                &pkt[4..len + 1]
            }
        };

        if self.nak_packet == Some(packet_type) {
            let mut nak = vec![MARK, tochar(3), tochar(seq), NAK];
            nak.push(check(&nak[1..]));
            nak.push(EOL);
            self.answer(&nak);
            return;
        }

        let ack = match packet_type {
            b'S' => ack_packet(seq, &init_ack_params(self.maxl, self.maxlx)),
            b'F' => {
                self.file_name = data.to_vec();
                ack_packet(seq, &[])
            }
            b'D' => {
                let decoded = decode(data);
                self.received.extend_from_slice(&decoded);
                ack_packet(seq, &[])
            }
            b'Z' => {
                self.eof = true;
                ack_packet(seq, &[])
            }
            b'B' => {
                self.done = true;
                ack_packet(seq, &[])
            }
            other => panic!("unexpected packet type {}", other as char),
        };

        self.answer(&ack);
        if self.done {
            let banner = self.upgrade_banner;
            self.answer(banner);
        }

        self.sequence = (self.sequence + 1) % 64;
    }
}

fn decode(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();
    while let Some(b) = bytes.next() {
        if b != CONTROL_PREFIX {
            decoded.push(b);
            continue;
        }

        let c = bytes.next().expect("dangling control prefix");
        if (0x3F..=0x5F).contains(&(c & 0x7F)) {
            decoded.push(ctl(c));
        } else {
            decoded.push(c);
        }
    }
    decoded
}

impl SerialPort for FakeBootloader {
    fn timeout(&self) -> Duration {
        self.timeout
    }
    fn set_timeout(&mut self, timeout: Duration) -> serial::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
    fn configure(&mut self, settings: &serial::PortSettings) -> serial::Result<()> {
        self.settings = *settings;
        Ok(())
    }
    fn reconfigure(
        &mut self,
        setup: &dyn Fn(&mut dyn SerialPortSettings) -> serial::Result<()>,
    ) -> serial::Result<()> {
        let mut settings = self.settings;
        setup(&mut settings)?;
        self.settings = settings;
        Ok(())
    }
    fn set_rts(&mut self, _level: bool) -> serial::Result<()> {
        unreachable!()
    }
    fn set_dtr(&mut self, _level: bool) -> serial::Result<()> {
        unreachable!()
    }
    fn read_cts(&mut self) -> serial::Result<bool> {
        unreachable!()
    }
    fn read_dsr(&mut self) -> serial::Result<bool> {
        unreachable!()
    }
    fn read_ri(&mut self) -> serial::Result<bool> {
        unreachable!()
    }
    fn read_cd(&mut self) -> serial::Result<bool> {
        unreachable!()
    }
}

impl io::Read for FakeBootloader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }

        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => buf[n] = b,
                None => break,
            }
            n += 1;
        }
        Ok(n)
    }
}

impl io::Write for FakeBootloader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Garbage on the line while the baudrates differ.
        if self.port_baud_rate() != self.baud_rate {
            return Ok(buf.len());
        }

        if self.menu == Menu::Kermit && buf.first() == Some(&MARK) {
            self.packet(buf);
        } else {
            self.keystroke(buf);
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
