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

//! # Kermit packets
//!
//! The subset of the Kermit protocol the bootloader needs to receive a
//! single file: send-init, file header, (extended) data, end of file and
//! break packets, plus decoding of the acknowledgements.
//!
//! All the state of a transfer lives in [`Session`]: the sequence number
//! and the packet lengths negotiated with the peer.
//!
//! # See also
//!
//! - [Kermit Protocol Manual](https://www.kermitproject.org/kproto.pdf).
//! - [Kermit packet reference](https://www.kermitproject.org/kpackets.html).

use std::io::{self, Read};

use crate::{constants::*, Error};

/// Packet types used by a file send.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PacketType {
    SendInit,
    FileHeader,
    Data,
    Eof,
    Break,
}

impl PacketType {
    pub fn as_byte(&self) -> u8 {
        match *self {
            PacketType::SendInit => b'S',
            PacketType::FileHeader => b'F',
            PacketType::Data => b'D',
            PacketType::Eof => b'Z',
            PacketType::Break => b'B',
        }
    }
}

/// Encode a value in `0..=94` as a printable character.
#[inline]
pub fn tochar(value: u8) -> u8 {
    value + 32
}

/// Decode a printable character produced by [`tochar`].
#[inline]
pub fn unchar(c: u8) -> u8 {
    c.wrapping_sub(32)
}

/// Value of a length character, `None` for anything [`tochar`] can't
/// produce from `0..=max`.
fn length_value(c: u8, max: u8) -> Option<usize> {
    if c >= tochar(0) && c - tochar(0) <= max {
        Some(usize::from(unchar(c)))
    } else {
        None
    }
}

/// Toggle the control bit, turning a control character into a printable one
/// and back.
#[inline]
pub fn ctl(c: u8) -> u8 {
    c ^ 0x40
}

/// Kermit type 1 block check.
pub fn check(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u32, |acc, b| acc + u32::from(*b));
    tochar(((sum + ((sum & 0xC0) >> 6)) & 0x3F) as u8)
}

/// A byte as it is sent on the line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Encoded {
    Plain(u8),
    Prefixed(u8, u8),
}

impl Encoded {
    pub fn len(&self) -> usize {
        match *self {
            Encoded::Plain(_) => 1,
            Encoded::Prefixed(..) => 2,
        }
    }

    fn push_to(self, buf: &mut Vec<u8>) {
        match self {
            Encoded::Plain(c) => buf.push(c),
            Encoded::Prefixed(prefix, c) => {
                buf.push(prefix);
                buf.push(c);
            }
        }
    }
}

/// Encode a single data byte.
///
/// Control characters (ignoring the 8th bit) are prefixed and made
/// printable, the prefix itself is doubled, anything else goes verbatim.
pub fn encode_character(c: u8) -> Encoded {
    let low = c & 0x7F;
    if low < 0x20 || low == 0x7F {
        Encoded::Prefixed(CONTROL_PREFIX, ctl(c))
    } else if c == CONTROL_PREFIX {
        Encoded::Prefixed(CONTROL_PREFIX, CONTROL_PREFIX)
    } else {
        Encoded::Plain(c)
    }
}

/// Byte reader with a single byte of lookahead.
///
/// Data packets read a byte before knowing whether its encoding still fits,
/// a byte that doesn't fit is pushed back and returned again by the next
/// read.
#[derive(Debug)]
pub struct ByteSource<R> {
    inner: R,
    pending: Option<u8>,
    consumed: u64,
}

impl<R> ByteSource<R>
where
    R: Read,
{
    pub fn new(inner: R) -> Self {
        ByteSource {
            inner,
            pending: None,
            consumed: 0,
        }
    }

    /// Next byte, `None` once the reader is exhausted.
    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.pending.take() {
            self.consumed += 1;
            return Ok(Some(byte));
        }

        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.consumed += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
    }

    /// Return the last byte read so it's read again.
    ///
    /// # Panics
    ///
    /// Only one byte can be pushed back between reads.
    pub fn push_back(&mut self, byte: u8) {
        assert!(self.pending.is_none(), "only one byte can be pushed back");

        self.pending = Some(byte);
        self.consumed -= 1;
    }

    /// Number of bytes handed out and not pushed back.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

/// State of a Kermit file send.
#[derive(Debug, Clone)]
pub struct Session {
    sequence: u8,
    max_packet_length: usize,
    max_ext_packet_length: usize,
    negotiated: bool,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            sequence: 0,
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
            max_ext_packet_length: DEFAULT_MAX_EXT_PACKET_LENGTH,
            negotiated: false,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next packet.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Maximum length of a regular packet.
    pub fn max_packet_length(&self) -> usize {
        self.max_packet_length
    }

    /// Maximum length of an extended packet.
    pub fn max_ext_packet_length(&self) -> usize {
        self.max_ext_packet_length
    }

    /// Whether the peer parameters have been applied.
    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    /// Send-init packet advertising our parameters.
    pub fn encode_init_packet(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::with_capacity(13);
        // MAXL
        data.push(tochar(DEFAULT_MAX_PACKET_LENGTH as u8));
        // TIME
        data.push(tochar(KERMIT_TIMEOUT_SECS));
        // NPAD, PADC: no padding
        data.push(tochar(0));
        data.push(ctl(0));
        // EOL
        data.push(tochar(EOL));
        // QCTL
        data.push(CONTROL_PREFIX);
        // QBIN: 8-bit line, no quoting
        data.push(b'N');
        // CHKT
        data.push(b'1');
        // REPT: no run-length compression
        data.push(b' ');
        // CAPAS
        data.push(tochar(CAPAS_EXTENDED_PACKETS));
        // WINDO: no sliding windows
        data.push(tochar(0));
        // MAXLX1, MAXLX2
        data.push(tochar((DEFAULT_MAX_EXT_PACKET_LENGTH / 95) as u8));
        data.push(tochar((DEFAULT_MAX_EXT_PACKET_LENGTH % 95) as u8));

        self.encode_packet(PacketType::SendInit, &data)
    }

    pub fn encode_file_header_packet(&self, name: &[u8]) -> Result<Vec<u8>, Error> {
        self.encode_packet(PacketType::FileHeader, name)
    }

    /// Extended data packet holding as many bytes from `source` as fit.
    ///
    /// Returns `None` when `source` has nothing left.
    pub fn encode_file_data_packet<R>(
        &self,
        source: &mut ByteSource<R>,
    ) -> Result<Option<Vec<u8>>, Error>
    where
        R: Read,
    {
        let mut data = Vec::with_capacity(self.max_ext_packet_length);

        while data.len() + CHECK_LENGTH < self.max_ext_packet_length {
            let byte = match source.next_byte()? {
                Some(byte) => byte,
                None => break,
            };

            let encoded = encode_character(byte);
            if data.len() + CHECK_LENGTH + encoded.len() > self.max_ext_packet_length {
                source.push_back(byte);
                break;
            }

            encoded.push_to(&mut data);
        }

        if data.is_empty() {
            return Ok(None);
        }

        self.encode_extended_packet(PacketType::Data, &data).map(Some)
    }

    pub fn encode_eof_packet(&self) -> Result<Vec<u8>, Error> {
        self.encode_packet(PacketType::Eof, &[])
    }

    pub fn encode_break_packet(&self) -> Result<Vec<u8>, Error> {
        self.encode_packet(PacketType::Break, &[])
    }

    /// Regular packet.
    ///
    /// # Errors
    ///
    /// [`Error::Format`] if data, sequence, type and check don't fit in the
    /// maximum packet length.
    pub fn encode_packet(&self, packet_type: PacketType, data: &[u8]) -> Result<Vec<u8>, Error> {
        // [seq | type | data | check]
        let len = data.len() + CHECK_LENGTH + 2;
        if len > self.max_packet_length {
            return Err(Error::Format {
                length: len,
                max: self.max_packet_length,
            });
        }

        let mut pkt = Vec::with_capacity(len + 3);
        pkt.push(MARK);
        pkt.push(tochar(len as u8));
        pkt.push(tochar(self.sequence));
        pkt.push(packet_type.as_byte());
        pkt.extend_from_slice(data);
        pkt.push(check(&pkt[1..]));
        pkt.push(EOL);

        log::trace!(
            "{:?} packet #{}, {} data bytes",
            packet_type,
            self.sequence,
            data.len()
        );

        Ok(pkt)
    }

    /// Extended packet, the length goes after the type as two base-95
    /// digits followed by a header check.
    ///
    /// # Errors
    ///
    /// [`Error::Format`] if data and check don't fit in the maximum extended
    /// packet length.
    pub fn encode_extended_packet(
        &self,
        packet_type: PacketType,
        data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        // [data | check]
        let len = data.len() + CHECK_LENGTH;
        if len > self.max_ext_packet_length {
            return Err(Error::Format {
                length: len,
                max: self.max_ext_packet_length,
            });
        }

        let mut pkt = Vec::with_capacity(len + 8);
        pkt.push(MARK);
        // A blank length marks the packet as extended.
        pkt.push(tochar(0));
        pkt.push(tochar(self.sequence));
        pkt.push(packet_type.as_byte());
        pkt.push(tochar((len / 95) as u8));
        pkt.push(tochar((len % 95) as u8));
        pkt.push(check(&pkt[1..6]));
        pkt.extend_from_slice(data);
        pkt.push(check(&pkt[1..]));
        pkt.push(EOL);

        log::trace!(
            "{:?} extended packet #{}, {} encoded bytes",
            packet_type,
            self.sequence,
            data.len()
        );

        Ok(pkt)
    }

    /// Check the acknowledgement of the last packet and move on to the next
    /// sequence number.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the packet type isn't an ACK, the sequence
    /// number is left untouched then.
    pub fn decode_ack(&mut self, response: &[u8]) -> Result<(), Error> {
        match response.get(3) {
            Some(&ACK) => (),
            Some(&NAK) => {
                return Err(Error::Protocol {
                    reason: "packet not acknowledged",
                    response: response.to_vec(),
                })
            }
            Some(_) => {
                return Err(Error::Protocol {
                    reason: "unexpected response packet type",
                    response: response.to_vec(),
                })
            }
            None => {
                return Err(Error::Protocol {
                    reason: "response too short",
                    response: response.to_vec(),
                })
            }
        }

        let acked = unchar(response[2]);
        if acked != self.sequence {
            log::debug!(
                "ACK carries sequence #{}, expected #{}",
                acked,
                self.sequence
            );
        }

        self.sequence = (self.sequence + 1) % 64;

        Ok(())
    }

    /// Take the peer packet lengths from its send-init acknowledgement.
    ///
    /// `response` is the whole ACK packet, the parameters start after the
    /// type field. The negotiated lengths are fixed for the rest of the
    /// session.
    pub fn apply_init_negotiation(&mut self, response: &[u8]) -> Result<(), Error> {
        const PARAMS_OFFSET: usize = 4;
        const MAXLX1: usize = 11;
        const MAXLX2: usize = 12;

        if self.negotiated {
            return Err(Error::Protocol {
                reason: "session parameters already negotiated",
                response: response.to_vec(),
            });
        }

        let params = match response.get(PARAMS_OFFSET..) {
            Some(params) if params.len() > MAXLX2 => params,
            _ => {
                return Err(Error::Protocol {
                    reason: "send-init acknowledgement too short",
                    response: response.to_vec(),
                })
            }
        };

        let lengths = (
            // A single length character counts up to 95.
            length_value(params[0], 95),
            length_value(params[MAXLX1], 94),
            length_value(params[MAXLX2], 94),
        );
        let (max_packet_length, max_ext_packet_length) = match lengths {
            (Some(maxl), Some(maxlx1), Some(maxlx2)) => (maxl, maxlx1 * 95 + maxlx2),
            _ => {
                return Err(Error::Protocol {
                    reason: "non printable packet length",
                    response: response.to_vec(),
                })
            }
        };

        // Room for at least one escaped data byte.
        if max_ext_packet_length < CHECK_LENGTH + 2 {
            return Err(Error::Protocol {
                reason: "unusable extended packet length",
                response: response.to_vec(),
            });
        }

        log::debug!(
            "negotiated packet lengths: regular {}, extended {}",
            max_packet_length,
            max_ext_packet_length
        );

        self.max_packet_length = max_packet_length;
        self.max_ext_packet_length = max_ext_packet_length;
        self.negotiated = true;

        Ok(())
    }
}
