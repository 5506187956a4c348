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

use std::time::Duration;

/// Baudrate the bootloader starts with after reset.
pub const DEFAULT_BAUD_RATE: usize         = 115_200;
/// Baudrate requested during the baudrate negotiation.
pub const HIGH_BAUD_RATE: usize            = 921_600;

/// Timeout of a single menu keystroke exchange.
pub const MENU_TIMEOUT: Duration           = Duration::from_millis(100);

// Bootloader menu. Each keystroke is paired with the text the bootloader
// prints last after receiving it.
pub const MENU_PROBE: &[u8]                = b"\xff";
pub const MENU_PROBE_BANNER: &[u8]         = b"Enter 'U'";
pub const MENU_ENTER: &[u8]                = b"U";
pub const MENU_ENTER_BANNER: &[u8]         = b"Change UART Baud Rate\r\n";
pub const MENU_BAUD: &[u8]                 = b"b";
pub const MENU_BAUD_BANNER: &[u8]          = b"5 115200\r\n";
pub const MENU_BAUD_921600: &[u8]          = b"4";
pub const MENU_BAUD_921600_ECHO: &[u8]     = b"4";
pub const MENU_BAUD_CONFIRM: &[u8]         = b"U";
pub const MENU_BAUD_CONFIRM_BANNER: &[u8]  = b"Baud Rate was updated successfully!";
pub const MENU_BAUD_READY_BANNER: &[u8]    = b"Waiting for Correct Option...\r\n";
pub const MENU_M4_SLOT: &[u8]              = b"4";
pub const MENU_M4_SLOT_BANNER: &[u8]       = b"Enter M4 Image No(1-f)\r\n";
pub const MENU_M4_IMAGE: &[u8]             = b"1";
pub const MENU_M4_IMAGE_BANNER: &[u8]      = b"Send MCU firmware(*.rps)         \r\n";
pub const MENU_TA_SLOT: &[u8]              = b"B";
pub const MENU_TA_SLOT_BANNER: &[u8]       = b"Enter Wireless Image No(0-f)\r\n";
pub const MENU_TA_IMAGE: &[u8]             = b"0";
pub const MENU_TA_IMAGE_BANNER: &[u8]      = b"Send NWP firmware(*.rps)         \r\n";
pub const UPGRADE_SUCCESS_BANNER: &[u8]    = b"Upgradation Successful\r\n\r\nEnter Next Command\r\n";

/// Kermit start of packet.
pub const MARK: u8                         = 0x01;
/// Kermit end of packet.
pub const EOL: u8                          = b'\r';
/// Kermit control prefix.
pub const CONTROL_PREFIX: u8               = b'#';
/// Positive acknowledgement packet type.
pub const ACK: u8                          = b'Y';
/// Negative acknowledgement packet type.
pub const NAK: u8                          = b'N';
/// Block check type 1 takes a single character.
pub const CHECK_LENGTH: usize              = 1;
/// Peer timeout advertised in the init packet, in seconds.
pub const KERMIT_TIMEOUT_SECS: u8          = 5;
pub const DEFAULT_MAX_PACKET_LENGTH: usize = 94;
pub const DEFAULT_MAX_EXT_PACKET_LENGTH: usize = 9024;
/// Extended packets capability bit.
pub const CAPAS_EXTENDED_PACKETS: u8       = 0x02;
/// Name announced in the file header packet.
pub const FILE_NAME: &[u8]                 = b"FIRMWA.RPS";

/// First byte of the flash addressed by the images.
pub const FLASH_BASE: u32                  = 0x0800_1000;
/// Default flash address of the M4 application image.
pub const DEFAULT_FLASH_ADDRESS: u32       = 0x0801_2000;
/// Size of the header, boot descriptor and padding preceding the payload.
pub const RPS_HEADER_SIZE: usize           = 0x1000;
pub const RPS_MAGIC: u32                   = 0x900D_900D;
pub const RPS_FLAGS: u16                   = 0x0001;
pub const RPS_SIGNATURE_TYPE: u16          = 0x0000;
pub const RPS_VERSION: u32                 = 0x0000_0001;
/// Added to the payload size to obtain the declared image size.
pub const RPS_IMAGE_SIZE_ADJUST: u32       = 0x0FC0;
pub const RPS_CRC_OFFSET: usize            = 0x14;
pub const RPS_MAGIC2_OFFSET: usize         = 0x3C;
pub const BOOT_DESCRIPTOR_OFFSET: usize    = 0x40;
pub const BOOT_DESCRIPTOR_MAGIC: u16       = 0x5AA5;
pub const BOOT_DESCRIPTOR_LAST_ENTRY: u32  = 0x8000_0000;
