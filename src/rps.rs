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

//! # RPS images
//!
//! The bootloader only accepts firmware wrapped in an RPS container: a
//! fixed `0x1000` byte region (image header, boot descriptor and padding)
//! followed by the raw firmware. The header carries a CRC of the whole
//! container, computed with the CRC field itself zeroed.
//!
//! # See also
//!
//! - [SiWx917 Family Reference Manual](https://www.silabs.com/documents/public/reference-manuals/siw917x-family-rm.pdf),
//!   RPS file format.

use std::{
    convert::TryInto,
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use crc::{Algorithm, Crc};

use crate::{constants::*, Error};

/// Not a catalogued CRC; `check` and `residue` aren't used to compute it.
pub const RPS_CRC_ALGORITHM: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0xD95E_AAE5,
    init: 0x0000_0000,
    refin: true,
    refout: true,
    xorout: 0x0000_0000,
    check: 0x0000_0000,
    residue: 0x0000_0000,
};

pub const RPS_CRC: Crc<u32> = Crc::<u32>::new(&RPS_CRC_ALGORITHM);

/// Summary of a parsed container.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImageInfo {
    /// Absolute flash address the firmware is written to.
    pub flash_address: u32,
    /// Size of the wrapped firmware, in bytes.
    pub firmware_size: usize,
    pub crc: u32,
}

/// Wrap `firmware` in an RPS container targeting `address`.
///
/// # Errors
///
/// - [`Error::Address`] if `address` is below [`FLASH_BASE`].
/// - [`Error::Io`] with [`io::ErrorKind::InvalidInput`] if the firmware is
///   too large for the image size field.
pub fn encode(address: u32, firmware: &[u8]) -> Result<Vec<u8>, Error> {
    if address < FLASH_BASE {
        return Err(Error::Address {
            address,
            base: FLASH_BASE,
        });
    }

    let image_size = firmware
        .len()
        .try_into()
        .ok()
        .and_then(|len: u32| len.checked_add(RPS_IMAGE_SIZE_ADJUST))
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "firmware is too large")
        })?;

    let mut image = Vec::with_capacity(RPS_HEADER_SIZE + firmware.len());

    // Image header
    image.extend_from_slice(&RPS_FLAGS.to_le_bytes());
    image.extend_from_slice(&RPS_SIGNATURE_TYPE.to_le_bytes());
    image.extend_from_slice(&RPS_MAGIC.to_le_bytes());
    image.extend_from_slice(&image_size.to_le_bytes());
    image.extend_from_slice(&RPS_VERSION.to_le_bytes());
    image.extend_from_slice(&(address - FLASH_BASE).to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes()); /* crc */
    image.extend_from_slice(&[0u8; 16]); /* mic */
    image.extend_from_slice(&0u32.to_le_bytes()); /* key reference */
    image.extend_from_slice(&[0u8; 16]); /* reserved */
    image.extend_from_slice(&RPS_MAGIC.to_le_bytes());
    debug_assert_eq!(image.len(), BOOT_DESCRIPTOR_OFFSET);

    // Boot descriptor, a single (last) entry
    image.extend_from_slice(&BOOT_DESCRIPTOR_MAGIC.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes()); /* offset */
    image.extend_from_slice(&address.to_le_bytes()); /* ivt offset */
    image.extend_from_slice(&BOOT_DESCRIPTOR_LAST_ENTRY.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());

    // Unused descriptor entries and padding
    image.resize(RPS_HEADER_SIZE, 0);

    image.extend_from_slice(firmware);

    // The CRC covers its own (zeroed) field, so it's patched in afterwards
    // instead of being appended.
    let crc = RPS_CRC.checksum(&image);
    image[RPS_CRC_OFFSET..RPS_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

    log::debug!(
        "RPS image: {} bytes, flash offset {:#X}, CRC {:#010X}",
        image.len(),
        address - FLASH_BASE,
        crc
    );

    Ok(image)
}

/// Build the container for the firmware at `source` and write it to `dest`.
///
/// The container is written to a temporary file next to `dest` and renamed
/// over it, `dest` is either complete or untouched.
pub fn build<S, D>(address: u32, source: S, dest: D) -> Result<(), Error>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    let dest = dest.as_ref();

    let firmware = fs::read(source.as_ref())?;
    let image = encode(address, &firmware)?;

    let tmp = tmp_path(dest);
    if let Err(e) = fs::write(&tmp, &image).and_then(|_| fs::rename(&tmp, dest)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    log::info!("Wrote `{}` ({} bytes)", dest.display(), image.len());

    Ok(())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_else(|| OsString::from("image"));
    name.push(".tmp");
    dest.with_file_name(name)
}

fn read_u16(image: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([image[offset], image[offset + 1]])
}

fn read_u32(image: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&image[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Validate a container and return what it holds.
pub fn inspect(image: &[u8]) -> Result<ImageInfo, Error> {
    if image.len() < RPS_HEADER_SIZE {
        return Err(Error::InvalidImage("shorter than the image header"));
    }

    if read_u32(image, 0x04) != RPS_MAGIC || read_u32(image, RPS_MAGIC2_OFFSET) != RPS_MAGIC {
        return Err(Error::InvalidImage("bad header magic"));
    }

    if read_u16(image, BOOT_DESCRIPTOR_OFFSET) != BOOT_DESCRIPTOR_MAGIC {
        return Err(Error::InvalidImage("bad boot descriptor magic"));
    }

    let firmware_size = image.len() - RPS_HEADER_SIZE;
    let declared = read_u32(image, 0x08);
    if u64::from(declared) != firmware_size as u64 + u64::from(RPS_IMAGE_SIZE_ADJUST) {
        return Err(Error::InvalidImage("image size doesn't match the file size"));
    }

    let crc = read_u32(image, RPS_CRC_OFFSET);
    let mut digest = RPS_CRC.digest();
    digest.update(&image[..RPS_CRC_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&image[RPS_CRC_OFFSET + 4..]);
    if digest.finalize() != crc {
        return Err(Error::InvalidImage("CRC mismatch"));
    }

    Ok(ImageInfo {
        flash_address: read_u32(image, 0x10).wrapping_add(FLASH_BASE),
        firmware_size,
        crc,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const FIRMWARE: &[u8] = &[0xAA, 0xBB, 0xCC, 0xDD];

    #[test]
    fn test_encode_layout() {
        let image = encode(0x0801_2000, FIRMWARE).unwrap();

        assert_eq!(image.len(), RPS_HEADER_SIZE + FIRMWARE.len());
        assert_eq!(read_u16(&image, 0x00), 1);
        assert_eq!(read_u16(&image, 0x02), 0);
        assert_eq!(read_u32(&image, 0x04), 0x900D_900D);
        assert_eq!(read_u32(&image, 0x08), 0xFC4);
        assert_eq!(read_u32(&image, 0x0C), 1);
        assert_eq!(read_u32(&image, 0x10), 0x0001_1000);
        assert!(image[0x18..0x3C].iter().all(|b| *b == 0));
        assert_eq!(read_u32(&image, 0x3C), 0x900D_900D);
        assert_eq!(read_u16(&image, 0x40), 0x5AA5);
        assert_eq!(read_u16(&image, 0x42), 0);
        assert_eq!(read_u32(&image, 0x44), 0x0801_2000);
        assert_eq!(read_u32(&image, 0x48), 0x8000_0000);
        assert_eq!(read_u32(&image, 0x4C), 0);
        assert!(image[0x50..0x1000].iter().all(|b| *b == 0));
        assert_eq!(&image[0x1000..], FIRMWARE);
    }

    #[test]
    fn test_crc_round_trip() {
        for firmware in &[&FIRMWARE[..], &[][..], &[0x5A; 3000][..]] {
            let image = encode(0x0800_1000, firmware).unwrap();
            let stored = read_u32(&image, RPS_CRC_OFFSET);

            let mut zeroed = image.clone();
            zeroed[0x14..0x18].copy_from_slice(&[0; 4]);
            assert_eq!(RPS_CRC.checksum(&zeroed), stored);
            assert_ne!(stored, 0);
        }
    }

    #[test]
    fn test_crc_is_reflected() {
        // A lone 0x80 byte is shifted all the way through the register,
        // leaving the reflected polynomial.
        assert_eq!(RPS_CRC.checksum(&[0x80]), 0xD95E_AAE5u32.reverse_bits());
        assert_eq!(RPS_CRC.checksum(&[]), 0);
    }

    #[test]
    fn test_address_below_base() {
        match encode(0x0800_0FFF, FIRMWARE) {
            Err(Error::Address { address, base }) => {
                assert_eq!(address, 0x0800_0FFF);
                assert_eq!(base, FLASH_BASE);
            }
            r => panic!("unexpected result {:?}", r),
        }

        assert!(encode(FLASH_BASE, FIRMWARE).is_ok());
    }

    #[test]
    fn test_inspect() {
        let image = encode(0x0801_2000, FIRMWARE).unwrap();
        let info = inspect(&image).unwrap();
        assert_eq!(info.flash_address, 0x0801_2000);
        assert_eq!(info.firmware_size, 4);
        assert_eq!(info.crc, read_u32(&image, RPS_CRC_OFFSET));

        let mut corrupted = image.clone();
        corrupted[0x1001] ^= 0x01;
        assert!(matches!(
            inspect(&corrupted),
            Err(Error::InvalidImage("CRC mismatch"))
        ));

        let mut truncated = image.clone();
        truncated.pop();
        assert!(inspect(&truncated).is_err());

        assert!(inspect(&image[..0x800]).is_err());
        assert!(inspect(FIRMWARE).is_err());
    }

    #[test]
    fn test_build() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("firmware.bin");
        let dest = dir.path().join("firmware.rps");
        fs::write(&source, FIRMWARE).unwrap();

        build(DEFAULT_FLASH_ADDRESS, &source, &dest).unwrap();

        let image = fs::read(&dest).unwrap();
        assert_eq!(image, encode(DEFAULT_FLASH_ADDRESS, FIRMWARE).unwrap());
        assert!(!dir.path().join("firmware.rps.tmp").exists());
    }

    #[test]
    fn test_build_writes_nothing_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("firmware.bin");
        let dest = dir.path().join("firmware.rps");

        // Missing source
        assert!(matches!(
            build(DEFAULT_FLASH_ADDRESS, &source, &dest),
            Err(Error::Io(_))
        ));
        assert!(!dest.exists());

        // Bad address
        fs::write(&source, FIRMWARE).unwrap();
        assert!(matches!(
            build(0x0000_1000, &source, &dest),
            Err(Error::Address { .. })
        ));
        assert!(!dest.exists());

        // Unwritable destination
        let dest = dir.path().join("missing").join("firmware.rps");
        assert!(matches!(
            build(DEFAULT_FLASH_ADDRESS, &source, &dest),
            Err(Error::Io(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
