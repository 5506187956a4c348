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
    str::FromStr,
};

use crate::constants::*;

/// The kind of image to be flashed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageType {
    /// Application image for the Cortex-M4 core.
    M4,
    /// Network processor (wireless) firmware.
    Ta,
}

impl ImageType {
    /// Menu keystrokes selecting the image slot, each with the text the
    /// bootloader prints once it accepted the keystroke.
    pub fn keystrokes(&self) -> [(&'static [u8], &'static [u8]); 2] {
        match *self {
            ImageType::M4 => [
                (MENU_M4_SLOT, MENU_M4_SLOT_BANNER),
                (MENU_M4_IMAGE, MENU_M4_IMAGE_BANNER),
            ],
            ImageType::Ta => [
                (MENU_TA_SLOT, MENU_TA_SLOT_BANNER),
                (MENU_TA_IMAGE, MENU_TA_IMAGE_BANNER),
            ],
        }
    }
}

impl Display for ImageType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            ImageType::M4 => fmt.write_str("m4"),
            ImageType::Ta => fmt.write_str("ta"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value `{0}`, image type must be one of: `m4` or `ta`")]
pub struct ParseImageTypeError(String);

impl FromStr for ImageType {
    type Err = ParseImageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m4" | "M4" => Ok(ImageType::M4),
            "ta" | "TA" => Ok(ImageType::Ta),
            _ => Err(ParseImageTypeError(s.to_owned())),
        }
    }
}
