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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;

/// RPS subcommand entry point.
pub fn rps(matches: &ArgMatches<'_>) -> Result<()> {
    let opts = RpsOpts::from_matches(matches)?;

    log::info!("Firmware file: `{}`", opts.source.display());
    log::info!("Flash address: {:#010X}", opts.address);

    siwx_sbl::rps::build(opts.address, &opts.source, &opts.dest).with_context(|| {
        format!(
            "Couldn't build `{}` from `{}`",
            opts.dest.display(),
            opts.source.display()
        )
    })?;

    Ok(())
}

struct RpsOpts {
    address: u32,
    source: PathBuf,
    dest: PathBuf,
}

impl RpsOpts {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<RpsOpts> {
        Ok(RpsOpts {
            address: parse_address(matches.value_of("address").unwrap_or_default())
                .context("Invalid flash address, must be an hexadecimal number, e.g.: 0x08012000")?,
            source: matches.value_of("input").unwrap_or_default().into(),
            dest: matches.value_of("output").unwrap_or_default().into(),
        })
    }
}

fn parse_address(address: &str) -> Result<u32, std::num::ParseIntError> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);

    u32::from_str_radix(digits, 16)
}
