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

use std::{fs, path::PathBuf, process};

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serial::SerialPort;

use siwx_sbl::{
    rps,
    util::{self, Event},
    Device, ImageType, Stage,
};

/// Flash subcommand entry point.
pub fn flash(matches: &ArgMatches<'_>) -> Result<()> {
    let opts = FlashOpts::from_matches(matches)?;
    crate::init_logger(opts.log_level());

    let image = fs::read(&opts.image_path)
        .with_context(|| format!("Couldn't read `{}`", opts.image_path.display()))?;

    match rps::inspect(&image) {
        Ok(info) => log::info!(
            "RPS image: {} bytes of firmware at {:#010X}",
            info.firmware_size,
            info.flash_address
        ),
        Err(e) => log::warn!(
            "`{}` doesn't look like an RPS image ({}), flashing it anyway",
            opts.image_path.display(),
            e
        ),
    }

    ctrlc::set_handler(|| {
        eprintln!();
        eprintln!(
            "{}",
            crate::warning(
                "Interrupted! Power-cycle or reset the target before running the flasher again"
            )
        );
        process::exit(130);
    })
    .context("Couldn't set the Ctrl-C handler")?;

    log::info!("Opening serial port `{}`", opts.port);
    let mut port = serial::open(&opts.port)
        .with_context(|| format!("Couldn't open serial port `{}`", opts.port))?;
    port.configure(&siwx_sbl::port_settings())
        .context("Couldn't configure the serial port")?;

    let mut device = Device::new(port);
    let show_progress = opts.debug == 0;
    let mut bar: Option<ProgressBar> = None;
    let total = image.len() as u64;

    let result = util::flash_image(
        &mut device,
        opts.image_type,
        &image[..],
        total,
        |event| match event {
            Event::Stage(Stage::AwaitDevice) => println!("Waiting for target..."),
            Event::Stage(Stage::BaudNegotiation) => {
                println!("Target connected!");
                println!("Setting up, please wait...");
            }
            Event::Stage(Stage::KermitInit) => println!("Target initialised!"),
            Event::Stage(Stage::Data) if show_progress => bar = Some(progress_bar(total)),
            Event::Stage(Stage::Eof) => {
                if let Some(bar) = bar.take() {
                    bar.finish();
                }
                println!("Firmware upload complete!");
            }
            Event::Stage(Stage::Verify) => println!("Checking firmware, please wait..."),
            Event::Stage(stage) => log::debug!("Starting {} stage", stage),
            Event::Transferred { sent, .. } => {
                if let Some(ref bar) = bar {
                    bar.set_position(sent);
                }
            }
        },
    );

    if let Err(e) = result {
        if let Some(bar) = bar {
            bar.abandon();
        }
        eprintln!("{}", crate::warning(&format!("Hint: {}", e.hint())));
        return Err(e).context("Flashing failed");
    }

    println!("Firmware flashed successfully!");

    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .progress_chars("##-"),
    );
    bar
}

struct FlashOpts {
    port: String,
    debug: u8,
    image_type: ImageType,
    image_path: PathBuf,
}

impl FlashOpts {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<FlashOpts> {
        let debug = matches
            .value_of("debug")
            .unwrap_or_default()
            .parse::<u8>()
            .context("Invalid debug level, must be a number from 0 to 3")?;
        if debug > 3 {
            bail!("Invalid debug level {}, must be a number from 0 to 3", debug);
        }

        let image_type = matches
            .value_of("type")
            .unwrap_or_default()
            .parse::<ImageType>()
            .context("Invalid image type")?;

        Ok(FlashOpts {
            port: matches.value_of("port").unwrap_or_default().to_owned(),
            debug,
            image_type,
            image_path: matches.value_of("FILE").unwrap_or_default().into(),
        })
    }

    fn log_level(&self) -> LevelFilter {
        match self.debug {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
