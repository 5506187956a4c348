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

use std::env;

use anyhow::Result;
use clap::{crate_authors, crate_version, App, AppSettings, Arg, SubCommand};
use log::LevelFilter;

mod flash;
mod rps;

const LOG_ENV: &str = "SIWX_SBL_PROG_LOG";

fn main() -> Result<()> {
    let args = cli().get_matches();

    match args.subcommand() {
        ("rps", Some(m)) => {
            init_logger(LevelFilter::Info);
            rps::rps(m)
        }
        ("flash", Some(m)) => flash::flash(m),
        _ => unreachable!("clap requires a subcommand"),
    }
}

/// Initialize logging, `SIWX_SBL_PROG_LOG` overrides `level`.
fn init_logger(level: LevelFilter) {
    #[cfg(feature = "pretty-env-logger")]
    let mut builder = pretty_env_logger::formatted_builder();
    #[cfg(not(feature = "pretty-env-logger"))]
    let mut builder = env_logger::Builder::new();

    builder.filter_level(level);
    if let Ok(filters) = env::var(LOG_ENV) {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// Highlight a message meant for the operator.
#[cfg(unix)]
fn warning(msg: &str) -> String {
    ansi_term::Colour::Yellow.bold().paint(msg).to_string()
}

#[cfg(not(unix))]
fn warning(msg: &str) -> String {
    msg.to_owned()
}

fn cli() -> App<'static, 'static> {
    let app = App::new("SiWx917 Serial Bootloader Programmer")
        .usage("siwx-sbl-prog [SUBCOMMAND] [OPTIONS]")
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Image builder and programmer for the SiWx917 UART bootloader")
        .subcommand(
            SubCommand::with_name("rps")
                .about("Wrap a firmware binary in an RPS image")
                .setting(AppSettings::ColoredHelp)
                .arg(
                    opt("address", "Flash address the firmware is written to (hex)")
                        .short("a")
                        .default_value("0x08012000")
                )
                .arg(
                    opt("input", "Firmware binary (.bin)")
                        .short("i")
                        .required(true)
                )
                .arg(
                    opt("output", "RPS image to write (.rps)")
                        .short("o")
                        .required(true)
                )
        )
        .subcommand(
            SubCommand::with_name("flash")
                .about("Flash an RPS image through the bootloader")
                .setting(AppSettings::ColoredHelp)
                .arg(
                    opt("port", "Serial port to use")
                        .short("p")
                        .required(true)
                )
                .arg(
                    opt("debug", "Debug level, 0 (none) to 3 (raw serial traffic)")
                        .short("d")
                        .default_value("0")
                )
                .arg(
                    opt("type", "Image type to flash: m4 (application) or ta (network processor)")
                        .short("t")
                        .default_value("m4")
                )
                .arg(
                    Arg::with_name("FILE")
                        .required(true)
                        .takes_value(true)
                        .help("RPS image to flash")
                )
        );

    // When double clicking the binary the binary will be paused. Useful on
    // windows, since the Console window will be closed inmediately.
    #[cfg(windows)]
    let app = app.setting(AppSettings::WaitOnError);

    app
}

fn opt(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).takes_value(true).help(help)
}
