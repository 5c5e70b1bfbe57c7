// Copyright 2024 Kevin Ludwig
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

mod request;

use std::process::ExitCode;

use log::error;

use request::{Mode, Request};
use undelfat_ds_mmap::MmapStorage;
use undelfat_fs::{FileSystem, Outcome, Result};
use undelfat_fs_fat::FileSystemServer;

const USAGE: &str = "Usage: undelfat <disk-image> <options>
  -i                     Print the file system information.
  -l                     List the root directory.
  -r filename [-s sha1]  Recover a contiguous file.
  -R filename -s sha1    Recover a possibly non-contiguous file.";

fn main() -> ExitCode {
    stderrlog::new().verbosity(1).init().ok();

    let Some(request) = request::parse(std::env::args_os()) else {
        println!("{USAGE}");
        return ExitCode::FAILURE;
    };
    match run(request) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn run(request: Request) -> Result<()> {
    let storage = MmapStorage::open(&request.image)?;
    let mut file_system = FileSystemServer::new(storage)?;
    match request.mode {
        Mode::Info => {
            let info = file_system.info();
            println!("Number of FATs = {}", info.fat_count);
            println!("Number of bytes per sector = {}", info.bytes_per_sector);
            println!("Number of sectors per cluster = {}", info.sectors_per_cluster);
            println!("Number of reserved sectors = {}", info.reserved_sectors);
        }
        Mode::List => {
            let entries = file_system.list()?;
            for entry in &entries {
                println!(
                    "{}{} (size = {}, starting cluster = {})",
                    entry.name,
                    if entry.directory { "/" } else { "" },
                    entry.size,
                    entry.first_cluster
                );
            }
            println!("Total number of entries = {}", entries.len());
        }
        Mode::RecoverContiguous { name, digest } => {
            let outcome = file_system.recover_contiguous(&name, digest.as_ref())?;
            println!("{name}: {}", status(outcome));
        }
        Mode::RecoverFragmented { name, digest } => {
            let outcome = file_system.recover_fragmented(&name, &digest)?;
            println!("{name}: {}", status(outcome));
        }
    }
    Ok(())
}

fn status(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::NotFound => "file not found",
        Outcome::Ambiguous => "multiple candidates found",
        Outcome::Recovered => "successfully recovered",
        Outcome::RecoveredWithDigest => "successfully recovered with SHA-1",
    }
}
