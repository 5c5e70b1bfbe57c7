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

use std::{ffi::OsString, path::PathBuf};

use clap::{Arg, ArgAction, ArgGroup, Command};

use undelfat_fs::{Sha1Digest, ShortName};

/// A fully validated request: one disk image and exactly one primary mode.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub image: PathBuf,
    pub mode: Mode,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Mode {
    Info,
    List,
    RecoverContiguous {
        name: ShortName,
        digest: Option<Sha1Digest>,
    },
    RecoverFragmented {
        name: ShortName,
        digest: Sha1Digest,
    },
}

fn command() -> Command {
    Command::new("undelfat")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("image")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(Arg::new("info").short('i').action(ArgAction::SetTrue))
        .arg(Arg::new("list").short('l').action(ArgAction::SetTrue))
        .arg(Arg::new("contiguous").short('r').value_name("filename"))
        .arg(
            Arg::new("fragmented")
                .short('R')
                .value_name("filename")
                .requires("sha1"),
        )
        .arg(
            Arg::new("sha1")
                .short('s')
                .value_name("sha1")
                .conflicts_with_all(["info", "list"]),
        )
        .group(
            ArgGroup::new("mode")
                .args(["info", "list", "contiguous", "fragmented"])
                .required(true),
        )
}

/// Parse a command line into a request. Any grammar violation, including a
/// digest that is not 40 hex characters or a name that cannot take the 8.3
/// form, yields `None`.
pub fn parse<I, T>(args: I) -> Option<Request>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args).ok()?;
    let image = matches.get_one::<PathBuf>("image")?.clone();
    let digest = match matches.get_one::<String>("sha1") {
        Some(sha1) => Some(parse_digest(sha1)?),
        None => None,
    };
    let mode = if matches.get_flag("info") {
        Mode::Info
    } else if matches.get_flag("list") {
        Mode::List
    } else if let Some(name) = matches.get_one::<String>("contiguous") {
        Mode::RecoverContiguous {
            name: ShortName::parse(name)?,
            digest,
        }
    } else if let Some(name) = matches.get_one::<String>("fragmented") {
        Mode::RecoverFragmented {
            name: ShortName::parse(name)?,
            digest: digest?,
        }
    } else {
        return None;
    };
    Some(Request { image, mode })
}

fn parse_digest(sha1: &str) -> Option<Sha1Digest> {
    if sha1.len() != 40 {
        return None;
    }
    hex::decode(sha1).ok()?.try_into().ok()
}
