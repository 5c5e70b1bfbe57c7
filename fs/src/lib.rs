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

pub use undelfat_err::*;

use std::fmt;

/// 20-byte SHA-1 digest identifying expected file contents.
pub type Sha1Digest = [u8; 20];

pub trait FileSystem {
    /// Basic geometry of the volume.
    fn info(&self) -> Info;

    /// Live entries of the root directory, in on-disk order.
    fn list(&self) -> Result<Vec<Entry>>;

    /// Revive the deleted file `name`, assuming its clusters were laid out
    /// sequentially from its starting cluster. Without a digest the match
    /// must be unique; with one, the first candidate hashing to it wins.
    fn recover_contiguous(
        &mut self,
        name: &ShortName,
        digest: Option<&Sha1Digest>,
    ) -> Result<Outcome>;

    /// Revive the deleted file `name` by searching free clusters for a
    /// possibly non-contiguous sequence hashing to `digest`.
    fn recover_fragmented(&mut self, name: &ShortName, digest: &Sha1Digest) -> Result<Outcome>;
}

/// Volume figures reported by the info operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub fat_count: u32,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
}

/// One live root directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub directory: bool,
    pub size: u32,
    pub first_cluster: u32,
}

/// Result of a recovery request. Failures to find or disambiguate a
/// candidate are outcomes, not errors; the volume is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotFound,
    Ambiguous,
    Recovered,
    RecoveredWithDigest,
}

/// Canonical 11-byte 8.3 short name, upper half space padded, as stored in
/// a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName([u8; 11]);

impl ShortName {
    /// Canonicalise a command-line name: split at the last `.` when present,
    /// pad the base to 8 bytes and the extension to 3. Names that cannot fit
    /// the 8.3 form yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        if name.len() > 12 {
            return None;
        }
        let (base, extension) = match name.rsplit_once('.') {
            Some((base, extension)) => (base, extension),
            None => (name, ""),
        };
        if base.len() > 8 || extension.len() > 3 {
            return None;
        }
        let mut bytes = [b' '; 11];
        bytes[..base.len()].copy_from_slice(base.as_bytes());
        bytes[8..8 + extension.len()].copy_from_slice(extension.as_bytes());
        Some(Self(bytes))
    }

    pub fn from_raw(bytes: [u8; 11]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// First byte of the canonical name, the one a delete mark clobbers.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// The ten bytes that survive deletion.
    pub fn suffix(&self) -> &[u8] {
        &self.0[1..]
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in trim_padding(&self.0[..8]) {
            write!(f, "{}", c as char)?;
        }
        let extension = trim_padding(&self.0[8..]);
        if !extension.is_empty() {
            write!(f, ".")?;
            for &c in extension {
                write!(f, "{}", c as char)?;
            }
        }
        Ok(())
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_names() {
        assert_eq!(ShortName::parse("HELLO.TXT").unwrap().as_bytes(), b"HELLO   TXT");
        assert_eq!(ShortName::parse("A.B").unwrap().as_bytes(), b"A       B  ");
        assert_eq!(ShortName::parse("LONGNAME.EXT").unwrap().as_bytes(), b"LONGNAMEEXT");
    }

    #[test]
    fn parses_dotless_names() {
        assert_eq!(ShortName::parse("README").unwrap().as_bytes(), b"README     ");
        assert_eq!(ShortName::parse("12345678").unwrap().as_bytes(), b"12345678   ");
    }

    #[test]
    fn splits_at_the_last_dot() {
        assert_eq!(ShortName::parse("A.B.C").unwrap().as_bytes(), b"A.B     C  ");
        assert_eq!(ShortName::parse("TRAIL.").unwrap().as_bytes(), b"TRAIL      ");
    }

    #[test]
    fn rejects_names_that_do_not_fit() {
        assert!(ShortName::parse("TOOLONGNAME.X").is_none());
        assert!(ShortName::parse("NINECHARS").is_none());
        assert!(ShortName::parse("BASE.EXTS").is_none());
        assert!(ShortName::parse("WAYTOOLONGNAME").is_none());
    }

    #[test]
    fn renders_trimmed() {
        assert_eq!(ShortName::parse("HELLO.TXT").unwrap().to_string(), "HELLO.TXT");
        assert_eq!(ShortName::parse("README").unwrap().to_string(), "README");
        assert_eq!(ShortName::from_raw(*b"NOEXT      ").to_string(), "NOEXT");
        assert_eq!(ShortName::from_raw(*b"FILE    C  ").to_string(), "FILE.C");
    }

    #[test]
    fn exposes_the_surviving_suffix() {
        let name = ShortName::parse("HELLO.TXT").unwrap();
        assert_eq!(name.first_byte(), b'H');
        assert_eq!(name.suffix(), b"ELLO   TXT");
    }
}
