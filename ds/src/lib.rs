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

pub use undelfat_err::{Error, IoError, Result};

/// Byte-addressable random-access view over a disk image.
///
/// The caller holds the view exclusively for the lifetime of a request:
/// reads take `&self`, writes take `&mut self`, and every access is bounds
/// checked against [`DataStorage::len`].
pub trait DataStorage {
    /// Size of the image in bytes.
    fn len(&self) -> u64;

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()>;
}

impl<DS: DataStorage + ?Sized> DataStorage for &mut DS {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        (**self).read(offset, buffer)
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        (**self).write(offset, buffer)
    }
}
