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

use std::{fs::OpenOptions, path::Path};

use memmap2::MmapMut;

use undelfat_ds::{DataStorage, Error, IoError, Result};

/// Disk image mapped read/write into memory, shared with the file system.
/// Writes land in the image through the mapping; durability is managed by
/// the host.
pub struct MmapStorage {
    map: MmapMut,
}

impl MmapStorage {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|error| Error::Io(IoError::Open(error)))?;
        // Safety: the engine is the only writer of the image for the
        // lifetime of the request.
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|error| Error::Io(IoError::Map(error)))?;
        Ok(Self { map })
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let size = self.map.len() as u64;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(offset as usize..end as usize),
            _ => Err(Error::Io(IoError::OutOfBounds { offset, len, size })),
        }
    }
}

impl DataStorage for MmapStorage {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let range = self.range(offset, buffer.len())?;
        buffer.copy_from_slice(&self.map[range]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        let range = self.range(offset, buffer.len())?;
        self.map[range].copy_from_slice(buffer);
        Ok(())
    }
}
