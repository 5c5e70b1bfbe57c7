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

use std::mem::size_of;

use log::error;
use sha1::{Digest, Sha1};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

use undelfat_ds::DataStorage;
use undelfat_fs::{
    Entry, Error, FileSystem, FsError, Info, Outcome, Result, Sha1Digest, ShortName,
};

/// Only the low 28 bits of a FAT entry carry meaning; the upper 4 are
/// reserved.
const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;
/// A masked FAT entry of zero marks a free cluster.
const FAT_ENTRY_FREE: u32 = 0;
/// Masked FAT entries at or above this value terminate a cluster chain.
const FAT_ENTRY_EOC: u32 = 0x0FFF_FFF8;

/// Attribute of a long-filename fragment entry.
const ATTR_LONG_NAME: u8 = 0x0F;
/// Attribute of a subdirectory entry.
const ATTR_DIRECTORY: u8 = 0x10;

/// First name byte of a slot that has never been used.
const ENTRY_UNUSED: u8 = 0x00;
/// First name byte of a deleted entry.
const ENTRY_DELETED: u8 = 0xE5;

/// Highest cluster id considered by the fragmented search. Deleted data
/// lying beyond this window is not reconstructable.
const SEARCH_WINDOW_END: u32 = 11;

/// FAT32 deleted-file recovery engine over a byte-addressable disk image.
///
/// Mutations are confined to the first name byte of a single directory
/// entry and the reinstated chain slots of every FAT replica; failed
/// recoveries leave the image untouched.
pub struct FileSystemServer<DS: DataStorage> {
    data_storage: DS,
    geometry: Geometry,
}

impl<DS: DataStorage> FileSystemServer<DS> {
    pub fn new(data_storage: DS) -> Result<Self> {
        let mut boot_sector = BootSector::new_zeroed();
        data_storage.read(0, boot_sector.as_mut_bytes())?;

        let bytes_per_sector = boot_sector.bytes_per_sector.get() as u32;
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            error!("Bytes per sector ({bytes_per_sector}) shall be 512, 1024, 2048 or 4096");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let sectors_per_cluster = boot_sector.sectors_per_cluster as u32;
        if !is_power_of_two(sectors_per_cluster) {
            error!("Sectors per cluster ({sectors_per_cluster}) shall be a power of 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let bytes_per_cluster = bytes_per_sector * sectors_per_cluster;
        if bytes_per_cluster > 32 * 1024 {
            error!("Bytes per cluster ({bytes_per_cluster}) shall be 32KiB or smaller");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let fat_count = boot_sector.fat_count as u32;
        if fat_count == 0 {
            error!("Number of FATs ({fat_count}) shall be 1 or more");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let fat_size_sectors = boot_sector.fat_size_32.get();
        if fat_size_sectors == 0 {
            error!("FAT size ({fat_size_sectors}) shall be non-zero");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let total_sectors = if boot_sector.total_sectors_32.get() != 0 {
            boot_sector.total_sectors_32.get()
        } else {
            boot_sector.total_sectors_16.get() as u32
        };
        let overhead_sectors =
            boot_sector.reserved_sectors.get() as u64 + fat_count as u64 * fat_size_sectors as u64;
        if total_sectors as u64 <= overhead_sectors {
            error!("Total sectors ({total_sectors}) shall extend past the FAT region ({overhead_sectors})");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let root_cluster = boot_sector.root_cluster.get() & FAT_ENTRY_MASK;
        if root_cluster < 2 {
            error!("Root cluster ({root_cluster}) shall be 2 or greater");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let geometry = Geometry {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors: boot_sector.reserved_sectors.get() as u32,
            fat_count,
            fat_size_sectors,
            total_sectors,
            root_cluster,
        };
        if geometry.data_offset() > data_storage.len() {
            error!(
                "Data area (offset {}) shall start within the image ({} bytes)",
                geometry.data_offset(),
                data_storage.len()
            );
            return Err(Error::Fs(FsError::Inconsistent));
        }

        Ok(Self {
            data_storage,
            geometry,
        })
    }

    /// Tombstoned regular-file entries whose surviving ten name bytes match
    /// the request, with their byte offsets, in root chain order.
    fn deleted_matches(&self, name: &ShortName) -> Result<Vec<(u64, DirEntry)>> {
        let mut matches = Vec::new();
        for (offset, dir_entry) in self.root_entries()? {
            if dir_entry.name[0] != ENTRY_DELETED
                || dir_entry.attributes == ATTR_LONG_NAME
                || dir_entry.attributes == ATTR_DIRECTORY
            {
                continue;
            }
            if dir_entry.name[1..] == *name.suffix() {
                matches.push((offset, dir_entry));
            }
        }
        Ok(matches)
    }

    /// Every 32-byte slot of the root directory, with its byte offset.
    ///
    /// The 0x00 end-of-directory sentinel is deliberately not honoured: the
    /// whole chain is scanned, so entries sitting behind a punched hole are
    /// still reachable.
    fn root_entries(&self) -> Result<Vec<(u64, DirEntry)>> {
        let entries_per_cluster = self.geometry.bytes_per_cluster() / size_of::<DirEntry>() as u64;
        let mut entries = Vec::new();
        for cluster in self.root_chain()? {
            let cluster_offset = self.geometry.cluster_offset(cluster);
            for slot in 0..entries_per_cluster {
                let offset = cluster_offset + slot * size_of::<DirEntry>() as u64;
                let mut dir_entry = DirEntry::new_zeroed();
                self.data_storage.read(offset, dir_entry.as_mut_bytes())?;
                entries.push((offset, dir_entry));
            }
        }
        Ok(entries)
    }

    /// Clusters of the root directory, in chain order, terminated by an
    /// end-of-chain marker. A pointer outside the volume or a chain longer
    /// than the volume has clusters means the FAT is corrupt.
    fn root_chain(&self) -> Result<Vec<u32>> {
        let max_cluster = self.geometry.max_cluster();
        let mut chain = Vec::new();
        let mut cluster = self.geometry.root_cluster;
        while cluster < FAT_ENTRY_EOC {
            if cluster < 2 || cluster > max_cluster || chain.len() as u64 > max_cluster as u64 {
                error!("Root directory chain shall stay within clusters 2 to {max_cluster}");
                return Err(Error::Fs(FsError::Inconsistent));
            }
            chain.push(cluster);
            cluster = self.fat_entry(cluster)?;
        }
        Ok(chain)
    }

    /// FAT entry for `cluster`, masked to its meaningful low 28 bits.
    fn fat_entry(&self, cluster: u32) -> Result<u32> {
        let mut entry = [0; 4];
        self.data_storage
            .read(self.geometry.fat_offset() + 4 * cluster as u64, &mut entry)?;
        Ok(u32::from_le_bytes(entry) & FAT_ENTRY_MASK)
    }

    /// Write `value` into the slot for `cluster` of every FAT replica,
    /// keeping the replicas coherent.
    fn set_fat_entry(&mut self, cluster: u32, value: u32) -> Result<()> {
        for replica in 0..self.geometry.fat_count {
            self.data_storage.write(
                self.geometry.fat_replica_offset(replica) + 4 * cluster as u64,
                &value.to_le_bytes(),
            )?;
        }
        Ok(())
    }

    /// Free clusters in `[lo, hi]`, ascending.
    fn free_clusters(&self, lo: u32, hi: u32) -> Result<Vec<u32>> {
        let mut free = Vec::new();
        for cluster in lo..=hi {
            if self.fat_entry(cluster)? == FAT_ENTRY_FREE {
                free.push(cluster);
            }
        }
        Ok(free)
    }

    fn recover_unique(&mut self, name: &ShortName) -> Result<Outcome> {
        let candidates = self.deleted_matches(name)?;
        let (offset, dir_entry) = match candidates.as_slice() {
            [] => return Ok(Outcome::NotFound),
            [candidate] => candidate,
            _ => return Ok(Outcome::Ambiguous),
        };
        let Some(chain) = self.contiguous_chain(dir_entry) else {
            return Ok(Outcome::NotFound);
        };
        self.commit(*offset, name.first_byte(), &chain)?;
        Ok(Outcome::Recovered)
    }

    fn recover_first_digest_match(
        &mut self,
        name: &ShortName,
        digest: &Sha1Digest,
    ) -> Result<Outcome> {
        for (offset, dir_entry) in self.deleted_matches(name)? {
            let Some(chain) = self.contiguous_chain(&dir_entry) else {
                continue;
            };
            if self.chain_digest(&chain, dir_entry.file_size.get())? == *digest {
                self.commit(offset, name.first_byte(), &chain)?;
                return Ok(Outcome::RecoveredWithDigest);
            }
        }
        Ok(Outcome::NotFound)
    }

    fn recover_search(&mut self, name: &ShortName, digest: &Sha1Digest) -> Result<Outcome> {
        let window_end = self.geometry.max_cluster().min(SEARCH_WINDOW_END);
        let pool = self.free_clusters(2, window_end)?;
        for (offset, dir_entry) in self.deleted_matches(name)? {
            let size = dir_entry.file_size.get();
            if size == 0 {
                let empty: Sha1Digest = Sha1::digest(b"").into();
                if empty == *digest {
                    self.commit(offset, name.first_byte(), &[])?;
                    return Ok(Outcome::RecoveredWithDigest);
                }
                continue;
            }
            let needed = (size as u64).div_ceil(self.geometry.bytes_per_cluster()) as usize;
            let first_cluster = dir_entry.first_cluster();
            if pool.len() < needed || first_cluster < 2 || first_cluster > SEARCH_WINDOW_END {
                continue;
            }
            if let Some(chain) = self.search_chain(first_cluster, needed, &pool, size, digest)? {
                self.commit(offset, name.first_byte(), &chain)?;
                return Ok(Outcome::RecoveredWithDigest);
            }
        }
        Ok(Outcome::NotFound)
    }

    /// Sequential cluster sequence for `dir_entry`, or `None` when the run
    /// would leave the volume and the file cannot have been contiguous.
    fn contiguous_chain(&self, dir_entry: &DirEntry) -> Option<Vec<u32>> {
        let size = dir_entry.file_size.get();
        if size == 0 {
            return Some(Vec::new());
        }
        let needed = (size as u64).div_ceil(self.geometry.bytes_per_cluster()) as u32;
        let first_cluster = dir_entry.first_cluster();
        if first_cluster < 2
            || first_cluster as u64 + needed as u64 - 1 > self.geometry.max_cluster() as u64
        {
            return None;
        }
        Some((first_cluster..first_cluster + needed).collect())
    }

    /// Depth-first search for a cluster sequence of length `needed` starting
    /// at `first_cluster` whose materialised contents hash to `digest`. The
    /// remaining clusters are drawn without replacement from `pool` in
    /// ascending id order at every depth, which biases the search toward
    /// contiguous layouts and makes the returned sequence the
    /// lexicographically smallest valid one.
    fn search_chain(
        &self,
        first_cluster: u32,
        needed: usize,
        pool: &[u32],
        size: u32,
        digest: &Sha1Digest,
    ) -> Result<Option<Vec<u32>>> {
        let mut in_use = vec![false; pool.len()];
        if let Ok(head) = pool.binary_search(&first_cluster) {
            // The head is fixed by the directory entry; never draw it again.
            in_use[head] = true;
        }
        let mut chain = vec![first_cluster];
        if self.extend_chain(&mut chain, &mut in_use, pool, needed, size, digest)? {
            Ok(Some(chain))
        } else {
            Ok(None)
        }
    }

    fn extend_chain(
        &self,
        chain: &mut Vec<u32>,
        in_use: &mut [bool],
        pool: &[u32],
        needed: usize,
        size: u32,
        digest: &Sha1Digest,
    ) -> Result<bool> {
        if chain.len() == needed {
            // The digest is only checked at full length.
            return Ok(self.chain_digest(chain, size)? == *digest);
        }
        for candidate in 0..pool.len() {
            if in_use[candidate] {
                continue;
            }
            in_use[candidate] = true;
            chain.push(pool[candidate]);
            if self.extend_chain(chain, in_use, pool, needed, size, digest)? {
                return Ok(true);
            }
            chain.pop();
            in_use[candidate] = false;
        }
        Ok(false)
    }

    /// Concatenate the payloads of `chain` (the last cluster contributes
    /// only the remainder of `size`) and hash them.
    fn chain_digest(&self, chain: &[u32], size: u32) -> Result<Sha1Digest> {
        let bytes_per_cluster = self.geometry.bytes_per_cluster();
        let mut contents = vec![0; size as usize];
        for (index, &cluster) in chain.iter().enumerate() {
            let start = index as u64 * bytes_per_cluster;
            let end = (start + bytes_per_cluster).min(size as u64);
            self.data_storage.read(
                self.geometry.cluster_offset(cluster),
                &mut contents[start as usize..end as usize],
            )?;
        }
        Ok(Sha1::digest(&contents).into())
    }

    /// Revive the entry at `entry_offset` under `first_byte` and reinstall
    /// `chain` into every FAT replica: each slot points at its successor,
    /// the last one holds the end-of-chain marker. The name byte is written
    /// first, the FAT slots second.
    fn commit(&mut self, entry_offset: u64, first_byte: u8, chain: &[u32]) -> Result<()> {
        self.data_storage.write(entry_offset, &[first_byte])?;
        for pair in chain.windows(2) {
            self.set_fat_entry(pair[0], pair[1])?;
        }
        if let Some(&last) = chain.last() {
            self.set_fat_entry(last, FAT_ENTRY_EOC)?;
        }
        Ok(())
    }
}

impl<DS: DataStorage> FileSystem for FileSystemServer<DS> {
    fn info(&self) -> Info {
        Info {
            fat_count: self.geometry.fat_count,
            bytes_per_sector: self.geometry.bytes_per_sector,
            sectors_per_cluster: self.geometry.sectors_per_cluster,
            reserved_sectors: self.geometry.reserved_sectors,
        }
    }

    fn list(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for (_, dir_entry) in self.root_entries()? {
            if dir_entry.name[0] == ENTRY_UNUSED
                || dir_entry.name[0] == ENTRY_DELETED
                || dir_entry.attributes == ATTR_LONG_NAME
            {
                continue;
            }
            entries.push(Entry {
                name: ShortName::from_raw(dir_entry.name).to_string(),
                directory: dir_entry.attributes == ATTR_DIRECTORY,
                size: dir_entry.file_size.get(),
                first_cluster: dir_entry.first_cluster(),
            });
        }
        Ok(entries)
    }

    fn recover_contiguous(
        &mut self,
        name: &ShortName,
        digest: Option<&Sha1Digest>,
    ) -> Result<Outcome> {
        match digest {
            None => self.recover_unique(name),
            Some(digest) => self.recover_first_digest_match(name, digest),
        }
    }

    fn recover_fragmented(&mut self, name: &ShortName, digest: &Sha1Digest) -> Result<Outcome> {
        self.recover_search(name, digest)
    }
}

/// Volume layout, derived once from the boot sector and immutable for the
/// lifetime of the request.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    fat_count: u32,
    fat_size_sectors: u32,
    total_sectors: u32,
    root_cluster: u32,
}

impl Geometry {
    fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    fn fat_offset(&self) -> u64 {
        self.reserved_sectors as u64 * self.bytes_per_sector as u64
    }

    fn fat_replica_offset(&self, replica: u32) -> u64 {
        (self.reserved_sectors as u64 + replica as u64 * self.fat_size_sectors as u64)
            * self.bytes_per_sector as u64
    }

    fn data_offset(&self) -> u64 {
        (self.reserved_sectors as u64 + self.fat_count as u64 * self.fat_size_sectors as u64)
            * self.bytes_per_sector as u64
    }

    /// First byte of `cluster` in the data area. Cluster numbering starts
    /// at 2.
    fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset() + (cluster as u64 - 2) * self.bytes_per_cluster()
    }

    /// Highest valid cluster id of the volume.
    fn max_cluster(&self) -> u32 {
        ((self.total_sectors as u64
            - self.reserved_sectors as u64
            - self.fat_count as u64 * self.fat_size_sectors as u64)
            / self.sectors_per_cluster as u64
            + 1) as u32
    }
}

/// FAT32 boot sector, the first 512 bytes of the volume.
///
/// Field layout is fixed by the FAT specification; all integers are little
/// endian and the struct carries no padding.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)] // every field takes part in the on-disk layout
struct BootSector {
    /// Jump instruction to the boot code.
    jump_boot: [u8; 3],
    /// Name of the system that formatted the volume.
    oem_name: [u8; 8],
    /// 512, 1024, 2048 or 4096.
    bytes_per_sector: U16,
    /// Power of two; bytes per cluster must stay at or below 32KiB.
    sectors_per_cluster: u8,
    /// Sectors in the reserved region, starting at the boot sector.
    reserved_sectors: U16,
    /// Number of FAT replicas, usually 2.
    fat_count: u8,
    /// Root directory entry count for FAT12/16; 0 on FAT32.
    root_entry_count: U16,
    /// 16-bit total sector count; meaningful when the 32-bit count is 0.
    total_sectors_16: U16,
    /// Media type.
    media: u8,
    /// FAT size in sectors for FAT12/16; 0 on FAT32.
    fat_size_16: U16,
    /// Sectors per track for interrupt 0x13.
    sectors_per_track: U16,
    /// Head count for interrupt 0x13.
    head_count: U16,
    /// Sectors preceding the partition that holds this volume.
    hidden_sectors: U32,
    /// 32-bit total sector count.
    total_sectors_32: U32,
    /// FAT size in sectors.
    fat_size_32: U32,
    /// FAT mirroring flags.
    ext_flags: U16,
    /// Volume version, 0.
    fs_version: U16,
    /// First cluster of the root directory, 2 or the first usable cluster
    /// thereafter.
    root_cluster: U32,
    /// Sector of the FSINFO structure, usually 1.
    fs_info: U16,
    /// Sector of the backup boot record, 0 or 6.
    backup_boot_sector: U16,
    /// Reserved, 0.
    reserved: [u8; 12],
    /// Interrupt 0x13 drive number.
    drive_number: u8,
    /// Reserved, 0.
    reserved1: u8,
    /// 0x29 when the three following fields are valid.
    boot_signature: u8,
    /// Volume serial number.
    volume_id: U32,
    /// Volume label, matching the label entry of the root directory.
    volume_label: [u8; 11],
    /// Informational file system type string.
    fs_type: [u8; 8],
    /// Boot code.
    boot_code: [u8; 420],
    /// 0x55 0xAA.
    signature_word: [u8; 2],
}

/// 32-byte FAT directory entry.
#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)] // every field takes part in the on-disk layout
struct DirEntry {
    /// 8.3 short name. The first byte doubles as the slot state: 0x00 never
    /// used, 0xE5 deleted.
    name: [u8; 11],
    /// Attribute bits; 0x0F marks a long-filename fragment, 0x10 a
    /// subdirectory.
    attributes: u8,
    /// Reserved.
    reserved: u8,
    /// Creation time, tenths of a second.
    creation_time_tenths: u8,
    /// Creation time.
    creation_time: U16,
    /// Creation date.
    creation_date: U16,
    /// Last access date.
    last_access_date: U16,
    /// High half of the first data cluster number.
    first_cluster_hi: U16,
    /// Last write time.
    write_time: U16,
    /// Last write date.
    write_date: U16,
    /// Low half of the first data cluster number.
    first_cluster_lo: U16,
    /// File size in bytes; 0 for directories.
    file_size: U32,
}

impl DirEntry {
    /// 28-bit first data cluster, combined from its two on-disk halves.
    fn first_cluster(&self) -> u32 {
        ((self.first_cluster_hi.get() as u32) << 16 | self.first_cluster_lo.get() as u32)
            & FAT_ENTRY_MASK
    }
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}
