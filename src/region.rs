//! Region files: a 32x32 grid of chunks stored in one file, as an 8-KiB
//! header of offset/timestamp tables followed by 4096-byte-aligned,
//! individually compressed chunk blobs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::geometry::{ChunkPos, RegionPos};
use crate::nbt::{self, Compound, Compression, NbtError};

const SECTOR_SIZE: usize = 4096;
const HEADER_SIZE: usize = SECTOR_SIZE * 2;
const CHUNKS_PER_REGION: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("region header truncated: got {got} bytes, need at least {HEADER_SIZE}")]
    TruncatedHeader { got: usize },
    #[error("chunk sector offset {sector} out of range (file has {file_sectors} sectors)")]
    SectorOutOfRange { sector: u32, file_sectors: u32 },
    #[error("chunk blob truncated")]
    TruncatedBlob,
    #[error("unknown chunk compression code {0}")]
    UnknownCompression(u8),
    #[error("I/O error reading region file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed NBT in chunk blob: {0}")]
    Nbt(#[from] NbtError),
}

/// Result of attempting to load a single chunk from a region file.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadChunkStatus {
    Ok,
    DoesNotExist,
    Unreadable,
}

/// One 32x32-chunk region file, mapped/opened on demand and never mutated
/// after read.
pub struct RegionFile {
    path: PathBuf,
    /// `(sector_offset, sector_count)` per chunk slot, `None` if absent.
    offsets: [Option<(u32, u8)>; CHUNKS_PER_REGION],
    /// Total sectors in the file, as of the last `read()`; used to catch a
    /// chunk offset table entry that points past the end of the file.
    file_sectors: u32,
}

impl RegionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offsets: [None; CHUNKS_PER_REGION],
            file_sectors: 0,
        }
    }

    /// Validates the header and records which chunk slots are populated.
    pub fn read(&mut self) -> Result<(), RegionError> {
        let mut file = File::open(&self.path)?;
        let mut header = [0u8; HEADER_SIZE];
        let got = read_as_much_as_possible(&mut file, &mut header)?;
        if got < HEADER_SIZE {
            return Err(RegionError::TruncatedHeader { got });
        }

        self.file_sectors = (file.metadata()?.len() / SECTOR_SIZE as u64) as u32;

        for i in 0..CHUNKS_PER_REGION {
            let entry = u32::from_be_bytes(header[i * 4..i * 4 + 4].try_into().unwrap());
            if entry == 0 {
                self.offsets[i] = None;
                continue;
            }
            let sector_offset = entry >> 8;
            let sector_count = (entry & 0xff) as u8;
            self.offsets[i] = Some((sector_offset, sector_count));
        }
        Ok(())
    }

    fn slot_index(local_x: i32, local_z: i32) -> usize {
        (local_x + local_z * 32) as usize
    }

    /// Locates the blob, decompresses and decodes it, returning the NBT
    /// root. `pos` is the (already de-rotated) chunk position.
    pub fn load_chunk(&self, pos: ChunkPos) -> Result<(LoadChunkStatus, Option<Compound>), RegionError> {
        let (local_x, local_z) = pos.local_in_region();
        let slot = &self.offsets[Self::slot_index(local_x, local_z)];
        let Some((sector_offset, sector_count)) = *slot else {
            return Ok((LoadChunkStatus::DoesNotExist, None));
        };
        if sector_offset == 0 || sector_count == 0 {
            return Ok((LoadChunkStatus::DoesNotExist, None));
        }

        match self.read_blob(sector_offset, sector_count) {
            Ok(Some(nbt)) => Ok((LoadChunkStatus::Ok, Some(nbt))),
            Ok(None) => Ok((LoadChunkStatus::DoesNotExist, None)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "chunk blob unreadable");
                Ok((LoadChunkStatus::Unreadable, None))
            }
        }
    }

    fn read_blob(&self, sector_offset: u32, sector_count: u8) -> Result<Option<Compound>, RegionError> {
        let end_sector = sector_offset + sector_count as u32;
        if sector_offset < 2 || end_sector > self.file_sectors {
            return Err(RegionError::SectorOutOfRange {
                sector: sector_offset,
                file_sectors: self.file_sectors,
            });
        }

        let mut file = File::open(&self.path)?;
        let byte_offset = sector_offset as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(byte_offset))?;

        let mut sectors = vec![0u8; sector_count as usize * SECTOR_SIZE];
        let got = read_as_much_as_possible(&mut file, &mut sectors)?;
        if got < 5 {
            return Err(RegionError::TruncatedBlob);
        }

        let length = u32::from_be_bytes(sectors[0..4].try_into().unwrap()) as usize;
        if length == 0 {
            return Ok(None);
        }
        let compression_code = sectors[4];
        let body_len = length - 1;
        if 5 + body_len > got {
            return Err(RegionError::TruncatedBlob);
        }
        let body = &sectors[5..5 + body_len];

        let compression = match compression_code {
            1 => Compression::Gzip,
            2 => Compression::Zlib,
            3 => Compression::Uncompressed,
            other => return Err(RegionError::UnknownCompression(other)),
        };

        Ok(Some(nbt::decode(body, compression)?))
    }
}

fn read_as_much_as_possible(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Builds the on-disk path for a region file under a world's `region/`
/// directory.
pub fn region_path(world_dir: &Path, pos: RegionPos) -> PathBuf {
    world_dir.join("region").join(pos.format_filename())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_region_with_one_chunk(dir: &Path, chunk: ChunkPos, body: &[u8], compression_code: u8) -> PathBuf {
        let path = dir.join("r.0.0.mca");
        let mut file = File::create(&path).unwrap();

        let mut header = vec![0u8; HEADER_SIZE];
        let (lx, lz) = chunk.local_in_region();
        let slot = (lx + lz * 32) as usize;
        let sector_count = ((5 + body.len()).div_ceil(SECTOR_SIZE)).max(1) as u8;
        let entry = (2u32 << 8) | sector_count as u32;
        header[slot * 4..slot * 4 + 4].copy_from_slice(&entry.to_be_bytes());
        file.write_all(&header).unwrap();

        let mut blob = Vec::new();
        blob.extend_from_slice(&((body.len() + 1) as u32).to_be_bytes());
        blob.push(compression_code);
        blob.extend_from_slice(body);
        blob.resize(sector_count as usize * SECTOR_SIZE, 0);
        file.write_all(&blob).unwrap();
        path
    }

    #[test]
    fn reads_a_single_uncompressed_chunk() {
        let dir = tempdir();
        let mut root = Compound::new();
        root.insert("DataVersion", nbt::Tag::Int(3465));
        let plain = nbt::encode(&root, Compression::Uncompressed).unwrap();
        let path = write_region_with_one_chunk(dir.path(), ChunkPos::new(0, 0), &plain, 3);

        let mut region = RegionFile::new(path);
        region.read().unwrap();
        let (status, nbt) = region.load_chunk(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(status, LoadChunkStatus::Ok);
        assert_eq!(nbt.unwrap().get_i32("DataVersion"), Some(3465));
    }

    #[test]
    fn missing_chunk_reports_does_not_exist() {
        let dir = tempdir();
        let path = dir.path().join("r.0.0.mca");
        File::create(&path)
            .unwrap()
            .write_all(&vec![0u8; HEADER_SIZE])
            .unwrap();
        let mut region = RegionFile::new(path);
        region.read().unwrap();
        let (status, nbt) = region.load_chunk(ChunkPos::new(5, 5)).unwrap();
        assert_eq!(status, LoadChunkStatus::DoesNotExist);
        assert!(nbt.is_none());
    }

    #[test]
    fn chunk_pointing_past_end_of_file_is_unreadable() {
        let dir = tempdir();
        let path = dir.path().join("r.0.0.mca");
        let mut header = vec![0u8; HEADER_SIZE];
        // claims sector 50 (well past the file's actual two header sectors)
        let entry = (50u32 << 8) | 1u32;
        header[0..4].copy_from_slice(&entry.to_be_bytes());
        File::create(&path).unwrap().write_all(&header).unwrap();

        let mut region = RegionFile::new(path);
        region.read().unwrap();
        let (status, nbt) = region.load_chunk(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(status, LoadChunkStatus::Unreadable);
        assert!(nbt.is_none());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let dir = tempdir();
        let path = dir.path().join("r.0.0.mca");
        File::create(&path).unwrap().write_all(&[0u8; 10]).unwrap();
        let mut region = RegionFile::new(path);
        assert!(matches!(
            region.read(),
            Err(RegionError::TruncatedHeader { .. })
        ));
    }

    // minimal self-contained temp dir helper; avoids adding a dev-dependency
    // purely for a handful of fixture files.
    struct TempDir(PathBuf);
    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "mc-tilemap-core-test-{}-{}",
            std::process::id(),
            // a cheap per-call nonce; Instant avoids the banned now()/random() calls
            Box::into_raw(Box::new(0u8)) as usize
        ));
        std::fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }
}
