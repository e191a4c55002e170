//! Direct-mapped region/chunk caches. No LRU, no hash map -- each position
//! hashes to exactly one slot, and a miss simply evicts whatever was there.
//! Positions that fail to decode are remembered in a "broken" set so a
//! corrupt region or chunk is never retried.

use std::collections::HashSet;
use std::path::PathBuf;

use bitflags::bitflags;
use tracing::warn;

use crate::chunk::{self, Chunk, WorldCrop};
use crate::geometry::{BlockPos, ChunkPos, LocalBlockPos, RegionPos, CHUNK_LOW};
use crate::region::{self, LoadChunkStatus, RegionFile};
use crate::registry::BlockStateRegistry;

const RSIZE: usize = 1024;
const RMASK: i32 = (RSIZE - 1) as i32;
const RWIDTH: i32 = 31;

const CSIZE: usize = 4096;
const CMASK: i32 = (CSIZE - 1) as i32;
const CWIDTH: i32 = 63;

bitflags! {
    /// Which fields of a [`Block`] a caller actually wants populated;
    /// unset fields keep their zero-ish defaults.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetFields: u8 {
        const ID         = 0b0001;
        const BIOME      = 0b0010;
        const BLOCK_LIGHT = 0b0100;
        const SKY_LIGHT  = 0b1000;
        const ALL = Self::ID.bits() | Self::BIOME.bits() | Self::BLOCK_LIGHT.bits() | Self::SKY_LIGHT.bits();
    }
}

/// A block queried out of the cache; `fields_set` records which of `id`,
/// `biome`, `block_light`, `sky_light` were actually requested and filled.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub pos: BlockPos,
    pub id: u16,
    pub biome: u32,
    pub block_light: u8,
    pub sky_light: u8,
    pub fields_set: GetFields,
}

impl Block {
    fn absent(pos: BlockPos) -> Self {
        Self {
            pos,
            id: 0,
            biome: 0,
            block_light: 0,
            sky_light: 15,
            fields_set: GetFields::empty(),
        }
    }
}

fn region_cache_index(pos: RegionPos) -> usize {
    ((((pos.x + 4096) & RMASK) * RWIDTH + (pos.z + 4096)) & RMASK) as usize
}

fn chunk_cache_index(pos: ChunkPos) -> usize {
    ((((pos.x + 131072) & CMASK) * CWIDTH + (pos.z + 131072)) & CMASK) as usize
}

/// Caches open regions and decoded chunks for one world directory. Not
/// `Sync`/shareable: every lookup may mutate a cache slot or a broken set.
pub struct WorldCache<'r> {
    world_dir: PathBuf,
    rotation: u8,
    world_crop: Option<WorldCrop>,
    registry: &'r mut BlockStateRegistry,
    region_slots: Vec<Option<(RegionPos, RegionFile)>>,
    chunk_slots: Vec<Option<(ChunkPos, Chunk)>>,
    broken_regions: HashSet<RegionPos>,
    broken_chunks: HashSet<ChunkPos>,
}

impl<'r> WorldCache<'r> {
    pub fn new(
        world_dir: impl Into<PathBuf>,
        rotation: u8,
        world_crop: Option<WorldCrop>,
        registry: &'r mut BlockStateRegistry,
    ) -> Self {
        Self {
            world_dir: world_dir.into(),
            rotation,
            world_crop,
            registry,
            region_slots: (0..RSIZE).map(|_| None).collect(),
            chunk_slots: (0..CSIZE).map(|_| None).collect(),
            broken_regions: HashSet::new(),
            broken_chunks: HashSet::new(),
        }
    }

    /// Shared access to the registry backing this cache's decoded chunks;
    /// render code needs this to resolve block states without a second,
    /// conflicting borrow of the same registry.
    pub fn registry(&self) -> &BlockStateRegistry {
        self.registry
    }

    /// Undoes the world's rotation to recover the on-disk position.
    fn to_original(&self, pos: ChunkPos) -> ChunkPos {
        if self.rotation == 0 {
            pos
        } else {
            pos.rotated(4 - (self.rotation % 4))
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn get_region(&mut self, pos: RegionPos) -> Option<&RegionFile> {
        if self.broken_regions.contains(&pos) {
            return None;
        }

        let slot = region_cache_index(pos);
        let hit = matches!(&self.region_slots[slot], Some((key, _)) if *key == pos);
        if !hit {
            let path = region::region_path(&self.world_dir, pos);
            if !path.exists() {
                return None;
            }
            let mut region = RegionFile::new(path);
            match region.read() {
                Ok(()) => {
                    self.region_slots[slot] = Some((pos, region));
                }
                Err(e) => {
                    warn!(?pos, error = %e, "region file broken");
                    self.region_slots[slot] = None;
                    self.broken_regions.insert(pos);
                    return None;
                }
            }
        }

        self.region_slots[slot].as_ref().map(|(_, region)| region)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_chunk(&mut self, pos: ChunkPos) -> Option<&Chunk> {
        if self.broken_chunks.contains(&pos) {
            return None;
        }

        let slot = chunk_cache_index(pos);
        let hit = matches!(&self.chunk_slots[slot], Some((key, _)) if *key == pos);
        if !hit {
            let original = self.to_original(pos);
            let region_pos = original.region();
            let Some(region) = self.get_region(region_pos) else {
                return None;
            };

            match region.load_chunk(original) {
                Ok((LoadChunkStatus::Ok, Some(nbt))) => {
                    match chunk::from_nbt(&nbt, self.registry, self.rotation, self.world_crop, original) {
                        Ok(decoded) => {
                            self.chunk_slots[slot] = Some((pos, decoded));
                        }
                        Err(e) => {
                            warn!(?pos, error = %e, "chunk decode failed");
                            self.chunk_slots[slot] = None;
                            self.broken_chunks.insert(pos);
                            return None;
                        }
                    }
                }
                Ok((LoadChunkStatus::DoesNotExist, _)) => return None,
                Ok((LoadChunkStatus::Unreadable, _)) | Err(_) => {
                    self.chunk_slots[slot] = None;
                    self.broken_chunks.insert(pos);
                    return None;
                }
            }
        }

        self.chunk_slots[slot].as_ref().map(|(_, chunk)| chunk)
    }

    /// Fetches a single block, optionally using `hint_chunk` as a fast path
    /// when it already covers `pos` -- avoids a cache lookup on the common
    /// case of iterating straight down one chunk column.
    pub fn get_block(&mut self, pos: BlockPos, hint_chunk: Option<&Chunk>, fields: GetFields) -> Block {
        if pos.y < CHUNK_LOW * 16 {
            return Block::absent(pos);
        }

        let chunk_pos = ChunkPos::from_block(pos);
        let from_hint = hint_chunk.filter(|c| c.pos() == chunk_pos);

        let chunk = match from_hint {
            Some(c) => Some(c),
            None => self.get_chunk(chunk_pos),
        };

        let Some(chunk) = chunk else {
            return Block::absent(pos);
        };

        let local = LocalBlockPos::from_block(pos);
        let mut block = Block::absent(pos);

        if fields.contains(GetFields::ID) {
            block.id = chunk.get_block_id(local);
            block.fields_set |= GetFields::ID;
        }
        if fields.contains(GetFields::BIOME) {
            block.biome = chunk.get_biome_at(local);
            block.fields_set |= GetFields::BIOME;
        }
        if fields.contains(GetFields::BLOCK_LIGHT) {
            block.block_light = chunk.get_block_light(local);
            block.fields_set |= GetFields::BLOCK_LIGHT;
        }
        if fields.contains(GetFields::SKY_LIGHT) {
            block.sky_light = chunk.get_sky_light(local);
            block.fields_set |= GetFields::SKY_LIGHT;
        }
        block
    }
}
