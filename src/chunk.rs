//! A decoded chunk: up to `CHUNK_TOP - CHUNK_LOW` 16x16x16 sections, a
//! sparse section index, a 4x4x4-resolution biome array, and a handful of
//! per-voxel extra-data entries (e.g. bed occupant color).

use crate::geometry::{LocalBlockPos, CHUNK_LOW, CHUNK_TOP};
use crate::nbt::{Compound, Tag};
use crate::registry::{BlockState, BlockStateRegistry};

pub const AIR: u16 = crate::registry::AIR_ID;
const SECTION_COUNT: usize = (CHUNK_TOP - CHUNK_LOW) as usize;
const SECTION_VOLUME: usize = 16 * 16 * 16;
const SECTION_NIBBLES: usize = SECTION_VOLUME / 2;
/// One biome cube per 4x4x4 voxels, per section: `4 * 4 * 4`.
const BIOME_CELLS_PER_SECTION: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("section {section_y} block palette index {index} out of range (palette has {palette_len} entries)")]
    PaletteIndexOutOfRange {
        section_y: i32,
        index: usize,
        palette_len: usize,
    },
    #[error("section {section_y} packed index array too short for {count} entries at {bits} bits each")]
    PackedArrayTooShort { section_y: i32, count: usize, bits: usize },
    #[error("missing required NBT field `{0}`")]
    MissingField(&'static str),
}

/// Axis-aligned x/z crop; `y` is not cropped.
#[derive(Debug, Clone, Copy)]
pub struct WorldCrop {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl WorldCrop {
    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }
}

#[derive(Clone)]
pub struct Section {
    pub block_ids: Box<[u16; SECTION_VOLUME]>,
    pub block_light: Box<[u8; SECTION_NIBBLES]>,
    pub sky_light: Box<[u8; SECTION_NIBBLES]>,
}

impl Default for Section {
    fn default() -> Self {
        Self {
            block_ids: Box::new([AIR; SECTION_VOLUME]),
            block_light: Box::new([0; SECTION_NIBBLES]),
            // Sky light defaults to fully lit, matching an absent section.
            sky_light: Box::new([0xff; SECTION_NIBBLES]),
        }
    }
}

/// A Minecraft chunk: read-only access to block ids, light and biome data.
pub struct Chunk {
    chunk_pos: crate::geometry::ChunkPos,
    chunk_pos_original: crate::geometry::ChunkPos,
    rotation: u8,
    world_crop: Option<WorldCrop>,
    /// Index into `sections`, or `None` if the section is absent.
    section_offsets: [Option<usize>; SECTION_COUNT],
    sections: Vec<Section>,
    /// One biome id per 4x4x4 cube, indexed `y*16 + z*4 + x` (x, z in 0..3).
    biomes: Vec<u32>,
    extra_data: std::collections::HashMap<i32, u16>,
}

impl Chunk {
    pub fn pos(&self) -> crate::geometry::ChunkPos {
        self.chunk_pos
    }

    /// The chunk position as stored on disk, before rotation.
    pub fn pos_original(&self) -> crate::geometry::ChunkPos {
        self.chunk_pos_original
    }

    pub fn has_section(&self, section_index: i32) -> bool {
        section_slot(section_index)
            .and_then(|slot| self.section_offsets.get(slot).copied())
            .flatten()
            .is_some()
    }

    fn resolve(&self, local: LocalBlockPos) -> LocalBlockPos {
        if self.rotation == 0 {
            local
        } else {
            // invert the forward rotation: 4-k quarter turns undoes k
            local.rotated(4 - (self.rotation % 4))
        }
    }

    /// World crop bounds global block coordinates, not chunk-local ones;
    /// `local` is in the chunk's public (already-rotated) coordinate frame.
    fn in_crop(&self, local: LocalBlockPos) -> bool {
        match &self.world_crop {
            Some(crop) => {
                let global = local.to_global(self.chunk_pos);
                crop.contains(global.x, global.z)
            }
            None => true,
        }
    }

    pub fn get_block_id(&self, local: LocalBlockPos) -> u16 {
        if !self.in_crop(local) {
            return AIR;
        }
        let local = self.resolve(local);
        let Some(slot) = section_slot(floordiv16(local.y)) else {
            return AIR;
        };
        match self.section_offsets.get(slot).copied().flatten() {
            Some(idx) => {
                let section = &self.sections[idx];
                section.block_ids[block_in_section_index(local)]
            }
            None => AIR,
        }
    }

    pub fn get_block_light(&self, local: LocalBlockPos) -> u8 {
        self.get_nibble(local, true)
    }

    pub fn get_sky_light(&self, local: LocalBlockPos) -> u8 {
        self.get_nibble(local, false)
    }

    fn get_nibble(&self, local: LocalBlockPos, block_light: bool) -> u8 {
        let local = self.resolve(local);
        let Some(slot) = section_slot(floordiv16(local.y)) else {
            return if block_light { 0 } else { 15 };
        };
        match self.section_offsets.get(slot).copied().flatten() {
            Some(idx) => {
                let section = &self.sections[idx];
                let array = if block_light {
                    &section.block_light
                } else {
                    &section.sky_light
                };
                let index = block_in_section_index(local);
                let byte = array[index / 2];
                if index % 2 == 0 {
                    byte & 0x0f
                } else {
                    (byte >> 4) & 0x0f
                }
            }
            None => {
                if block_light {
                    0
                } else {
                    15
                }
            }
        }
    }

    pub fn get_biome_at(&self, local: LocalBlockPos) -> u32 {
        let local = self.resolve(local);
        let section_y = floordiv16(local.y) - CHUNK_LOW;
        let cell_y = ((local.y.rem_euclid(16)) / 4) + section_y * 4;
        let cell_x = local.x / 4;
        let cell_z = local.z / 4;
        let index = (cell_y * 16 + cell_z * 4 + cell_x) as usize;
        self.biomes.get(index).copied().unwrap_or(0)
    }

    pub fn get_extra_data(&self, local: LocalBlockPos, default: u16) -> u16 {
        let local = self.resolve(local);
        self.extra_data
            .get(&position_key(local))
            .copied()
            .unwrap_or(default)
    }
}

fn floordiv16(y: i32) -> i32 {
    crate::geometry::floordiv(y, 16)
}

fn section_slot(section_index: i32) -> Option<usize> {
    let slot = section_index - CHUNK_LOW;
    if slot < 0 || slot as usize >= SECTION_COUNT {
        None
    } else {
        Some(slot as usize)
    }
}

fn block_in_section_index(local: LocalBlockPos) -> usize {
    let x = local.x.rem_euclid(16) as usize;
    let z = local.z.rem_euclid(16) as usize;
    let y = local.y.rem_euclid(16) as usize;
    y * 16 * 16 + z * 16 + x
}

fn position_key(local: LocalBlockPos) -> i32 {
    (local.x & 0xf) | ((local.z & 0xf) << 4) | (local.y << 8)
}

/// Number of bits needed to represent `count` distinct palette indices,
/// floored at `min_bits` (4 for block palettes per vanilla convention, 0
/// for biome palettes).
fn bits_per_index(count: usize, min_bits: u32) -> u32 {
    let needed = if count <= 1 {
        0
    } else {
        (usize::BITS - (count - 1).leading_zeros()).max(1)
    };
    needed.max(min_bits)
}

/// Unpacks a `data` array of packed indices, `bits` wide each, exactly
/// `floor(64/bits)` per `i64` word with unused trailing bits -- indices
/// never span a word boundary.
fn unpack_indices(data: &[i64], bits: u32, count: usize, section_y: i32) -> Result<Vec<usize>, ChunkError> {
    if bits == 0 {
        return Ok(vec![0; count]);
    }
    let per_word = 64 / bits as usize;
    let needed_words = count.div_ceil(per_word);
    if data.len() < needed_words {
        return Err(ChunkError::PackedArrayTooShort {
            section_y,
            count,
            bits: bits as usize,
        });
    }
    let mask = (1u64 << bits) - 1;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let word = data[i / per_word] as u64;
        let shift = (i % per_word) as u32 * bits;
        out.push(((word >> shift) & mask) as usize);
    }
    Ok(out)
}

/// Maps a namespaced biome name (e.g. `minecraft:plains`) to a stable u32
/// id via FNV-1a, since biome names aren't registered anywhere else this
/// crate has access to.
pub(crate) fn biome_name_id(name: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in name.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

fn block_state_from_nbt(tag: &Tag) -> BlockState {
    let Tag::Compound(c) = tag else {
        return BlockState::new("minecraft:air");
    };
    let name = c.get_str("Name").unwrap_or("minecraft:air").to_string();
    let mut state = BlockState::new(name);
    if let Some(Tag::Compound(props)) = c.get("Properties") {
        for (k, v) in props.iter() {
            if let Tag::String(v) = v {
                state = state.with_property(k.clone(), v.clone());
            }
        }
    }
    state
}

/// Decodes a chunk's NBT tree into sections, light arrays and biomes,
/// interning block states through `registry`.
pub fn from_nbt(
    root: &Compound,
    registry: &mut BlockStateRegistry,
    rotation: u8,
    world_crop: Option<WorldCrop>,
    chunk_pos_original: crate::geometry::ChunkPos,
) -> Result<Chunk, ChunkError> {
    let mut section_offsets: [Option<usize>; SECTION_COUNT] = [None; SECTION_COUNT];
    let mut sections = Vec::new();
    // 4x4x4-resolution biome cube: 4 layers per section, 16 cells per layer.
    let mut biomes = vec![0u32; BIOME_CELLS_PER_SECTION * SECTION_COUNT];
    let mut extra_data = std::collections::HashMap::new();

    let sections_nbt = root.get_list("sections").unwrap_or(&[]);
    for section_tag in sections_nbt {
        let Tag::Compound(section) = section_tag else {
            continue;
        };
        let y = section.get_i8("Y").unwrap_or(0) as i32;
        let Some(slot) = section_slot(y) else {
            continue;
        };

        let mut decoded = Section::default();
        let mut has_blocks = false;

        if let Some(Tag::Compound(block_states)) = section.get("block_states") {
            if let Some(palette_tags) = block_states.get_list("palette") {
                let palette: Vec<BlockState> = palette_tags.iter().map(block_state_from_nbt).collect();
                let ids: Vec<u16> = palette
                    .iter()
                    .map(|state| registry.get_id(state.clone()))
                    .collect();
                if let Some(data) = block_states.get_i64_array("data") {
                    let bits = bits_per_index(palette.len(), 4);
                    let indices = unpack_indices(data, bits, SECTION_VOLUME, y)?;
                    for (i, &index) in indices.iter().enumerate() {
                        let id = *ids.get(index).ok_or(ChunkError::PaletteIndexOutOfRange {
                            section_y: y,
                            index,
                            palette_len: ids.len(),
                        })?;
                        decoded.block_ids[i] = id;
                    }
                    has_blocks = true;
                } else if ids.len() == 1 {
                    // single-entry palette, no packed data array needed.
                    decoded.block_ids.fill(ids[0]);
                    has_blocks = true;
                }
            }
        }

        if let Some(Tag::ByteArray(bytes)) = section.get("BlockLight") {
            copy_nibble_array(bytes, &mut decoded.block_light);
        }
        if let Some(Tag::ByteArray(bytes)) = section.get("SkyLight") {
            copy_nibble_array(bytes, &mut decoded.sky_light);
        }

        if let Some(Tag::Compound(biome_tag)) = section.get("biomes") {
            if let Some(palette) = biome_tag.get_list("palette") {
                let ids: Vec<u32> = palette
                    .iter()
                    .map(|t| match t {
                        Tag::String(name) => biome_name_id(name),
                        _ => 0,
                    })
                    .collect();
                let section_biome_base = slot * BIOME_CELLS_PER_SECTION;
                if ids.len() == 1 {
                    for i in 0..BIOME_CELLS_PER_SECTION {
                        biomes[section_biome_base + i] = ids[0];
                    }
                } else if let Some(data) = biome_tag.get_i64_array("data") {
                    let bits = bits_per_index(ids.len(), 0);
                    let indices = unpack_indices(data, bits, BIOME_CELLS_PER_SECTION, y)?;
                    for (i, &index) in indices.iter().enumerate() {
                        biomes[section_biome_base + i] = ids.get(index).copied().unwrap_or(0);
                    }
                }
            }
        }

        // A section is present iff at least one voxel was non-air.
        if has_blocks && decoded.block_ids.iter().any(|&id| id != AIR) {
            section_offsets[slot] = Some(sections.len());
            sections.push(decoded);
        }
    }

    if let Some(block_entities) = root.get_list("block_entities") {
        for entity in block_entities {
            if let Tag::Compound(c) = entity {
                let (Some(x), Some(y), Some(z)) = (c.get_i32("x"), c.get_i32("y"), c.get_i32("z")) else {
                    continue;
                };
                // Only a handful of block kinds carry extra semantic bits
                // (e.g. bed occupant color); callers request them via
                // `get_extra_data` with a block-specific default.
                if let Some(color) = c.get_i32("color") {
                    let local = LocalBlockPos::new(x.rem_euclid(16), z.rem_euclid(16), y);
                    extra_data.insert(position_key(local), color as u16);
                }
            }
        }
    }

    let chunk_pos = chunk_pos_original.rotated(rotation);

    Ok(Chunk {
        chunk_pos,
        chunk_pos_original,
        rotation,
        world_crop,
        section_offsets,
        sections,
        biomes,
        extra_data,
    })
}

fn copy_nibble_array(bytes: &[i8], out: &mut [u8; SECTION_NIBBLES]) {
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = *bytes.get(i).unwrap_or(&0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ChunkPos;

    fn single_block_chunk(registry: &mut BlockStateRegistry, id_name: &str) -> Chunk {
        let mut root = Compound::new();
        let mut section = Compound::new();
        section.insert("Y", Tag::Byte(0));
        let mut block_states = Compound::new();
        let mut palette_entry = Compound::new();
        palette_entry.insert("Name", Tag::String(id_name.to_string()));
        block_states.insert("palette", Tag::List(vec![Tag::Compound(palette_entry)]));
        section.insert("block_states", Tag::Compound(block_states));
        root.insert("sections", Tag::List(vec![Tag::Compound(section)]));

        from_nbt(&root, registry, 0, None, ChunkPos::new(0, 0)).unwrap()
    }

    #[test]
    fn absent_section_returns_air() {
        let mut registry = BlockStateRegistry::new();
        let chunk = single_block_chunk(&mut registry, "minecraft:stone");
        let pos = LocalBlockPos::new(0, 0, 100); // far above the only section
        assert_eq!(chunk.get_block_id(pos), AIR);
    }

    #[test]
    fn single_entry_palette_fills_whole_section() {
        let mut registry = BlockStateRegistry::new();
        let chunk = single_block_chunk(&mut registry, "minecraft:stone");
        let stone_id = registry.get_id(BlockState::new("minecraft:stone"));
        assert_eq!(chunk.get_block_id(LocalBlockPos::new(5, 5, 5)), stone_id);
    }

    #[test]
    fn crop_outside_x_or_z_returns_air() {
        let mut registry = BlockStateRegistry::new();
        let mut root = Compound::new();
        let mut section = Compound::new();
        section.insert("Y", Tag::Byte(0));
        let mut block_states = Compound::new();
        let mut palette_entry = Compound::new();
        palette_entry.insert("Name", Tag::String("minecraft:stone".to_string()));
        block_states.insert("palette", Tag::List(vec![Tag::Compound(palette_entry)]));
        section.insert("block_states", Tag::Compound(block_states));
        root.insert("sections", Tag::List(vec![Tag::Compound(section)]));

        let crop = WorldCrop {
            min_x: 0,
            max_x: 0,
            min_z: 0,
            max_z: 0,
        };
        let chunk = from_nbt(&root, &mut registry, 0, Some(crop), ChunkPos::new(0, 0)).unwrap();
        assert_eq!(chunk.get_block_id(LocalBlockPos::new(1, 0, 5)), AIR);
        assert_ne!(chunk.get_block_id(LocalBlockPos::new(0, 0, 5)), AIR);
    }

    #[test]
    fn sky_light_defaults_to_fifteen_for_absent_section() {
        let mut registry = BlockStateRegistry::new();
        let chunk = single_block_chunk(&mut registry, "minecraft:stone");
        let pos = LocalBlockPos::new(0, 0, 200);
        assert_eq!(chunk.get_sky_light(pos), 15);
        assert_eq!(chunk.get_block_light(pos), 0);
    }

    #[test]
    fn bits_per_index_has_a_floor_of_four_for_blocks() {
        assert_eq!(bits_per_index(2, 4), 4);
        assert_eq!(bits_per_index(16, 4), 4);
        assert_eq!(bits_per_index(17, 4), 5);
    }

    #[test]
    fn packed_indices_do_not_span_word_boundaries() {
        // bits=5, 12 indices per word (60 bits used, 4 wasted)
        let word: i64 = (1i64 << 5) | (2i64 << 10);
        let out = unpack_indices(&[word], 5, 3, 0).unwrap();
        assert_eq!(out, vec![0, 1, 2]);
    }
}
