//! The block-image atlas: a PNG sprite sheet plus a text metadata sidecar,
//! loaded once per `(view, rotation, texture_size)` and read-only for the
//! lifetime of a render run.

use std::collections::HashMap;
use std::path::Path;

use bitflags::bitflags;
use image::{GenericImageView, Rgba, RgbaImage};
use tracing::warn;

use crate::biome::{ColorMap, ColorMapType};
use crate::image_ops;
use crate::registry::{BlockState, BlockStateRegistry};

#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("metadata file is empty, expected a `WIDTH HEIGHT COLUMNS` header")]
    MissingHeader,
    #[error("invalid header line {0:?}, expected `WIDTH HEIGHT COLUMNS`")]
    InvalidHeaderLine(String),
    #[error("block `{name}` is missing required metadata key `{key}`")]
    MissingMetadataValue { name: String, key: &'static str },
    #[error("block `{name}` has invalid `{key}` value {value:?}")]
    InvalidMetadataValue { name: String, key: &'static str, value: String },
    #[error("I/O error loading atlas: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode atlas PNG: {0}")]
    Image(#[from] image::ImageError),
}

/// Per-face lighting treatment, chosen per block kind during preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingType {
    None,
    Simple,
    Smooth,
    /// Top face gets smooth corner lighting, remaining faces stay simple
    /// -- used for waterlogged blocks whose water-top sprite is blended
    /// in separately.
    SmoothTopRemainingSimple,
}

impl LightingType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => Self::None,
            "simple" => Self::Simple,
            "smooth" => Self::Smooth,
            "smooth_top_remaining_simple" => Self::SmoothTopRemainingSimple,
            _ => return None,
        })
    }
}

bitflags! {
    /// Which faces a sprite's UV mask actually paints; computed by
    /// scanning the mask rather than trusting metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SideMask: u8 {
        const LEFT  = 0b001;
        const RIGHT = 0b010;
        const UP    = 0b100;
    }
}

/// Whether and how a block picks up biome tinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiomeTint {
    /// Tint is alpha-blended directly over the sprite.
    Normal,
    /// Tint is first modulated by a `<name>_biome_mask` sprite, avoiding a
    /// white halo at the tinted region's edges.
    Masked,
}

/// One block state's prepared sprite and the metadata needed to render it.
#[derive(Clone)]
pub struct BlockImage {
    pub sprite: RgbaImage,
    pub uv_mask: RgbaImage,
    pub is_air: bool,
    pub biome_tint: Option<BiomeTint>,
    pub biome_colors: Option<ColorMapType>,
    pub biome_colormap: Option<ColorMap>,
    pub biome_mask: Option<RgbaImage>,
    pub is_waterloggable: bool,
    pub lighting_type: LightingType,
    pub faulty_lighting: bool,
    pub partial: bool,
    pub shadow_edges: bool,
    pub side_mask: SideMask,
    pub is_transparent: bool,
    /// A full (non-flowing) water source block, eligible for the
    /// partial-water-variant promotion.
    pub is_full_water: bool,
    /// Counts as "water" for a full-water block's neighbor check even
    /// though it isn't water itself (e.g. ice).
    pub is_water_like: bool,
}

impl BlockImage {
    fn air(width: u32, height: u32) -> Self {
        Self {
            sprite: RgbaImage::new(width, height),
            uv_mask: RgbaImage::new(width, height),
            is_air: true,
            biome_tint: None,
            biome_colors: None,
            biome_colormap: None,
            biome_mask: None,
            is_waterloggable: false,
            lighting_type: LightingType::None,
            faulty_lighting: false,
            partial: false,
            shadow_edges: false,
            side_mask: SideMask::empty(),
            is_transparent: true,
            is_full_water: false,
            is_water_like: false,
        }
    }
}

struct RawEntry {
    state: BlockState,
    color_cell: Option<usize>,
    uv_cell: Option<usize>,
    is_air: bool,
    biome_type: Option<String>,
    biome_colors: Option<String>,
    biome_colormap: Option<String>,
    is_waterloggable: bool,
    lighting_type: Option<String>,
    faulty_lighting: bool,
    partial: bool,
    shadow_edges: Option<bool>,
    is_full_water: bool,
    is_water_like: bool,
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parse_entry(line: &str) -> Option<RawEntry> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let variant = tokens.next()?;
    let state = BlockState::parse(name, variant);

    let mut entry = RawEntry {
        state,
        color_cell: None,
        uv_cell: None,
        is_air: false,
        biome_type: None,
        biome_colors: None,
        biome_colormap: None,
        is_waterloggable: false,
        lighting_type: None,
        faulty_lighting: false,
        partial: false,
        shadow_edges: None,
        is_full_water: false,
        is_water_like: false,
    };

    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "color" => entry.color_cell = value.parse().ok(),
            "uv" => entry.uv_cell = value.parse().ok(),
            "is_air" => entry.is_air = parse_bool(value),
            "biome_type" => entry.biome_type = Some(value.to_string()),
            "biome_colors" => entry.biome_colors = Some(value.to_string()),
            "biome_colormap" => entry.biome_colormap = Some(value.to_string()),
            "is_waterloggable" => entry.is_waterloggable = parse_bool(value),
            "lighting_type" => entry.lighting_type = Some(value.to_string()),
            "faulty_lighting" => entry.faulty_lighting = parse_bool(value),
            "partial" => entry.partial = parse_bool(value),
            "shadow_edges" => entry.shadow_edges = Some(parse_bool(value)),
            "full_water" => entry.is_full_water = parse_bool(value),
            "water_like" => entry.is_water_like = parse_bool(value),
            _ => {}
        }
    }
    Some(entry)
}

fn cell_rect(cell: usize, width: u32, height: u32, columns: u32) -> (u32, u32) {
    let row = cell as u32 / columns;
    let col = cell as u32 % columns;
    (col * width, row * height)
}

fn crop_cell(atlas: &RgbaImage, cell: usize, width: u32, height: u32, columns: u32) -> RgbaImage {
    let (x, y) = cell_rect(cell, width, height, columns);
    atlas.view(x, y, width, height).to_image()
}

fn scan_side_mask(uv_mask: &RgbaImage) -> SideMask {
    let mut mask = SideMask::empty();
    for pixel in uv_mask.pixels() {
        if pixel[3] == 0 {
            continue;
        }
        match pixel[2] {
            image_ops::FACE_LEFT => mask |= SideMask::LEFT,
            image_ops::FACE_RIGHT => mask |= SideMask::RIGHT,
            image_ops::FACE_UP => mask |= SideMask::UP,
            _ => {}
        }
    }
    mask
}

fn scan_transparency(sprite: &RgbaImage, uv_mask: &RgbaImage) -> bool {
    sprite
        .pixels()
        .zip(uv_mask.pixels())
        .any(|(p, uv)| uv[3] != 0 && p[3] < 255)
}

/// Converts a `0.0..=1.0` darkening factor into the fixed-point `u8`
/// multiplier `image_ops` kernels expect.
fn factor_u8(factor: f32) -> u8 {
    (factor.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub struct BlockImageAtlas {
    images: HashMap<u16, BlockImage>,
    unknown: BlockImage,
    /// Full-water block id -> its 8 pre-darkened partial-water variants,
    /// indexed by the 3-bit (west, south, up)-is-water neighbor code.
    partial_full_water_ids: HashMap<u16, [Option<u16>; 8]>,
}

impl BlockImageAtlas {
    pub fn load_from_paths(
        metadata_path: &Path,
        atlas_path: &Path,
        registry: &mut BlockStateRegistry,
        darken_left: f32,
        darken_right: f32,
    ) -> Result<Self, AtlasError> {
        let metadata = std::fs::read_to_string(metadata_path)?;
        let atlas = image::open(atlas_path)?.into_rgba8();
        Self::load(&metadata, atlas, registry, darken_left, darken_right)
    }

    pub fn load(
        metadata: &str,
        atlas: RgbaImage,
        registry: &mut BlockStateRegistry,
        darken_left: f32,
        darken_right: f32,
    ) -> Result<Self, AtlasError> {
        let mut lines = metadata.lines();
        let header = lines.next().ok_or(AtlasError::MissingHeader)?;
        let mut header_parts = header.split_whitespace();
        let (Some(w), Some(h), Some(columns)) = (header_parts.next(), header_parts.next(), header_parts.next())
        else {
            return Err(AtlasError::InvalidHeaderLine(header.to_string()));
        };
        let width: u32 = w.parse().map_err(|_| AtlasError::InvalidHeaderLine(header.to_string()))?;
        let height: u32 = h.parse().map_err(|_| AtlasError::InvalidHeaderLine(header.to_string()))?;
        let columns: u32 = columns
            .parse()
            .map_err(|_| AtlasError::InvalidHeaderLine(header.to_string()))?;

        let entries: Vec<RawEntry> = lines
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter_map(parse_entry)
            .collect();

        // Raw sprites for every entry, including `_biome_mask` helpers,
        // keyed by state so the masked-biome pass below can look siblings
        // up by name.
        let mut by_name: HashMap<String, RgbaImage> = HashMap::new();
        let mut prepared: HashMap<u16, (BlockImage, RawEntry)> = HashMap::new();

        for entry in entries {
            let name = entry.state.name.clone();
            let sprite = match entry.color_cell {
                Some(cell) => crop_cell(&atlas, cell, width, height, columns),
                None => RgbaImage::new(width, height),
            };
            by_name.insert(format!("{name}:{}", entry.state.format_variant()), sprite.clone());

            if name.ends_with("_biome_mask") {
                continue;
            }

            if entry.is_air {
                let id = registry.get_id(entry.state.clone());
                prepared.insert(id, (BlockImage::air(width, height), entry));
                continue;
            }

            let uv_mask = match entry.uv_cell {
                Some(cell) => crop_cell(&atlas, cell, width, height, columns),
                None => RgbaImage::new(width, height),
            };

            let mut sprite = sprite;
            if !name.ends_with("_biome_mask") {
                image_ops::multiply(&mut sprite, &uv_mask, factor_u8(darken_left), factor_u8(darken_right), 255);
            }

            let side_mask = scan_side_mask(&uv_mask);
            let is_transparent = scan_transparency(&sprite, &uv_mask);

            let biome_tint = match entry.biome_type.as_deref() {
                None => None,
                Some("masked") => Some(BiomeTint::Masked),
                Some(_) => Some(BiomeTint::Normal),
            };

            let biome_colors = match &entry.biome_colors {
                None => None,
                Some(s) => Some(
                    ColorMapType::parse(s).ok_or_else(|| AtlasError::InvalidMetadataValue {
                        name: name.clone(),
                        key: "biome_colors",
                        value: s.clone(),
                    })?,
                ),
            };

            // Unlike `lighting_type`/`biome_colors`, a malformed `biome_colormap`
            // is only ever warned about, not a load failure -- the block just
            // falls back to its built-in colormap.
            let biome_colormap = entry.biome_colormap.as_deref().and_then(|s| {
                let parsed = ColorMap::parse(s);
                if parsed.is_none() {
                    warn!(block = %name, value = %s, "unparseable biome_colormap, falling back to default colors");
                }
                parsed
            });

            let lighting_type = match &entry.lighting_type {
                None => None,
                Some(s) => Some(LightingType::parse(s).ok_or_else(|| AtlasError::InvalidMetadataValue {
                    name: name.clone(),
                    key: "lighting_type",
                    value: s.clone(),
                })?),
            };

            // Unspecified lighting_type falls back per the block's own
            // nature: full water/ice stay smooth-lit regardless of
            // transparency, a waterlogged block whose water-top sprite is
            // baked in keeps smooth lighting on that top face only, and
            // everything else follows plain transparency.
            let has_water_top = entry.is_waterloggable && entry.state.property("waterlogged") == Some("true");
            let default_lighting_type = if entry.is_full_water || entry.is_water_like {
                LightingType::Smooth
            } else if has_water_top {
                LightingType::SmoothTopRemainingSimple
            } else if is_transparent {
                LightingType::Simple
            } else {
                LightingType::Smooth
            };

            let image = BlockImage {
                sprite,
                uv_mask,
                is_air: false,
                biome_tint,
                biome_colors,
                biome_colormap,
                biome_mask: None,
                is_waterloggable: entry.is_waterloggable,
                lighting_type: lighting_type.unwrap_or(default_lighting_type),
                faulty_lighting: entry.faulty_lighting,
                partial: entry.partial,
                shadow_edges: entry.shadow_edges.unwrap_or(!is_transparent),
                side_mask,
                is_transparent,
                is_full_water: entry.is_full_water,
                is_water_like: entry.is_water_like,
            };

            let id = registry.get_id(entry.state.clone());
            prepared.insert(id, (image, entry));
        }

        // lighting_type defaults depend on transparency, already applied
        // above; now resolve masked-biome sprites and the partial-water
        // table, which both need cross-references between entries.
        let mut images = HashMap::new();
        let mut partial_full_water_ids: HashMap<u16, [Option<u16>; 8]> = HashMap::new();

        for (id, (mut image, entry)) in prepared {
            if image.biome_tint == Some(BiomeTint::Masked) {
                let mask_key = format!("{}_biome_mask:{}", entry.state.name, entry.state.format_variant());
                image.biome_mask = by_name.get(&mask_key).cloned().or_else(|| {
                    by_name
                        .get(&format!("{}_biome_mask:-", entry.state.name))
                        .cloned()
                });
            }

            if entry.partial {
                if let Some(index_str) = entry.state.property("partial_index") {
                    if let Ok(index) = index_str.parse::<usize>() {
                        if index < 8 {
                            let base_state = BlockState::new(entry.state.name.clone());
                            if let Some(base_id) = registry.find_id(&base_state) {
                                partial_full_water_ids.entry(base_id).or_insert([None; 8])[index] = Some(id);
                            }
                        }
                    }
                }
            }

            images.insert(id, image);
        }

        Ok(Self {
            images,
            unknown: BlockImage::air(width, height),
            partial_full_water_ids,
        })
    }

    /// Looks up a block's prepared sprite. Falls back to the same state
    /// with `waterlogged=false`, then to the built-in unknown sprite.
    pub fn get_block_image(&self, id: u16, registry: &BlockStateRegistry) -> &BlockImage {
        if let Some(image) = self.images.get(&id) {
            return image;
        }
        if let Some(state) = registry.get_state(id) {
            if state.property("waterlogged") == Some("true") {
                let unlogged = state.clone().with_property("waterlogged", "false");
                if let Some(fallback_id) = registry.find_id(&unlogged) {
                    if let Some(image) = self.images.get(&fallback_id) {
                        return image;
                    }
                }
            }
        }
        &self.unknown
    }

    /// The pre-darkened partial-water sprite id for `full_water_id`'s
    /// `(west, south, up)`-is-water neighbor code, if the atlas defined one.
    pub fn partial_water_id(&self, full_water_id: u16, neighbor_index: u8) -> Option<u16> {
        self.partial_full_water_ids
            .get(&full_water_id)
            .and_then(|variants| variants.get(neighbor_index as usize).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_atlas() -> RgbaImage {
        // 2x1 cells, each 2x2 px: cell 0 solid red, cell 1 a uv mask
        // tagging the whole cell as the up face, fully opaque.
        let mut atlas = RgbaImage::new(4, 2);
        for y in 0..2 {
            for x in 0..2 {
                atlas.put_pixel(x, y, Rgba([200, 0, 0, 255]));
            }
        }
        for y in 0..2 {
            for x in 2..4 {
                atlas.put_pixel(x, y, Rgba([0, 0, image_ops::FACE_UP, 255]));
            }
        }
        atlas
    }

    #[test]
    fn loads_a_single_block_with_color_and_uv() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:stone - color=0 uv=1\n";
        let atlas = BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6).unwrap();
        assert_eq!(atlas.len(), 1);
        let id = registry.get_id(BlockState::new("minecraft:stone"));
        let image = atlas.get_block_image(id, &registry);
        assert!(!image.is_air);
        assert_eq!(image.side_mask, SideMask::UP);
    }

    #[test]
    fn is_air_entries_get_an_empty_transparent_sprite() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:air - is_air=true\n";
        let atlas = BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6).unwrap();
        let id = registry.get_id(BlockState::new("minecraft:air"));
        assert!(atlas.get_block_image(id, &registry).is_air);
    }

    #[test]
    fn unknown_block_falls_back_to_placeholder() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:stone - color=0 uv=1\n";
        let atlas = BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6).unwrap();
        let bogus_id = registry.get_id(BlockState::new("minecraft:totally_unknown"));
        assert!(atlas.get_block_image(bogus_id, &registry).is_air);
    }

    #[test]
    fn waterlogged_fallback_uses_dry_variant() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:oak_fence waterlogged=false color=0 uv=1\n";
        let atlas = BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6).unwrap();
        let wet_id = registry.get_id(BlockState::new("minecraft:oak_fence").with_property("waterlogged", "true"));
        let image = atlas.get_block_image(wet_id, &registry);
        assert!(!image.is_air);
    }

    #[test]
    fn missing_header_is_an_error() {
        let mut registry = BlockStateRegistry::new();
        assert!(matches!(
            BlockImageAtlas::load("", tiny_atlas(), &mut registry, 0.75, 0.6),
            Err(AtlasError::MissingHeader)
        ));
    }

    #[test]
    fn full_water_and_water_like_flags_are_parsed() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:water level=0 color=0 uv=1 full_water=true\nminecraft:ice - color=0 uv=1 water_like=true\n";
        let atlas = BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6).unwrap();
        let water_id = registry.get_id(BlockState::new("minecraft:water").with_property("level", "0"));
        let ice_id = registry.get_id(BlockState::new("minecraft:ice"));
        assert!(atlas.get_block_image(water_id, &registry).is_full_water);
        assert!(atlas.get_block_image(ice_id, &registry).is_water_like);
    }

    /// 4 columns x 2px tall: cell 0 opaque red sprite, cell 1 an opaque
    /// up-face uv mask, cell 2 a translucent red sprite (for a transparent
    /// block under the same uv mask).
    fn atlas_with_translucent_cell() -> RgbaImage {
        let mut atlas = RgbaImage::new(8, 2);
        for y in 0..2 {
            for x in 0..2 {
                atlas.put_pixel(x, y, Rgba([200, 0, 0, 255]));
            }
            for x in 2..4 {
                atlas.put_pixel(x, y, Rgba([0, 0, image_ops::FACE_UP, 255]));
            }
            for x in 4..6 {
                atlas.put_pixel(x, y, Rgba([200, 0, 0, 128]));
            }
        }
        atlas
    }

    #[test]
    fn unspecified_lighting_type_defaults_per_block_nature() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 4\n\
            minecraft:stone - color=0 uv=1\n\
            minecraft:glass - color=2 uv=1\n\
            minecraft:water level=0 color=0 uv=1 full_water=true\n\
            minecraft:oak_fence waterlogged=true color=0 uv=1 is_waterloggable=true\n";
        let atlas = BlockImageAtlas::load(metadata, atlas_with_translucent_cell(), &mut registry, 0.75, 0.6).unwrap();

        let stone_id = registry.get_id(BlockState::new("minecraft:stone"));
        assert_eq!(atlas.get_block_image(stone_id, &registry).lighting_type, LightingType::Smooth);

        let glass_id = registry.get_id(BlockState::new("minecraft:glass"));
        assert_eq!(atlas.get_block_image(glass_id, &registry).lighting_type, LightingType::Simple);

        let water_id = registry.get_id(BlockState::new("minecraft:water").with_property("level", "0"));
        assert_eq!(atlas.get_block_image(water_id, &registry).lighting_type, LightingType::Smooth);

        let fence_id = registry.get_id(BlockState::new("minecraft:oak_fence").with_property("waterlogged", "true"));
        assert_eq!(
            atlas.get_block_image(fence_id, &registry).lighting_type,
            LightingType::SmoothTopRemainingSimple
        );
    }

    #[test]
    fn invalid_biome_colors_is_an_error() {
        let mut registry = BlockStateRegistry::new();
        let metadata = "2 2 2\nminecraft:stone - color=0 uv=1 biome_type=x biome_colors=not_a_real_map\n";
        assert!(matches!(
            BlockImageAtlas::load(metadata, tiny_atlas(), &mut registry, 0.75, 0.6),
            Err(AtlasError::InvalidMetadataValue { key: "biome_colors", .. })
        ));
    }
}
