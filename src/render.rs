//! The painter's-algorithm tile renderer: walks a tile's voxels top to
//! bottom, fetches each one's prepared sprite, tints/lights it, and
//! composites the lot in `BlockPos` order onto one output raster.

use image::{Rgba, RgbaImage};

use crate::atlas::{BiomeTint, BlockImageAtlas};
use crate::biome::{self, ColorMapType};
use crate::cache::{GetFields, WorldCache};
use crate::geometry::{BlockPos, TilePos};
use crate::image_ops;
use crate::registry::BlockState;
use crate::tile_iter::TileTopBlockIterator;

/// Per-sprite hook invoked while compositing a tile -- lighting, overlays,
/// or any render-mode-specific post-processing. The renderer owns no
/// subclass hierarchy; callers plug in whatever implements this.
pub trait RenderMode {
    /// If true, the voxel at `pos`/`id` is skipped entirely (not even
    /// considered for the opaque-stop check).
    fn is_hidden(&self, pos: BlockPos, id: u16) -> bool;

    /// Mutates `sprite` in place after biome tinting, before compositing.
    fn draw(&mut self, sprite: &mut RgbaImage, pos: BlockPos, id: u16);
}

/// A `RenderMode` that hides nothing and draws nothing; the renderer's
/// default when no overlay/lighting behavior is requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderMode;

impl RenderMode for NullRenderMode {
    fn is_hidden(&self, _pos: BlockPos, _id: u16) -> bool {
        false
    }

    fn draw(&mut self, _sprite: &mut RgbaImage, _pos: BlockPos, _id: u16) {}
}

/// Tunables a caller can change between tiles without rebuilding the
/// renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub block_size: i32,
    pub tile_width: i32,
    pub darken_left: f32,
    pub darken_right: f32,
    pub render_biomes: bool,
    /// Edge-darken strengths in `[north, south, east, west, bottom]` order.
    pub shadow_edges: [u8; 5],
    /// Mostly dead in the source renderer; kept only as a setting collaborators
    /// can flip, with no effect on the live full-water substitution path.
    pub use_preblit_water: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            tile_width: 1,
            darken_left: 0.75,
            darken_right: 0.6,
            render_biomes: true,
            shadow_edges: [0, 0, 0, 0, 0],
            use_preblit_water: false,
        }
    }
}

struct TileImage {
    x: i32,
    y: i32,
    image: RgbaImage,
    pos: BlockPos,
    z_index: u64,
}

/// Renders output tiles from one world cache against one prepared atlas.
/// Not `Sync`: the cache it borrows is exclusive to one worker at a time,
/// so each concurrent worker owns its own `TileRenderer`.
pub struct TileRenderer<'a, M: RenderMode = NullRenderMode> {
    cache: &'a mut WorldCache<'a>,
    atlas: &'a BlockImageAtlas,
    config: RenderConfig,
    render_mode: M,
}

impl<'a, M: RenderMode> TileRenderer<'a, M> {
    pub fn new(cache: &'a mut WorldCache<'a>, atlas: &'a BlockImageAtlas, config: RenderConfig, render_mode: M) -> Self {
        Self {
            cache,
            atlas,
            config,
            render_mode,
        }
    }

    pub fn tile_size(&self) -> u32 {
        (self.config.block_size * 16 * self.config.tile_width) as u32
    }

    pub fn set_render_biomes(&mut self, enabled: bool) {
        self.config.render_biomes = enabled;
    }

    pub fn set_shadow_edges(&mut self, edges: [u8; 5]) {
        self.config.shadow_edges = edges;
    }

    pub fn set_use_preblit_water(&mut self, enabled: bool) {
        self.config.use_preblit_water = enabled;
    }

    /// Checks whether `pos` counts as "water" for a full-water block's
    /// neighbor promotion: full water itself, a water-like block (e.g.
    /// ice), or a waterlogged block.
    fn neighbor_is_water(&mut self, pos: BlockPos) -> bool {
        let block = self.cache.get_block(pos, None, GetFields::ID);
        let image = self.atlas.get_block_image(block.id, self.cache.registry());
        if image.is_full_water || image.is_water_like {
            return true;
        }
        self.cache.registry()
            .get_state(block.id)
            .map(|state| state.property("waterlogged") == Some("true"))
            .unwrap_or(false)
    }

    fn non_waterlogged_id(&self, state: &BlockState) -> Option<u16> {
        let dry = state.clone().with_property("waterlogged", "false");
        self.cache.registry().find_id(&dry)
    }

    /// Renders one voxel, mutating nothing but returning the sprite (already
    /// darkened by atlas preparation) to composite, or `None` if the voxel
    /// contributes nothing to the tile.
    fn render_voxel(&mut self, pos: BlockPos) -> Option<RgbaImage> {
        let block = self.cache.get_block(pos, None, GetFields::ID | GetFields::BIOME);
        if self.render_mode.is_hidden(pos, block.id) {
            return None;
        }

        let mut id = block.id;
        let mut image = self.atlas.get_block_image(id, self.cache.registry());
        if image.is_air {
            return None;
        }

        if image.is_full_water {
            let west_is_water = self.neighbor_is_water(pos + BlockPos::DIR_WEST);
            let south_is_water = self.neighbor_is_water(pos + BlockPos::DIR_SOUTH);
            let up_is_water = self.neighbor_is_water(pos + BlockPos::DIR_TOP);
            if west_is_water && south_is_water && up_is_water {
                return None;
            }
            let neighbor_index = ((west_is_water as u8) << 2) | ((south_is_water as u8) << 1) | (up_is_water as u8);
            if let Some(variant_id) = self.atlas.partial_water_id(id, neighbor_index) {
                id = variant_id;
                image = self.atlas.get_block_image(id, self.cache.registry());
            }
        } else if image.is_waterloggable {
            let waterlogged_state = self
                .cache
                .registry()
                .get_state(id)
                .filter(|state| state.property("waterlogged") == Some("true"))
                .cloned();
            if let Some(state) = waterlogged_state {
                let above = self.cache.get_block(pos + BlockPos::DIR_TOP, None, GetFields::ID);
                let above_image = self.atlas.get_block_image(above.id, self.cache.registry());
                if above_image.is_full_water {
                    if let Some(dry_id) = self.non_waterlogged_id(&state) {
                        id = dry_id;
                        image = self.atlas.get_block_image(id, self.cache.registry());
                    }
                }
            }
        }

        let mut sprite = image.sprite.clone();

        if self.config.render_biomes {
            if let Some(tint_kind) = image.biome_tint {
                let color = self.biome_color(pos, block.biome, image);
                match tint_kind {
                    BiomeTint::Normal => image_ops::tint(&mut sprite, color),
                    BiomeTint::Masked => {
                        if let Some(mask) = &image.biome_mask {
                            image_ops::tint_masked(&mut sprite, mask, color);
                        } else {
                            image_ops::tint(&mut sprite, color);
                        }
                    }
                }
            }
        }

        let edges = self.config.shadow_edges;
        if edges != [0, 0, 0, 0, 0] {
            image_ops::shadow_edges(&mut sprite, &image.uv_mask, edges[0], edges[1], edges[2], edges[3], edges[4]);
        }

        self.render_mode.draw(&mut sprite, pos, id);

        Some(sprite)
    }

    fn biome_color(&self, pos: BlockPos, biome_id: u32, image: &crate::atlas::BlockImage) -> Rgba<u8> {
        let (temperature, humidity) = biome::biome_climate(biome_id);
        let _ = pos;
        match &image.biome_colormap {
            Some(map) => map.get_color(humidity, temperature),
            None => biome::default_colormap(image.biome_colors.unwrap_or(ColorMapType::Grass)).get_color(humidity, temperature),
        }
    }

    /// Renders a full tile to an RGBA raster of `tile_size() x tile_size()`.
    pub fn render_tile(&mut self, tile_pos: TilePos) -> RgbaImage {
        let size = self.tile_size();
        let mut out = RgbaImage::new(size, size);
        let mut images: Vec<TileImage> = Vec::new();
        let mut z_index: u64 = 0;

        let top_iter = TileTopBlockIterator::new(tile_pos, self.config.block_size, self.config.tile_width);
        for top in top_iter {
            let row_iter = crate::tile_iter::BlockRowIterator::new(top, self.config.block_size);
            for pos in row_iter {
                let Some(sprite) = self.render_voxel(pos) else {
                    continue;
                };
                let (draw_x, draw_y) = crate::tile_iter::draw_pos(pos.row(), pos.col(), self.config.block_size);
                let opaque = is_opaque(&sprite);
                images.push(TileImage {
                    x: draw_x,
                    y: draw_y,
                    image: sprite,
                    pos,
                    z_index,
                });
                z_index += 1;
                if opaque {
                    break;
                }
            }
        }

        images.sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.z_index.cmp(&b.z_index)));

        for tile_image in &images {
            blit(&mut out, &tile_image.image, tile_image.x, tile_image.y);
        }

        out
    }
}

fn is_opaque(sprite: &RgbaImage) -> bool {
    sprite.pixels().all(|p| p[3] == 255)
}

fn blit(dst: &mut RgbaImage, src: &RgbaImage, x: i32, y: i32) {
    let (dw, dh) = dst.dimensions();
    let (sw, sh) = src.dimensions();
    for sy in 0..sh {
        let dy = y + sy as i32;
        if dy < 0 || dy as u32 >= dh {
            continue;
        }
        for sx in 0..sw {
            let dx = x + sx as i32;
            if dx < 0 || dx as u32 >= dw {
                continue;
            }
            let mut pixel = *dst.get_pixel(dx as u32, dy as u32);
            image_ops::blend(&mut pixel, *src.get_pixel(sx, sy));
            dst.put_pixel(dx as u32, dy as u32, pixel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BlockStateRegistry;

    fn empty_atlas() -> BlockImageAtlas {
        let mut registry = BlockStateRegistry::new();
        let atlas_img = RgbaImage::new(2, 2);
        BlockImageAtlas::load("2 2 1\n", atlas_img, &mut registry, 0.75, 0.6).unwrap()
    }

    #[test]
    fn empty_world_renders_a_fully_transparent_tile() {
        let mut registry = BlockStateRegistry::new();
        let atlas = empty_atlas();
        let mut cache = WorldCache::new("/nonexistent/path/for/test", 0, None, &mut registry);
        let config = RenderConfig::default();
        let mut renderer = TileRenderer::new(&mut cache, &atlas, config, NullRenderMode);
        let tile = renderer.render_tile(TilePos::new(0, 0));
        assert!(tile.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn tile_size_matches_block_size_times_sixteen_times_tile_width() {
        let mut registry = BlockStateRegistry::new();
        let atlas = empty_atlas();
        let mut cache = WorldCache::new("/nonexistent/path/for/test", 0, None, &mut registry);
        let mut config = RenderConfig::default();
        config.block_size = 16;
        config.tile_width = 2;
        let renderer = TileRenderer::new(&mut cache, &atlas, config, NullRenderMode);
        assert_eq!(renderer.tile_size(), 16 * 16 * 2);
    }

    #[test]
    fn is_opaque_requires_every_pixel_fully_covered() {
        let mut sprite = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        assert!(is_opaque(&sprite));
        sprite.put_pixel(0, 0, Rgba([255, 255, 255, 254]));
        assert!(!is_opaque(&sprite));
    }
}
