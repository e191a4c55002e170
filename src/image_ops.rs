//! RGBA compositing primitives shared by atlas preparation and per-block
//! rendering. Canvases are `image::RgbaImage`; "UV masks" are ordinary RGBA
//! images baked by the atlas tooling where red/green hold a face-local
//! `(u, v)` in `0..=255` and blue holds a face tag (see `FACE_*`).
//!
//! All arithmetic uses `(x * a + 128) >> 8` as an approximation of divide
//! by 255, matching the fixed-point rule the original sprite atlas was
//! rendered with -- necessary for tests to be byte-exact.

use image::{Rgba, RgbaImage};

/// UV-mask face tags, stored in the mask's blue channel.
pub const FACE_LEFT: u8 = 1;
pub const FACE_RIGHT: u8 = 2;
pub const FACE_UP: u8 = 3;

/// Four corner lighting values for `multiply_corners`, one per texture
/// corner in `(top-left, top-right, bottom-left, bottom-right)` order.
pub type CornerValues = [u8; 4];

#[inline]
fn mix(x: u8, y: u8, a: u8) -> u8 {
    (((x as u32) * (255 - a as u32) + (y as u32) * (a as u32)) >> 8) as u8
}

#[inline]
fn mul255(x: u8, factor: u8) -> u8 {
    (((x as u32) * (factor as u32) + 128) >> 8) as u8
}

fn rgba_multiply(pixel: Rgba<u8>, r: u8, g: u8, b: u8) -> Rgba<u8> {
    Rgba([mul255(pixel[0], r), mul255(pixel[1], g), mul255(pixel[2], b), pixel[3]])
}

fn rgba_multiply_scalar(pixel: Rgba<u8>, factor: u8) -> Rgba<u8> {
    rgba_multiply(pixel, factor, factor, factor)
}

fn rgba_multiply_color(pixel: Rgba<u8>, color: Rgba<u8>) -> Rgba<u8> {
    Rgba([
        mul255(pixel[0], color[0]),
        mul255(pixel[1], color[1]),
        mul255(pixel[2], color[2]),
        mul255(pixel[3], color[3]),
    ])
}

fn add_clamp(x: u8, delta: i32) -> u8 {
    (x as i32 + delta).clamp(0, 255) as u8
}

/// Alpha-blends `src` over `*dst` in place, using `src`'s alpha as
/// coverage. A fully opaque or fully transparent `src` short-circuits.
pub fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3];
    if sa == 0 {
        return;
    }
    if sa == 255 {
        *dst = src;
        return;
    }
    dst[0] = mix(dst[0], src[0], sa);
    dst[1] = mix(dst[1], src[1], sa);
    dst[2] = mix(dst[2], src[2], sa);
    dst[3] = dst[3].max(sa);
}

fn assert_same_size(a: &RgbaImage, b: &RgbaImage) {
    assert_eq!(a.dimensions(), b.dimensions(), "image_ops kernels require matching dimensions");
}

/// Darkens the left/right/up faces by distinct scalar factors (`0..=255`),
/// identified per-pixel by `uv_mask`'s face tag. Used for the static
/// per-face darkening pass and for `multiply_except`-style single-face
/// darkening.
pub fn multiply(block: &mut RgbaImage, uv_mask: &RgbaImage, factor_left: u8, factor_right: u8, factor_up: u8) {
    assert_same_size(block, uv_mask);
    for (pixel, uv) in block.pixels_mut().zip(uv_mask.pixels()) {
        if uv[3] == 0 {
            continue;
        }
        let factor = match uv[2] {
            FACE_LEFT => factor_left,
            FACE_RIGHT => factor_right,
            FACE_UP => factor_up,
            _ => continue,
        };
        // A factor of 255 means "leave this face alone" -- the fixed-point
        // rule (x*a+128)>>8 isn't exact at a=255, so treat it as a true
        // identity rather than darkening every face by a stray LSB.
        if factor == 255 {
            continue;
        }
        *pixel = rgba_multiply_scalar(*pixel, factor);
    }
}

/// Bilinearly-interpolated per-face lighting, used for smooth lighting:
/// each face gets a 4-corner gradient instead of one flat factor.
pub fn multiply_corners(
    block: &mut RgbaImage,
    uv_mask: &RgbaImage,
    corners_left: CornerValues,
    corners_right: CornerValues,
    corners_up: CornerValues,
) {
    assert_same_size(block, uv_mask);
    for (pixel, uv) in block.pixels_mut().zip(uv_mask.pixels()) {
        if uv[3] == 0 {
            continue;
        }
        let corners = match uv[2] {
            FACE_LEFT => &corners_left,
            FACE_RIGHT => &corners_right,
            FACE_UP => &corners_up,
            _ => continue,
        };
        let u = uv[0];
        let v = uv[1];
        let ab = mix(corners[0], corners[1], u);
        let cd = mix(corners[2], corners[3], u);
        let factor = mix(ab, cd, v);
        *pixel = rgba_multiply_scalar(*pixel, factor);
    }
}

/// Darkens every face except `except_face` by `factor`.
pub fn multiply_except(block: &mut RgbaImage, uv_mask: &RgbaImage, except_face: u8, factor: u8) {
    assert_same_size(block, uv_mask);
    for (pixel, uv) in block.pixels_mut().zip(uv_mask.pixels()) {
        if uv[3] == 0 {
            continue;
        }
        if uv[2] != except_face {
            *pixel = rgba_multiply_scalar(*pixel, factor);
        }
    }
}

/// Uniform darken with no face distinction -- no UV mask needed.
pub fn multiply_scalar(block: &mut RgbaImage, factor: u8) {
    for pixel in block.pixels_mut() {
        *pixel = rgba_multiply_scalar(*pixel, factor);
    }
}

/// Masked tint: `color` is modulated by `mask` before being alpha-blended
/// over `block`, which avoids a white halo at the mask's edges that a
/// direct overlay would produce.
pub fn tint_masked(block: &mut RgbaImage, mask: &RgbaImage, color: Rgba<u8>) {
    assert_same_size(block, mask);
    for (pixel, mask_pixel) in block.pixels_mut().zip(mask.pixels()) {
        if mask_pixel[3] == 0 {
            continue;
        }
        let colored = rgba_multiply_color(*mask_pixel, color);
        blend(pixel, colored);
    }
}

/// Unmasked tint: every non-transparent pixel is multiplied by `color`.
pub fn tint(block: &mut RgbaImage, color: Rgba<u8>) {
    for pixel in block.pixels_mut() {
        if pixel[3] != 0 {
            *pixel = rgba_multiply_color(*pixel, color);
        }
    }
}

/// Luminance-preserving tint: subtracts `color`'s luminance before adding
/// it back scaled down, so the block keeps its shading but picks up
/// `color`'s hue. Used by overlay render modes that must stay legible over
/// both bright and dark terrain.
pub fn tint_high_contrast(block: &mut RgbaImage, color: Rgba<u8>) {
    let luminance = (10 * color[0] as i32 + 3 * color[1] as i32 + color[2] as i32) / 14;
    let alpha_factor = 3;
    let nr = (color[0] as i32 - luminance) / alpha_factor;
    let ng = (color[1] as i32 - luminance) / alpha_factor;
    let nb = (color[2] as i32 - luminance) / alpha_factor;

    for pixel in block.pixels_mut() {
        if pixel[3] > 0 {
            pixel[0] = add_clamp(pixel[0], nr);
            pixel[1] = add_clamp(pixel[1], ng);
            pixel[2] = add_clamp(pixel[2], nb);
        }
    }
}

/// Same as [`tint_high_contrast`] but restricted to pixels tagged
/// `face` in `mask`.
pub fn tint_high_contrast_face(block: &mut RgbaImage, mask: &RgbaImage, face: u8, color: Rgba<u8>) {
    assert_same_size(block, mask);
    let luminance = (10 * color[0] as i32 + 3 * color[1] as i32 + color[2] as i32) / 14;
    let alpha_factor = 3;
    let nr = (color[0] as i32 - luminance) / alpha_factor;
    let ng = (color[1] as i32 - luminance) / alpha_factor;
    let nb = (color[2] as i32 - luminance) / alpha_factor;

    for (pixel, mask_pixel) in block.pixels_mut().zip(mask.pixels()) {
        if mask_pixel[2] == face {
            pixel[0] = add_clamp(pixel[0], nr);
            pixel[1] = add_clamp(pixel[1], ng);
            pixel[2] = add_clamp(pixel[2], nb);
        }
    }
}

/// Composites a waterlogged block's water-top sprite over (or under) the
/// block's own top face, using each pixel's UV-mask alpha as a depth
/// value: the shallower surface wins and the other is blended behind it.
pub fn blend_top(block: &mut RgbaImage, uv_mask: &RgbaImage, top: &RgbaImage, top_uv_mask: &RgbaImage) {
    assert_same_size(block, uv_mask);
    assert_same_size(top, top_uv_mask);
    assert_same_size(block, top);

    for (((pixel, uv), top_pixel), top_uv) in block
        .pixels_mut()
        .zip(uv_mask.pixels())
        .zip(top.pixels())
        .zip(top_uv_mask.pixels())
    {
        if uv[3] < top_uv[3] {
            blend(pixel, *top_pixel);
        } else {
            let behind = *pixel;
            *pixel = *top_pixel;
            blend(pixel, behind);
        }
    }
}

/// Edge darken strength for [`shadow_edges`]: `0` disables a side, `3`
/// is a stronger variant used for foliage-like blocks.
pub type EdgeStrength = u8;

/// Darkens the border pixels of up to five faces to fake ambient
/// occlusion at block edges: the four edges of the up face (toward each
/// horizontal neighbor) plus the bottom edge of the two side faces.
pub fn shadow_edges(
    block: &mut RgbaImage,
    uv_mask: &RgbaImage,
    north: EdgeStrength,
    south: EdgeStrength,
    east: EdgeStrength,
    west: EdgeStrength,
    bottom: EdgeStrength,
) {
    assert_same_size(block, uv_mask);
    for (pixel, uv) in block.pixels_mut().zip(uv_mask.pixels()) {
        let u = uv[0] as f32 / 255.0;
        let v = uv[1] as f32 / 255.0;
        let face = uv[2];

        let mut alpha: f32 = 0.0;
        let mut gen = |mask_face: u8, edge: EdgeStrength, uv: f32| {
            if edge == 0 || face != mask_face {
                return;
            }
            let t = (1 + edge.min(2) as i32) as f32 / 16.0;
            let (strong, weak) = if edge > 2 { (128.0, 64.0) } else { (64.0, 32.0) };
            if uv < t {
                let a = if uv < t / 2.0 {
                    strong
                } else {
                    let frac = (uv - t / 2.0) / (t / 2.0);
                    (1.0 - frac) * weak + frac * 16.0
                };
                alpha = alpha.max(a);
            }
        };

        gen(FACE_UP, north, v);
        gen(FACE_UP, south, 1.0 - v);
        gen(FACE_UP, east, 1.0 - u);
        gen(FACE_UP, west, u);
        gen(FACE_LEFT, bottom, 1.0 - v);
        gen(FACE_RIGHT, bottom, 1.0 - v);

        if alpha > 0.0 {
            let factor = 255 - alpha.round().clamp(0.0, 255.0) as u8;
            *pixel = rgba_multiply_scalar(*pixel, factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, pixel: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(w, h, pixel)
    }

    #[test]
    fn mul255_matches_fixed_point_rule() {
        assert_eq!(mul255(255, 128), 128);
        assert_eq!(mul255(0, 255), 0);
        // (255*255 + 128) >> 8 == 254, not 255 -- the fixed-point rule is
        // an approximation of /255, not exact, and tests must match its
        // rounding rather than "true" division.
        assert_eq!(mul255(255, 255), 254);
    }

    #[test]
    fn multiply_skips_transparent_uv_pixels() {
        let mut block = solid(2, 1, Rgba([200, 200, 200, 255]));
        let mut uv = RgbaImage::new(2, 1);
        uv.put_pixel(0, 0, Rgba([0, 0, FACE_UP, 255]));
        uv.put_pixel(1, 0, Rgba([0, 0, FACE_UP, 0]));

        multiply(&mut block, &uv, 0, 0, 128);
        assert_eq!(block.get_pixel(0, 0)[0], mul255(200, 128));
        assert_eq!(block.get_pixel(1, 0)[0], 200); // untouched: alpha 0 in uv
    }

    #[test]
    fn multiply_leaves_a_face_exactly_unchanged_at_factor_255() {
        let mut block = solid(1, 1, Rgba([200, 150, 50, 255]));
        let mut uv = RgbaImage::new(1, 1);
        uv.put_pixel(0, 0, Rgba([0, 0, FACE_UP, 255]));

        multiply(&mut block, &uv, 0, 0, 255);
        assert_eq!(*block.get_pixel(0, 0), Rgba([200, 150, 50, 255]));
    }

    #[test]
    fn blend_fully_opaque_source_replaces_dest() {
        let mut dst = Rgba([10, 10, 10, 255]);
        blend(&mut dst, Rgba([200, 0, 0, 255]));
        assert_eq!(dst, Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn blend_fully_transparent_source_is_a_no_op() {
        let mut dst = Rgba([10, 20, 30, 255]);
        blend(&mut dst, Rgba([200, 0, 0, 0]));
        assert_eq!(dst, Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn tint_high_contrast_preserves_luminance_for_gray() {
        // a perfectly gray recolor should leave r≈g≈b the same relationship.
        let mut block = solid(1, 1, Rgba([100, 100, 100, 255]));
        tint_high_contrast(&mut block, Rgba([128, 128, 128, 255]));
        let p = block.get_pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn shadow_edges_darkens_up_face_near_border() {
        let mut block = solid(1, 1, Rgba([255, 255, 255, 255]));
        let mut uv = RgbaImage::new(1, 1);
        // v=0 means "at the north border" for the up face.
        uv.put_pixel(0, 0, Rgba([128, 0, FACE_UP, 255]));
        shadow_edges(&mut block, &uv, 2, 0, 0, 0, 0);
        assert!(block.get_pixel(0, 0)[0] < 255);
    }
}
