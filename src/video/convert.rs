//! Pixel format conversion into planar I420
//!
//! Packed RGB24 input is converted with the BT.601 integer approximation.
//! Chroma is point-sampled at the top-left pixel of every 2x2 block.
//! Planar input is adopted by a row-by-row copy that honors the
//! destination strides.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::I420Buffer;

/// BT.601 luma for one RGB pixel
#[inline]
pub fn rgb_to_y(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

/// BT.601 blue-difference chroma for one RGB pixel
#[inline]
pub fn rgb_to_u(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128)
}

/// BT.601 red-difference chroma for one RGB pixel
#[inline]
pub fn rgb_to_v(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

fn check_dimensions(resolution: Resolution) -> Result<()> {
    if !resolution.is_valid() {
        return Err(AppError::InvalidInput(format!(
            "Frame dimensions must be non-zero, got {}",
            resolution
        )));
    }
    Ok(())
}

/// Validate a packed RGB24 buffer without touching any state
pub fn validate_rgb(rgb: &[u8], resolution: Resolution) -> Result<()> {
    check_dimensions(resolution)?;
    let expected = PixelFormat::Rgb24.frame_size(resolution.width, resolution.height);
    if rgb.len() < expected {
        return Err(AppError::InvalidInput(format!(
            "RGB buffer too small for {}: {} < {} bytes",
            resolution,
            rgb.len(),
            expected
        )));
    }
    Ok(())
}

/// Validate three I420 planes without touching any state
pub fn validate_planes(y: &[u8], u: &[u8], v: &[u8], resolution: Resolution) -> Result<()> {
    check_dimensions(resolution)?;
    let y_size = resolution.pixels() as usize;
    let c_size = resolution.chroma().pixels() as usize;

    if y.len() < y_size {
        return Err(AppError::InvalidInput(format!(
            "Y plane too small for {}: {} < {} bytes",
            resolution,
            y.len(),
            y_size
        )));
    }
    if u.len() < c_size || v.len() < c_size {
        return Err(AppError::InvalidInput(format!(
            "Chroma planes too small for {}: U={} V={} < {} bytes",
            resolution,
            u.len(),
            v.len(),
            c_size
        )));
    }
    Ok(())
}

fn check_destination(dst: &I420Buffer, resolution: Resolution) -> Result<()> {
    if dst.resolution() != resolution {
        return Err(AppError::Internal(format!(
            "Destination buffer is {}, expected {}",
            dst.resolution(),
            resolution
        )));
    }
    Ok(())
}

/// Convert packed RGB24 (row-major, no padding) into `dst`.
///
/// `dst` must already have the requested resolution. Nothing is written
/// when validation fails.
pub fn convert_rgb(rgb: &[u8], resolution: Resolution, dst: &mut I420Buffer) -> Result<()> {
    validate_rgb(rgb, resolution)?;
    check_destination(dst, resolution)?;

    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let chroma = resolution.chroma();
    let (cw, ch) = (chroma.width as usize, chroma.height as usize);
    let (stride_y, stride_u, stride_v) = dst.strides();
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in 0..height {
        let src_row = &rgb[row * width * 3..(row + 1) * width * 3];
        let dst_row = &mut y_plane[row * stride_y..row * stride_y + width];
        for (px, out) in src_row.chunks_exact(3).zip(dst_row.iter_mut()) {
            *out = rgb_to_y(px[0], px[1], px[2]);
        }
    }

    for crow in 0..ch {
        let src_row = crow * 2 * width * 3;
        for ccol in 0..cw {
            let i = src_row + ccol * 2 * 3;
            let (r, g, b) = (rgb[i], rgb[i + 1], rgb[i + 2]);
            u_plane[crow * stride_u + ccol] = rgb_to_u(r, g, b);
            v_plane[crow * stride_v + ccol] = rgb_to_v(r, g, b);
        }
    }

    Ok(())
}

/// Copy tightly packed I420 planes into `dst` row by row.
pub fn adopt_planes(
    y: &[u8],
    u: &[u8],
    v: &[u8],
    resolution: Resolution,
    dst: &mut I420Buffer,
) -> Result<()> {
    validate_planes(y, u, v, resolution)?;
    check_destination(dst, resolution)?;

    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let chroma = resolution.chroma();
    let (cw, ch) = (chroma.width as usize, chroma.height as usize);
    let (stride_y, stride_u, stride_v) = dst.strides();
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    copy_plane(y, width, height, y_plane, stride_y);
    copy_plane(u, cw, ch, u_plane, stride_u);
    copy_plane(v, cw, ch, v_plane, stride_v);
    Ok(())
}

fn copy_plane(src: &[u8], width: usize, height: usize, dst: &mut [u8], dst_stride: usize) {
    if width == 0 {
        return;
    }
    if dst_stride == width {
        dst[..width * height].copy_from_slice(&src[..width * height]);
        return;
    }
    for (row, src_row) in src.chunks_exact(width).take(height).enumerate() {
        let start = row * dst_stride;
        dst[start..start + width].copy_from_slice(src_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(res: Resolution, r: u8, g: u8, b: u8) -> Vec<u8> {
        let mut data = Vec::with_capacity(res.pixels() as usize * 3);
        for _ in 0..res.pixels() {
            data.extend_from_slice(&[r, g, b]);
        }
        data
    }

    #[test]
    fn test_red_luma_matches_formula() {
        let expected = (((66 * 255 + 128) >> 8) + 16) as u8;
        assert_eq!(rgb_to_y(255, 0, 0), expected);

        let res = Resolution::new(2, 2);
        let mut buf = I420Buffer::new(res);
        convert_rgb(&solid_rgb(res, 255, 0, 0), res, &mut buf).unwrap();
        assert!(buf.y_plane().iter().all(|&y| y == expected));
    }

    #[test]
    fn test_extremes() {
        assert_eq!(rgb_to_y(0, 0, 0), 16);
        assert_eq!(rgb_to_y(255, 255, 255), 235);
        assert_eq!(rgb_to_u(0, 0, 0), 128);
        assert_eq!(rgb_to_v(0, 0, 0), 128);
    }

    #[test]
    fn test_chroma_is_point_sampled() {
        // 2x2 block: only the top-left pixel is blue
        let res = Resolution::new(2, 2);
        let mut rgb = solid_rgb(res, 0, 0, 0);
        rgb[2] = 255;

        let mut buf = I420Buffer::new(res);
        convert_rgb(&rgb, res, &mut buf).unwrap();
        assert_eq!(buf.u_plane()[0], rgb_to_u(0, 0, 255));
        assert_eq!(buf.v_plane()[0], rgb_to_v(0, 0, 255));
    }

    #[test]
    fn test_odd_dimensions_truncate_chroma() {
        let res = Resolution::new(3, 3);
        let mut buf = I420Buffer::new(res);
        convert_rgb(&solid_rgb(res, 10, 20, 30), res, &mut buf).unwrap();
        assert_eq!(buf.u_plane().len(), 1);
        assert_eq!(buf.y_plane().len(), 9);
    }

    #[test]
    fn test_rejects_short_rgb() {
        let res = Resolution::new(4, 4);
        let mut buf = I420Buffer::new(res);
        let err = convert_rgb(&[0u8; 47], res, &mut buf).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(buf.y_plane().iter().all(|&y| y == 0));
    }

    #[test]
    fn test_rejects_zero_dimension() {
        let err = validate_rgb(&[], Resolution::new(0, 4)).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_adopt_is_byte_exact() {
        for (w, h) in [(1u32, 1u32), (2, 2), (3, 5), (16, 9)] {
            let res = Resolution::new(w, h);
            let c = res.chroma().pixels() as usize;
            let y: Vec<u8> = (0..res.pixels() as usize).map(|i| (i * 7) as u8).collect();
            let u: Vec<u8> = (0..c).map(|i| (i * 3 + 1) as u8).collect();
            let v: Vec<u8> = (0..c).map(|i| (i * 5 + 2) as u8).collect();

            let mut buf = I420Buffer::with_strides(res, w as usize + 3, 4 + w as usize, 8);
            adopt_planes(&y, &u, &v, res, &mut buf).unwrap();

            let (py, pu, pv) = buf.to_packed_planes();
            assert_eq!(py, y);
            assert_eq!(pu, u);
            assert_eq!(pv, v);
        }
    }

    #[test]
    fn test_adopt_rejects_short_chroma() {
        let res = Resolution::new(4, 4);
        let mut buf = I420Buffer::new(res);
        let err = adopt_planes(&[0; 16], &[0; 4], &[0; 3], res, &mut buf).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
