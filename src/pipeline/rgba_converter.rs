use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Source layouts a capture device may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

/// Decodes `data` into `out` as RGBA8, reusing `out`'s allocation.
///
/// Returns the decoded dimensions, which differ from the nominal ones only for MJPEG.
pub fn convert_into(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<(u32, u32)> {
    match format {
        PixelFormat::Nv12 => nv12_to_rgba(data, width, height, out)?,
        PixelFormat::Yuyv => yuyv_to_rgba(data, width, height, out)?,
        PixelFormat::Mjpeg => return mjpeg_to_rgba(data, out),
        PixelFormat::Rgb => rgb_like_to_rgba(data, width, height, false, out)?,
        PixelFormat::Bgr => rgb_like_to_rgba(data, width, height, true, out)?,
        PixelFormat::Gray => gray_to_rgba(data, width, height, out)?,
    }
    Ok((width, height))
}

fn reset(out: &mut Vec<u8>, len: usize) {
    out.clear();
    out.resize(len, 0);
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    if data.len() < y_plane_len + uv_plane_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_plane_len + uv_plane_len
        ));
    }

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    reset(out, y_plane_len * 4);
    yuv_nv12_to_rgba(
        &image,
        out,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let expected_len = width as usize * height as usize * 2;
    if data.len() < expected_len {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    reset(out, width as usize * height as usize * 4);
    yuyv422_to_rgba(
        &packed,
        out,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))
}

fn mjpeg_to_rgba(data: &[u8], out: &mut Vec<u8>) -> Result<(u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder produced no image info"))?;
    let expected_len = usize::try_from(info.width)
        .and_then(|w| usize::try_from(info.height).map(|h| w * h * 4))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    if rgba.len() < expected_len {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {}",
            rgba.len(),
            expected_len
        ));
    }

    out.clear();
    out.extend_from_slice(&rgba[..expected_len]);
    Ok((u32::from(info.width), u32::from(info.height)))
}

fn rgb_like_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    swap_rb: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    let expected_len = width as usize * height as usize * 3;
    if data.len() < expected_len {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    reset(out, width as usize * height as usize * 4);
    out.par_chunks_mut(4)
        .zip(data[..expected_len].par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
            }
            dst[3] = 255;
        });

    Ok(())
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let expected_len = width as usize * height as usize;
    if data.len() < expected_len {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    reset(out, expected_len * 4);
    out.par_chunks_mut(4)
        .zip(data[..expected_len].par_iter().copied())
        .for_each(|(dst, value)| {
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
            dst[3] = 255;
        });

    Ok(())
}
