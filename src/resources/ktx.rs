//! KTX2 textures, the container `KHR_texture_basisu` references.
//!
//! The container is read with `ktx2`. Plain RGBA8 levels are taken as they
//! are, UASTC levels are transcoded to RGBA8 with `basis-universal` when the
//! `basisu` feature is built. Only mip 0 is kept, the upload builds no mips.

use std::io::Read;

use anyhow::{Context, Result, anyhow, bail};
use ktx2::{ColorModel, DfdBlockBasic, DfdHeader, Format, SupercompressionScheme};

pub const KTX2_MIME_TYPE: &str = "image/ktx2";

const IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

pub fn is_ktx2(bytes: &[u8]) -> bool {
    bytes.starts_with(&IDENTIFIER)
}

/// Decodes mip 0 of a single 2D KTX2 texture to RGBA8.
pub fn decode_ktx2(bytes: &[u8]) -> Result<image::RgbaImage> {
    let reader = ktx2::Reader::new(bytes).map_err(|e| anyhow!("invalid KTX2 container: {e:?}"))?;
    let header = reader.header();
    if header.face_count > 1 || header.layer_count > 1 || header.pixel_depth > 1 {
        bail!("only single 2D KTX2 textures are supported");
    }
    let (width, height) = (header.pixel_width, header.pixel_height.max(1));

    let level = reader.levels().next().context("KTX2 file holds no levels")?;
    let data = match header.supercompression_scheme {
        None => level.data.to_vec(),
        Some(SupercompressionScheme::Zstandard) => inflate_zstd(level.data)?,
        Some(scheme) => bail!("{scheme:?} supercompression is not supported"),
    };

    if is_uastc(&reader) {
        return transcode_uastc(&data, width, height);
    }
    match header.format {
        Some(format) if format == Format::R8G8B8A8_UNORM || format == Format::R8G8B8A8_SRGB => {
            let texels = (width * height * 4) as usize;
            let data = data.get(..texels).context("RGBA8 level is shorter than the image")?;
            image::RgbaImage::from_raw(width, height, data.to_vec())
                .context("RGBA8 level does not match the image size")
        }
        Some(format) => bail!("KTX2 format {format:?} is not supported"),
        None => bail!("KTX2 file is neither UASTC nor an uncompressed format"),
    }
}

fn is_uastc(reader: &ktx2::Reader<&[u8]>) -> bool {
    reader
        .dfd_blocks()
        .filter(|dfd| dfd.header == DfdHeader::BASIC)
        .filter_map(|dfd| DfdBlockBasic::parse(dfd.data).ok())
        .any(|basic| basic.header.color_model == Some(ColorModel::UASTC))
}

fn inflate_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(data);
    let mut decoder = ruzstd::decoding::StreamingDecoder::new(&mut cursor)
        .map_err(|e| anyhow!("invalid zstd level: {e:?}"))?;
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .context("inflating a zstd level")?;
    Ok(inflated)
}

#[cfg(feature = "basisu")]
fn transcode_uastc(data: &[u8], width: u32, height: u32) -> Result<image::RgbaImage> {
    use basis_universal::{DecodeFlags, LowLevelUastcTranscoder, SliceParametersUastc, TranscoderBlockFormat};

    basis_universal::transcoder_init();
    let (blocks_x, blocks_y) = (width.div_ceil(4), height.div_ceil(4));
    let blocks = data
        .get(..(blocks_x * blocks_y * 16) as usize)
        .context("UASTC level is shorter than its blocks")?;
    let rgba = LowLevelUastcTranscoder::new()
        .transcode_slice(
            blocks,
            SliceParametersUastc {
                num_blocks_x: blocks_x,
                num_blocks_y: blocks_y,
                has_alpha: true,
                original_width: width,
                original_height: height,
            },
            DecodeFlags::HIGH_QUALITY,
            TranscoderBlockFormat::RGBA32,
        )
        .map_err(|e| anyhow!("transcoding UASTC to RGBA: {e:?}"))?;
    image::RgbaImage::from_raw(width, height, rgba).context("transcoded UASTC does not match the image size")
}

#[cfg(not(feature = "basisu"))]
fn transcode_uastc(_data: &[u8], _width: u32, _height: u32) -> Result<image::RgbaImage> {
    bail!("UASTC textures need the `basisu` feature")
}
