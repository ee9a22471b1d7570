//! Bounded artwork transcoding for remote controllers.
//!
//! Controllers receive artwork over a size-capped transport, so every raster
//! leaving this module fits within `max_dim × max_dim`. Oversized originals
//! are never decoded at full resolution:
//!
//! 1. Pass one reads only the header to learn the native dimensions.
//! 2. A power-of-two downscale factor is chosen from those dimensions.
//! 3. Pass two decodes with the factor applied inside the decoder: DCT
//!    scaling for JPEG, row/column decimation while streaming rows for PNG.
//!
//! Formats without a scaled decode path are only accepted when already
//! within bounds. Any failure degrades to [`Artwork::Unavailable`]; callers
//! render a fallback glyph.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageFormat, ImageReader, RgbImage};
use thiserror::Error;

use crate::protocol_constants::{
    ARTWORK_JPEG_QUALITY, JPEG_MAX_DCT_SCALE, MAX_ARTWORK_FETCH_BYTES,
};

/// Errors raised while loading or transcoding artwork.
///
/// These never cross the protocol boundary; [`ArtworkTranscoder::resolve`]
/// maps all of them to [`Artwork::Unavailable`].
#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("Artwork I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artwork fetch failed: {0}")]
    Fetch(String),

    #[error("Artwork source exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Artwork decode failed: {0}")]
    Decode(String),

    #[error("Unsupported artwork: {0}")]
    Unsupported(String),

    #[error("Artwork encode failed: {0}")]
    Encode(String),
}

/// Result alias for artwork operations.
pub type ArtworkResult<T> = Result<T, ArtworkError>;

fn decode_err(e: impl std::fmt::Display) -> ArtworkError {
    ArtworkError::Decode(e.to_string())
}

/// An encoded, bounded raster ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub bytes: Bytes,
}

/// Outcome of resolving an artwork reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artwork {
    Raster(RasterImage),
    /// Missing, unreachable, corrupt or unsupported; display a fallback.
    Unavailable,
}

impl Artwork {
    pub fn raster(&self) -> Option<&RasterImage> {
        match self {
            Self::Raster(r) => Some(r),
            Self::Unavailable => None,
        }
    }
}

enum Source {
    File(PathBuf),
    Remote(String),
}

impl Source {
    fn classify(source_ref: &str) -> Self {
        let trimmed = source_ref.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Remote(trimmed.to_string())
        } else if let Some(path) = trimmed.strip_prefix("file://") {
            Self::File(PathBuf::from(path))
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

/// Whether `source_ref` is fetched over the network rather than read from disk.
#[must_use]
pub fn is_remote_ref(source_ref: &str) -> bool {
    matches!(Source::classify(source_ref), Source::Remote(_))
}

/// Smallest power-of-two factor that brings both edges within `max_dim`.
#[must_use]
pub fn downscale_factor(width: u32, height: u32, max_dim: u32) -> u32 {
    let max_dim = max_dim.max(1);
    let mut factor = 1u32;
    while (width.div_ceil(factor) > max_dim || height.div_ceil(factor) > max_dim)
        && factor < (1 << 31)
    {
        factor *= 2;
    }
    factor
}

/// Loads artwork references and produces bounded JPEG rasters.
///
/// Stateless apart from the HTTP client; results are not cached here.
pub struct ArtworkTranscoder {
    http: reqwest::Client,
    max_fetch_bytes: usize,
}

impl ArtworkTranscoder {
    /// Creates a transcoder using `http` for remote references.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_fetch_bytes: MAX_ARTWORK_FETCH_BYTES,
        }
    }

    /// Overrides the remote download ceiling.
    pub fn with_max_fetch_bytes(mut self, bytes: usize) -> Self {
        self.max_fetch_bytes = bytes;
        self
    }

    /// Resolves `source_ref` to a raster no larger than `max_dim` on either edge.
    pub async fn resolve(&self, source_ref: &str, max_dim: u32) -> Artwork {
        match self.try_resolve(source_ref, max_dim.max(1)).await {
            Ok(raster) => Artwork::Raster(raster),
            Err(e) => {
                log::debug!("[Artwork] {} unavailable: {}", source_ref, e);
                Artwork::Unavailable
            }
        }
    }

    async fn try_resolve(&self, source_ref: &str, max_dim: u32) -> ArtworkResult<RasterImage> {
        let join = match Source::classify(source_ref) {
            Source::File(path) => {
                tokio::task::spawn_blocking(move || {
                    transcode(|| File::open(&path).map(BufReader::new), max_dim)
                })
                .await
            }
            Source::Remote(url) => {
                let bytes = self.fetch(&url).await?;
                tokio::task::spawn_blocking(move || {
                    transcode(|| Ok(Cursor::new(bytes.clone())), max_dim)
                })
                .await
            }
        };
        join.map_err(|e| ArtworkError::Decode(format!("transcode task failed: {}", e)))?
    }

    /// Downloads a remote reference, enforcing the byte ceiling while streaming.
    async fn fetch(&self, url: &str) -> ArtworkResult<Bytes> {
        let fetch_err = |e: reqwest::Error| ArtworkError::Fetch(e.to_string());
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_fetch_bytes as u64)
        {
            return Err(ArtworkError::TooLarge(self.max_fetch_bytes));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
            if body.len() + chunk.len() > self.max_fetch_bytes {
                return Err(ArtworkError::TooLarge(self.max_fetch_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Two-Pass Decode
// ─────────────────────────────────────────────────────────────────────────────

/// Runs both decode passes against a re-openable source.
fn transcode<R, F>(open: F, max_dim: u32) -> ArtworkResult<RasterImage>
where
    R: BufRead + Seek,
    F: Fn() -> std::io::Result<R>,
{
    // Pass one: header only.
    let reader = ImageReader::new(open()?).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ArtworkError::Unsupported("unrecognized image format".into()))?;
    let (width, height) = reader.into_dimensions().map_err(decode_err)?;
    let factor = downscale_factor(width, height, max_dim);

    // Pass two: decode with the factor applied.
    let rgb = match format {
        _ if factor == 1 => decode_whole(open()?, format)?,
        ImageFormat::Jpeg => decode_jpeg_scaled(open()?, factor)?,
        ImageFormat::Png => decode_png_sampled(open()?, factor)?,
        other => {
            return Err(ArtworkError::Unsupported(format!(
                "{:?} at {}x{} exceeds {}px and has no scaled decode",
                other, width, height, max_dim
            )))
        }
    };

    log::trace!(
        "[Artwork] {:?} {}x{} -> {}x{} (factor {})",
        format,
        width,
        height,
        rgb.width(),
        rgb.height(),
        factor
    );
    encode_jpeg(&rgb)
}

fn decode_whole<R: BufRead + Seek>(reader: R, format: ImageFormat) -> ArtworkResult<RgbImage> {
    let image = ImageReader::with_format(reader, format)
        .decode()
        .map_err(decode_err)?;
    Ok(image.to_rgb8())
}

/// JPEG: DCT-domain scaling (down to 1/8), then a box reduction of the
/// already-small raster for any remaining factor.
fn decode_jpeg_scaled<R: BufRead>(reader: R, factor: u32) -> ArtworkResult<RgbImage> {
    let mut decoder = jpeg_decoder::Decoder::new(reader);
    decoder.read_info().map_err(decode_err)?;
    let info = decoder
        .info()
        .ok_or_else(|| ArtworkError::Decode("missing JPEG header".into()))?;

    let dct = factor.min(JPEG_MAX_DCT_SCALE);
    let requested_w = u32::from(info.width).div_ceil(dct) as u16;
    let requested_h = u32::from(info.height).div_ceil(dct) as u16;
    let (w, h) = decoder
        .scale(requested_w, requested_h)
        .map_err(decode_err)?;
    let pixels = decoder.decode().map_err(decode_err)?;
    let format = decoder
        .info()
        .map(|i| i.pixel_format)
        .ok_or_else(|| ArtworkError::Decode("missing JPEG info after decode".into()))?;

    let rgb = jpeg_pixels_to_rgb(pixels, u32::from(w), u32::from(h), format)?;
    let rest = factor / dct;
    if rest > 1 {
        let (tw, th) = (rgb.width().div_ceil(rest), rgb.height().div_ceil(rest));
        Ok(imageops::thumbnail(&rgb, tw, th))
    } else {
        Ok(rgb)
    }
}

fn jpeg_pixels_to_rgb(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: jpeg_decoder::PixelFormat,
) -> ArtworkResult<RgbImage> {
    use jpeg_decoder::PixelFormat;

    let rgb: Vec<u8> = match format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        // Big-endian samples; keep the high byte.
        PixelFormat::L16 => pixels.chunks_exact(2).flat_map(|p| [p[0]; 3]).collect(),
        PixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|p| {
                let k = 255 - u32::from(p[3]);
                let channel = |c: u8| ((255 - u32::from(c)) * k / 255) as u8;
                [channel(p[0]), channel(p[1]), channel(p[2])]
            })
            .collect(),
        #[allow(unreachable_patterns)]
        other => {
            return Err(ArtworkError::Unsupported(format!(
                "JPEG pixel format {:?}",
                other
            )))
        }
    };
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| ArtworkError::Decode("JPEG buffer size mismatch".into()))
}

/// PNG: stream rows and keep every `factor`-th row and pixel, so the
/// full-resolution frame is never held in memory.
fn decode_png_sampled<R: BufRead + Seek>(reader: R, factor: u32) -> ArtworkResult<RgbImage> {
    let mut decoder = png::Decoder::new(reader);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(decode_err)?;

    let (width, height, interlaced) = {
        let info = reader.info();
        (info.width, info.height, info.interlaced)
    };
    if interlaced {
        // Adam7 passes arrive out of row order.
        return Err(ArtworkError::Unsupported(
            "interlaced PNG exceeds artwork bounds".into(),
        ));
    }

    let channels = reader.output_color_type().0.samples();
    let (out_w, out_h) = (width.div_ceil(factor), height.div_ceil(factor));
    let mut out = Vec::with_capacity(out_w as usize * out_h as usize * 3);

    let mut y = 0u32;
    while let Some(row) = reader.next_row().map_err(decode_err)? {
        if y % factor == 0 {
            let data = row.data();
            for x in (0..width as usize).step_by(factor as usize) {
                let px = data
                    .get(x * channels..(x + 1) * channels)
                    .ok_or_else(|| ArtworkError::Decode("PNG row too short".into()))?;
                match channels {
                    1 | 2 => out.extend_from_slice(&[px[0]; 3]),
                    _ => out.extend_from_slice(&px[..3]),
                }
            }
        }
        y += 1;
    }

    RgbImage::from_raw(out_w, out_h, out)
        .ok_or_else(|| ArtworkError::Decode("PNG ended early".into()))
}

fn encode_jpeg(rgb: &RgbImage) -> ArtworkResult<RasterImage> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, ARTWORK_JPEG_QUALITY)
        .encode_image(rgb)
        .map_err(|e| ArtworkError::Encode(e.to_string()))?;
    Ok(RasterImage {
        width: rgb.width(),
        height: rgb.height(),
        mime: "image/jpeg",
        bytes: Bytes::from(buf),
    })
}
