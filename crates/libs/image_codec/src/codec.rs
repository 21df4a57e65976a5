use crate::{ImageError, ImageSource, sniff_mime};
use app_state::ImageSettings;
use base64::{Engine as _, engine::general_purpose};
use common_types::EncodedImage;
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbImage};
use std::io::Cursor;
use tracing::debug;

pub const JPEG_MIME: &str = "image/jpeg";

/// Turns image files or URLs into base64 payloads for chat messages.
///
/// Cloning is cheap; clones share the HTTP client used for remote images.
#[derive(Clone, Debug)]
pub struct ImageCodec {
    http: reqwest::Client,
    settings: ImageSettings,
}

impl ImageCodec {
    #[must_use]
    pub fn new(settings: ImageSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    /// Reads `reference` (a local path or http(s) URL) and encodes it for the model.
    ///
    /// With `recompress` the image is decoded, flattened to RGB, shrunk to fit the configured
    /// bounds and re-encoded as JPEG. Otherwise the original bytes are sent as-is.
    pub async fn encode(&self, reference: &str) -> Result<EncodedImage, ImageError> {
        let source = ImageSource::parse(reference);
        let bytes = source
            .read_bytes(&self.http, self.settings.fetch_timeout)
            .await?;

        if !self.settings.recompress {
            let mime = sniff_mime(&bytes);
            return Ok(EncodedImage::new(mime, general_purpose::STANDARD.encode(&bytes)));
        }

        let name = source.describe();
        let settings = self.settings;
        let jpeg = tokio::task::spawn_blocking(move || recompress(&name, &bytes, &settings))
            .await
            .map_err(|e| ImageError::format(reference, e))??;
        debug!(source = reference, jpeg_bytes = jpeg.len(), "Encoded image");
        Ok(EncodedImage::new(
            JPEG_MIME,
            general_purpose::STANDARD.encode(&jpeg),
        ))
    }
}

/// Target size that fits within `max_w`×`max_h` with the aspect ratio kept. Never upscales.
#[must_use]
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = (f64::from(max_w) / f64::from(width)).min(f64::from(max_h) / f64::from(height));
    let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    (scaled(width).min(max_w), scaled(height).min(max_h))
}

/// Decode, flatten to RGB, shrink, and encode as JPEG.
pub fn recompress(name: &str, bytes: &[u8], settings: &ImageSettings) -> Result<Vec<u8>, ImageError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::format(name, e))?
        .decode()
        .map_err(|e| ImageError::format(name, e))?;

    // Alpha and palette are dropped here.
    let rgb = img.into_rgb8();
    let (orig_w, orig_h) = rgb.dimensions();
    let (target_w, target_h) =
        fit_within(orig_w, orig_h, settings.max_width, settings.max_height);

    let resized = if (target_w, target_h) == (orig_w, orig_h) {
        rgb
    } else {
        debug!(source = name, orig_w, orig_h, target_w, target_h, "Downscaling image");
        resize_rgb(name, rgb, target_w, target_h)?
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, settings.jpeg_quality)
        .encode_image(&resized)
        .map_err(|e| ImageError::format(name, e))?;
    Ok(jpeg)
}

fn resize_rgb(
    name: &str,
    src: RgbImage,
    target_w: u32,
    target_h: u32,
) -> Result<RgbImage, ImageError> {
    let (orig_w, orig_h) = src.dimensions();
    let src_image = Image::from_vec_u8(orig_w, orig_h, src.into_raw(), PixelType::U8x3)
        .map_err(|e| ImageError::format(name, e))?;
    let mut dst_image = Image::new(target_w, target_h, PixelType::U8x3);

    let options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    Resizer::new()
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| ImageError::format(name, e))?;

    RgbImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| ImageError::format(name, "resized buffer has the wrong size"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::path::Path;
    use tempfile::TempDir;

    fn decode(encoded: &EncodedImage) -> image::DynamicImage {
        let bytes = general_purpose::STANDARD
            .decode(&encoded.base64)
            .expect("valid base64");
        image::load_from_memory(&bytes).expect("valid image")
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> String {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 120]));
        let path = dir.join(name);
        img.save_with_format(&path, ImageFormat::Png)
            .expect("write png");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(4800, 3200, 2400, 1600), (2400, 1600));
        assert_eq!(fit_within(4000, 1000, 2400, 1600), (2400, 600));
        assert_eq!(fit_within(1000, 4000, 2400, 1600), (400, 1600));
        assert_eq!(fit_within(800, 600, 2400, 1600), (800, 600));
    }

    #[tokio::test]
    async fn large_transparent_png_becomes_bounded_rgb_jpeg() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_png(dir.path(), "big.png", 300, 120);
        let codec = ImageCodec::new(ImageSettings {
            max_width: 100,
            max_height: 100,
            ..ImageSettings::default()
        });

        let encoded = codec.encode(&path).await.expect("encodes");
        assert_eq!(encoded.mime_type, "image/jpeg");
        let decoded = decode(&encoded);
        assert!(decoded.width() <= 100 && decoded.height() <= 100);
        assert_eq!((decoded.width(), decoded.height()), (100, 40));
        assert!(!decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn small_image_keeps_its_size() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_png(dir.path(), "small.png", 40, 30);
        let encoded = ImageCodec::new(ImageSettings::default())
            .encode(&path)
            .await
            .expect("encodes");
        let decoded = decode(&encoded);
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[tokio::test]
    async fn passthrough_keeps_bytes_and_sniffs_mime() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_png(dir.path(), "p.png", 10, 10);
        let original = std::fs::read(&path).expect("read back");
        let codec = ImageCodec::new(ImageSettings {
            recompress: false,
            ..ImageSettings::default()
        });

        let encoded = codec.encode(&path).await.expect("encodes");
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!(
            general_purpose::STANDARD.decode(&encoded.base64).expect("b64"),
            original
        );
    }

    #[tokio::test]
    async fn missing_and_empty_files_are_read_errors() {
        let dir = TempDir::new().expect("temp dir");
        let codec = ImageCodec::new(ImageSettings::default());

        let missing = dir.path().join("nope.jpg");
        let err = codec
            .encode(&missing.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }), "{err:?}");

        let empty = dir.path().join("empty.jpg");
        std::fs::write(&empty, b"").expect("write");
        let err = codec.encode(&empty.to_string_lossy()).await.unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_bytes_are_format_errors() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not an image").expect("write");
        let err = ImageCodec::new(ImageSettings::default())
            .encode(&path.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Format { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn remote_images_are_fetched() {
        let mut png = Vec::new();
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .expect("png");
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cabin.png")
            .with_status(200)
            .with_body(png)
            .create_async()
            .await;
        server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;
        let codec = ImageCodec::new(ImageSettings::default());

        let encoded = codec
            .encode(&format!("{}/cabin.png", server.url()))
            .await
            .expect("encodes");
        assert_eq!(decode(&encoded).width(), 8);

        let err = codec
            .encode(&format!("{}/gone.png", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }), "{err:?}");
    }
}
