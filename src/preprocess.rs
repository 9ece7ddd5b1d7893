use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, RgbImage, imageops};
use ndarray::{Array3, Array4, Axis};

use crate::error::ClassifierError;

/// Normalization constants and target geometry of the transform.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Target length of the shorter side after the aspect-preserving resize.
    pub resize_to: u32,
    /// Side length of the centered square crop.
    pub crop: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            resize_to: 256,
            crop: 224,
        }
    }
}

/// Deterministic image-to-tensor transform.
#[derive(Debug)]
pub struct Processor {
    config: PreprocessConfig,
}

/// Decodes raw upload bytes into an image. Sits at the request boundary so
/// handlers can reject undecodable payloads before touching the model.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ClassifierError> {
    image::load_from_memory(bytes)
        .map_err(|e| ClassifierError::InvalidImage(format!("failed to decode image: {e}")))
}

impl Processor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Transforms an arbitrary image into a `(1, 3, crop, crop)` f32 tensor:
    /// RGB conversion, shorter-side resize, center crop, per-channel
    /// standardization, leading batch dimension.
    pub fn transform(&self, image: &DynamicImage) -> Result<Array4<f32>, ClassifierError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifierError::InvalidImage(
                "image has zero width or height".into(),
            ));
        }

        let resized = self.resize_shorter_side(rgb)?;
        let cropped = self.center_crop(&resized);
        Ok(self.normalize(&cropped))
    }

    /// Scales the shorter side to `resize_to` with bilinear interpolation,
    /// preserving aspect ratio.
    fn resize_shorter_side(&self, rgb: RgbImage) -> Result<RgbImage, ClassifierError> {
        let (width, height) = rgb.dimensions();
        let target = self.config.resize_to;
        let (new_width, new_height) = if width <= height {
            (target, scaled_side(height, width, target))
        } else {
            (scaled_side(width, height, target), target)
        };

        let src = DynamicImage::ImageRgb8(rgb);
        let mut dst = Image::new(new_width, new_height, PixelType::U8x3);
        let mut resizer = Resizer::new();
        let options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| ClassifierError::InvalidImage(format!("resize failed: {e}")))?;

        RgbImage::from_raw(new_width, new_height, dst.buffer().to_vec())
            .ok_or_else(|| ClassifierError::InvalidImage("resize produced a malformed buffer".into()))
    }

    fn center_crop(&self, resized: &RgbImage) -> RgbImage {
        let crop = self.config.crop;
        let x0 = (resized.width() - crop) / 2;
        let y0 = (resized.height() - crop) / 2;
        imageops::crop_imm(resized, x0, y0, crop, crop).to_image()
    }

    fn normalize(&self, cropped: &RgbImage) -> Array4<f32> {
        let side = self.config.crop as usize;
        let mean = self.config.mean;
        let std = self.config.std;

        let mut tensor = Array3::<f32>::zeros((3, side, side));
        for (x, y, pixel) in cropped.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, y, x]] = (pixel[0] as f32 / 255.0 - mean[0]) / std[0];
            tensor[[1, y, x]] = (pixel[1] as f32 / 255.0 - mean[1]) / std[1];
            tensor[[2, y, x]] = (pixel[2] as f32 / 255.0 - mean[2]) / std[2];
        }

        tensor.insert_axis(Axis(0))
    }
}

/// Rounded length of the longer side after scaling the shorter side to
/// `target`.
fn scaled_side(long: u32, short: u32, target: u32) -> u32 {
    ((long as u64 * target as u64 + short as u64 / 2) / short as u64) as u32
}
