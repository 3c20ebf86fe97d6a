//! In-process LaMa inpainting through ONNX Runtime.

use std::path::Path;
use std::thread;

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ort::{inputs, session::Session};

use crate::error::{Error, Result};
use crate::inpaint::{check_mask_size, composite, InpaintConfig, Inpainter};

/// Square input resolution of the exported LaMa graph.
const MODEL_SIZE: u32 = 512;

fn model_error(e: impl std::fmt::Display) -> Error {
    Error::Inpaint(format!("lama: {e}"))
}

/// LaMa model loaded once and reused for every image.
#[derive(Debug)]
pub struct LamaInpainter {
    model: Session,
}

impl LamaInpainter {
    /// Load the ONNX model at `model_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inpaint`] if the runtime cannot load the model.
    pub fn new(model_path: &Path) -> Result<Self> {
        let threads = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let model = Session::builder()
            .map_err(model_error)?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(model_error)?
            .with_intra_threads(threads)
            .map_err(model_error)?
            .commit_from_file(model_path)
            .map_err(model_error)?;

        Ok(Self { model })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn run(&mut self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
        let (orig_width, orig_height) = image.dimensions();
        let image = imageops::resize(image, MODEL_SIZE, MODEL_SIZE, FilterType::CatmullRom);
        let mask = imageops::resize(mask, MODEL_SIZE, MODEL_SIZE, FilterType::Nearest);
        let side = MODEL_SIZE as usize;

        let mut image_data = ndarray::Array::zeros((1, 3, side, side));
        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            image_data[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            image_data[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            image_data[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }

        let mut mask_data = ndarray::Array::zeros((1, 1, side, side));
        for (x, y, pixel) in mask.enumerate_pixels() {
            mask_data[[0, 0, y as usize, x as usize]] = if pixel[0] > 0 { 1.0_f32 } else { 0.0 };
        }

        let inputs = inputs![
            "image" => image_data.view(),
            "mask" => mask_data.view(),
        ]
        .map_err(model_error)?;
        let outputs = self.model.run(inputs).map_err(model_error)?;
        let output = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(model_error)?;
        let output = output.view();

        let restored = RgbImage::from_fn(MODEL_SIZE, MODEL_SIZE, |x, y| {
            let (x, y) = (x as usize, y as usize);
            image::Rgb([0, 1, 2].map(|c| output[[0, c, y, x]].clamp(0.0, 255.0).round() as u8))
        });

        Ok(imageops::resize(
            &restored,
            orig_width,
            orig_height,
            FilterType::CatmullRom,
        ))
    }
}

impl Inpainter for LamaInpainter {
    fn inpaint(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        config: &InpaintConfig,
    ) -> Result<RgbImage> {
        check_mask_size(image, mask)?;

        match config.crop_box(mask) {
            Some(region) => {
                tracing::debug!(?region, "inpainting crop");
                let crop_image =
                    imageops::crop_imm(image, region.x, region.y, region.width, region.height)
                        .to_image();
                let crop_mask =
                    imageops::crop_imm(mask, region.x, region.y, region.width, region.height)
                        .to_image();
                let restored = self.run(&crop_image, &crop_mask)?;
                Ok(composite(image, &restored, mask, region.x, region.y))
            }
            None => {
                let restored = self.run(image, mask)?;
                Ok(composite(image, &restored, mask, 0, 0))
            }
        }
    }
}
