use crate::config::Config;
use actix_multipart::Multipart;
use actix_web::web;
use futures_util::StreamExt;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::collections::HashMap;
use std::fs;
use thiserror::Error;

/// Avatar renditions generated from one upload: a large square for the
/// profile page and a small one for listings.
pub const AVATAR_BIG_PX: u32 = 128;
pub const AVATAR_SMALL_PX: u32 = 50;

const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Uploaded file is not a supported image: {0}")]
    UnsupportedImage(#[from] image::ImageError),
    #[error("Uploaded image is too large (maximum 5 MB)")]
    TooLarge,
    #[error("Invalid form data: {0}")]
    Form(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Blocking task failed")]
    Blocking,
}

/// The profile edit form arrives as multipart so it can carry the optional
/// avatar file next to the text fields.
pub struct ProfileForm {
    pub fields: HashMap<String, String>,
    pub avatar: Option<Vec<u8>>,
}

impl ProfileForm {
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map_or("", |s| s.trim())
    }
}

pub async fn read_profile_form(mut payload: Multipart) -> Result<ProfileForm, AvatarError> {
    let mut fields = HashMap::new();
    let mut avatar: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AvatarError::Form(e.to_string()))?;
        let field_name =
            field.content_disposition().get_name().unwrap_or_default().to_string();

        if field_name == "avatar" {
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| AvatarError::Form(e.to_string()))?;
                if data.len() + chunk.len() > MAX_AVATAR_BYTES {
                    return Err(AvatarError::TooLarge);
                }
                data.extend_from_slice(&chunk);
            }
            // Browsers submit an empty file part when no avatar was chosen.
            if !data.is_empty() {
                avatar = Some(data);
            }
        } else {
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| AvatarError::Form(e.to_string()))?;
                data.extend_from_slice(&chunk);
            }
            let value = String::from_utf8(data)
                .map_err(|_| AvatarError::Form("Invalid UTF-8 in form field.".to_string()))?;
            fields.insert(field_name, value);
        }
    }

    Ok(ProfileForm { fields, avatar })
}

/// Decodes the upload, crops it to a centered square, and produces the two
/// fixed-size JPEG renditions.
pub fn make_renditions(bytes: &[u8]) -> Result<(RgbImage, RgbImage), AvatarError> {
    let img = image::load_from_memory(bytes)?;
    let square = square_crop(&img);
    let big = square.resize_exact(AVATAR_BIG_PX, AVATAR_BIG_PX, FilterType::Lanczos3).to_rgb8();
    let small =
        square.resize_exact(AVATAR_SMALL_PX, AVATAR_SMALL_PX, FilterType::Lanczos3).to_rgb8();
    Ok((big, small))
}

fn square_crop(img: &DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let half = if w <= h { w / 2 } else { h / 2 };
    let side = (half * 2).max(1);
    let left = w / 2 - half;
    let top = h / 2 - half;
    img.crop_imm(left, top, side, side)
}

/// Writes both renditions under `<media>/avatars/<username>/` and returns the
/// paths the templates serve them from.
pub async fn save_avatar(
    config: &Config,
    username: &str,
    bytes: Vec<u8>,
) -> Result<(String, String), AvatarError> {
    let dir = config.avatar_dir().join(username);
    let big_path = dir.join("big.jpg");
    let small_path = dir.join("small.jpg");

    // Image decoding and disk writes are blocking work.
    web::block(move || -> Result<(), AvatarError> {
        let (big, small) = make_renditions(&bytes)?;
        fs::create_dir_all(&dir)?;
        big.save_with_format(&big_path, image::ImageFormat::Jpeg)?;
        small.save_with_format(&small_path, image::ImageFormat::Jpeg)?;
        Ok(())
    })
    .await
    .map_err(|_| AvatarError::Blocking)??;

    Ok((
        format!("/media/avatars/{}/big.jpg", username),
        format!("/media/avatars/{}/small.jpg", username),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 30, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn renditions_are_fixed_size_squares() {
        for (w, h) in [(300, 100), (100, 300), (128, 128), (37, 53)] {
            let (big, small) = make_renditions(&encode_png(w, h)).unwrap();
            assert_eq!((big.width(), big.height()), (AVATAR_BIG_PX, AVATAR_BIG_PX));
            assert_eq!((small.width(), small.height()), (AVATAR_SMALL_PX, AVATAR_SMALL_PX));
        }
    }

    #[test]
    fn square_crop_takes_central_region() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let cropped = square_crop(&img);
        assert_eq!((cropped.width(), cropped.height()), (100, 100));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = make_renditions(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AvatarError::UnsupportedImage(_)));
    }
}
