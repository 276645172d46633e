//! 图片解码：按文件头判断格式，再完整解码像素

use std::fmt;

use ::image::{DynamicImage, GenericImageView};
use bytes::Bytes;

use super::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    WebP,
}

impl ImageFormat {
    fn from_guessed(format: ::image::ImageFormat) -> Option<Self> {
        match format {
            ::image::ImageFormat::Png => Some(ImageFormat::Png),
            ::image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            ::image::ImageFormat::Gif => Some(ImageFormat::Gif),
            ::image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
            ::image::ImageFormat::WebP => Some(ImageFormat::WebP),
            _ => None,
        }
    }
}

impl From<ImageFormat> for ::image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => ::image::ImageFormat::Png,
            ImageFormat::Jpeg => ::image::ImageFormat::Jpeg,
            ImageFormat::Gif => ::image::ImageFormat::Gif,
            ImageFormat::Bmp => ::image::ImageFormat::Bmp,
            ImageFormat::WebP => ::image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Gif => "GIF",
            ImageFormat::Bmp => "BMP",
            ImageFormat::WebP => "WebP",
        };
        f.write_str(name)
    }
}

/// 解码后的图片，`data` 为原始字节
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub pixels: DynamicImage,
    pub data: Bytes,
}

pub fn decode(bytes: &Bytes) -> Result<Image, DecodeError> {
    let guessed = ::image::guess_format(bytes)
        .map_err(|e| DecodeError::Image(format!("未知的图片格式: {}", e)))?;
    let format = ImageFormat::from_guessed(guessed)
        .ok_or_else(|| DecodeError::Image(format!("不支持的图片格式: {:?}", guessed)))?;

    // 数据损坏或不完整时在这里失败
    let pixels = ::image::load_from_memory_with_format(bytes, format.into())
        .map_err(|e| DecodeError::Image(format!("{} 解码失败: {}", format, e)))?;
    let (width, height) = pixels.dimensions();

    Ok(Image {
        format,
        width,
        height,
        pixels,
        data: bytes.clone(),
    })
}

/// 编码一张纯色测试图片
#[cfg(test)]
pub(crate) fn encode_sample(format: ImageFormat, width: u32, height: u32) -> Bytes {
    let pixels = DynamicImage::ImageRgb8(::image::RgbImage::from_pixel(
        width,
        height,
        ::image::Rgb([200, 40, 40]),
    ));
    let mut buffer = std::io::Cursor::new(Vec::new());
    pixels.write_to(&mut buffer, format.into()).unwrap();
    Bytes::from(buffer.into_inner())
}
