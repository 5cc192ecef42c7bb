//! Keyed storage for uploaded source frames.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::backend::RenderBackend;
use crate::error::CanvasError;
use crate::types::PixelFormat;

/// Host pixels to import; borrowed only for the duration of the upload.
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes; `None` means tightly packed.
    pub bytes_per_row: Option<u32>,
    pub format: PixelFormat,
}

impl<'a> TextureUpload<'a> {
    /// Tightly packed BGRA8, the layout camera frames arrive in.
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            bytes_per_row: None,
            format: PixelFormat::Bgra8,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_bytes_per_row(mut self, bytes_per_row: u32) -> Self {
        self.bytes_per_row = Some(bytes_per_row);
        self
    }

    pub fn tight_row_bytes(&self) -> usize {
        self.width as usize * PixelFormat::BYTES_PER_PIXEL as usize
    }

    pub fn row_stride(&self) -> usize {
        self.bytes_per_row
            .map(|stride| stride as usize)
            .unwrap_or_else(|| self.tight_row_bytes())
    }

    /// Bytes the buffer must hold; the last row need not be padded.
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.row_stride() * (self.height as usize - 1) + self.tight_row_bytes()
    }

    /// Checks size, stride, buffer length and format against a backend.
    pub fn validate(&self, max_dimension: u32, format_supported: bool) -> Result<(), CanvasError> {
        if self.width == 0 || self.height == 0 {
            return Err(CanvasError::invalid_dimensions(
                self.width,
                self.height,
                "width and height must be non-zero",
            ));
        }
        if self.width > max_dimension || self.height > max_dimension {
            return Err(CanvasError::invalid_dimensions(
                self.width,
                self.height,
                format!("exceeds device maximum of {max_dimension}"),
            ));
        }
        if self.row_stride() < self.tight_row_bytes() {
            return Err(CanvasError::invalid_dimensions(
                self.width,
                self.height,
                format!(
                    "row stride {} is smaller than {} bytes per row",
                    self.row_stride(),
                    self.tight_row_bytes()
                ),
            ));
        }
        let expected = self.required_len();
        if self.pixels.len() < expected {
            return Err(CanvasError::PixelBufferTooSmall {
                expected,
                actual: self.pixels.len(),
            });
        }
        if !format_supported {
            return Err(CanvasError::UnsupportedFormat(format!(
                "{} is not sampleable on this device",
                self.format
            )));
        }
        Ok(())
    }

    /// Pixel rows with any stride padding removed.
    pub fn tight_pixels(&self) -> Cow<'a, [u8]> {
        let row = self.tight_row_bytes();
        let stride = self.row_stride();
        let pixels: &'a [u8] = self.pixels;
        if stride == row {
            return Cow::Borrowed(&pixels[..self.required_len()]);
        }
        let mut packed = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * stride;
            packed.extend_from_slice(&pixels[start..start + row]);
        }
        Cow::Owned(packed)
    }
}

/// A registered texture together with its metadata.
#[derive(Debug)]
pub struct TextureEntry<T> {
    texture: T,
    info: TextureInfo,
}

impl<T> TextureEntry<T> {
    pub fn texture(&self) -> &T {
        &self.texture
    }

    pub fn info(&self) -> TextureInfo {
        self.info
    }

    pub fn size(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Registry-wide upload counter; a fresh value on every upsert.
    pub generation: u64,
}

/// Maps host keys to backend textures. At most one live texture per key.
#[derive(Debug)]
pub struct TextureRegistry<T> {
    entries: HashMap<String, TextureEntry<T>>,
    next_generation: u64,
}

impl<T> Default for TextureRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TextureRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Uploads `upload` under `key`, dropping whatever texture held it before.
    ///
    /// Nothing is replaced when validation or the upload fails.
    pub fn upsert<B>(
        &mut self,
        backend: &mut B,
        key: &str,
        upload: &TextureUpload<'_>,
    ) -> Result<TextureInfo, CanvasError>
    where
        B: RenderBackend<Texture = T>,
    {
        if key.is_empty() {
            return Err(CanvasError::InvalidKey);
        }
        upload.validate(
            backend.max_texture_dimension(),
            backend.supports_format(upload.format),
        )?;

        let texture = backend.create_texture(key, upload)?;
        let info = TextureInfo {
            width: upload.width,
            height: upload.height,
            format: upload.format,
            generation: self.next_generation,
        };
        self.next_generation += 1;

        let replaced = self
            .entries
            .insert(key.to_string(), TextureEntry { texture, info })
            .is_some();
        tracing::debug!(
            key,
            width = info.width,
            height = info.height,
            format = %info.format,
            generation = info.generation,
            replaced,
            "texture registered"
        );
        Ok(info)
    }

    /// Drops the texture under `key`. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                tracing::debug!(key, generation = entry.info.generation, "texture released");
                true
            }
            None => false,
        }
    }

    pub fn resolve(&self, key: &str) -> Result<&TextureEntry<T>, CanvasError> {
        self.entries
            .get(key)
            .ok_or_else(|| CanvasError::TextureNotFound(key.to_string()))
    }

    pub fn info(&self, key: &str) -> Option<TextureInfo> {
        self.entries.get(key).map(TextureEntry::info)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
