//! Frame sources for simulated cameras.

use crate::config::{CameraConfig, FrameSourceConfig};
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Produces JPEG frames for one camera stream.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Bytes>;
}

/// Opens the configured source; an unusable source means the camera cannot
/// be opened.
pub fn open_source(camera: &CameraConfig, jpeg_quality: u8) -> Result<Box<dyn FrameSource>> {
    match &camera.source {
        FrameSourceConfig::Pattern => Ok(Box::new(PatternSource::new(
            camera.width,
            camera.height,
            jpeg_quality,
        ))),
        FrameSourceConfig::Directory { path } => {
            let source = DirectorySource::open(path).map_err(|e| {
                debug!("Camera {} source unavailable: {}", camera.id, e);
                BackendError::CameraUnavailable(camera.id)
            })?;
            Ok(Box::new(source))
        }
    }
}

// ============================================================================
// 测试画面
// ============================================================================

/// Gradient background with a white bar sweeping left to right.
pub struct PatternSource {
    width: u32,
    height: u32,
    quality: u8,
    tick: u32,
}

const BAR_WIDTH: u32 = 16;

impl PatternSource {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality,
            tick: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let bar_start = (self.tick * 4) % self.width.max(1);
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);

        for y in 0..self.height {
            for x in 0..self.width {
                if x >= bar_start && x < bar_start + BAR_WIDTH {
                    pixels.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / self.width.max(1)) as u8;
                    let g = (y * 255 / self.height.max(1)) as u8;
                    let b = (self.tick % 256) as u8;
                    pixels.extend_from_slice(&[r, g, b]);
                }
            }
        }
        pixels
    }
}

#[async_trait]
impl FrameSource for PatternSource {
    async fn next_frame(&mut self) -> Result<Bytes> {
        let pixels = self.render();
        self.tick = self.tick.wrapping_add(1);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            &pixels,
            self.width,
            self.height,
            ColorType::Rgb8,
        )?;
        Ok(Bytes::from(jpeg))
    }
}

// ============================================================================
// 图片目录
// ============================================================================

/// Cycles through the `.jpg`/`.jpeg` files of a directory in name order.
pub struct DirectorySource {
    files: Vec<PathBuf>,
    index: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", dir),
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_jpeg_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no JPEG files in {:?}", dir),
            )));
        }

        debug!("Loaded {} frame file(s) from {:?}", files.len(), dir);
        Ok(Self { files, index: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_jpeg_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "jpg" || ext == "jpeg"
        })
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for DirectorySource {
    async fn next_frame(&mut self) -> Result<Bytes> {
        let path = &self.files[self.index % self.files.len()];
        self.index = (self.index + 1) % self.files.len();
        let data = tokio::fs::read(path).await?;
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::is_jpeg;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pattern_source_produces_jpeg() {
        let mut source = PatternSource::new(64, 48, 70);
        let first = source.next_frame().await.unwrap();
        let second = source.next_frame().await.unwrap();

        assert!(is_jpeg(&first));
        assert!(is_jpeg(&second));
        // 竖条在移动
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_directory_source_cycles_in_name_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.jpg"), [0xFF, 0xD8, 0x02]).unwrap();
        std::fs::write(dir.path().join("a.JPEG"), [0xFF, 0xD8, 0x01]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let frames = [
            source.next_frame().await.unwrap(),
            source.next_frame().await.unwrap(),
            source.next_frame().await.unwrap(),
        ];
        assert_eq!(frames[0][2], 0x01);
        assert_eq!(frames[1][2], 0x02);
        assert_eq!(frames[2][2], 0x01);
    }

    #[test]
    fn test_empty_directory_cannot_be_opened() {
        let dir = TempDir::new().unwrap();
        assert!(DirectorySource::open(dir.path()).is_err());

        let camera = CameraConfig {
            source: FrameSourceConfig::Directory {
                path: dir.path().to_path_buf(),
            },
            ..CameraConfig::pattern(9, "Empty", 10, 10)
        };
        assert!(matches!(
            open_source(&camera, 70),
            Err(BackendError::CameraUnavailable(9))
        ));
    }
}
