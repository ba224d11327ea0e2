use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::PipelineError;
use crate::frame::Frame;

pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Deterministic thumbnail filename for an event.
pub fn thumbnail_name(timestamp: f64, frame_id: u64) -> String {
    let millis = (timestamp * 1000.0).max(0.0).round() as u64;
    format!("frame_{}_{}.jpg", millis, frame_id)
}

/// Writes downscaled JPEG thumbnails into one directory.
#[derive(Clone, Debug)]
pub struct ThumbnailStore {
    dir: PathBuf,
    width: u32,
    quality: u8,
}

impl ThumbnailStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            width: THUMBNAIL_WIDTH,
            quality: THUMBNAIL_QUALITY,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resize (width capped, aspect preserved), encode and atomically place
    /// the thumbnail at `<dir>/<name>`.
    pub fn save(&self, frame: &Frame, name: &str) -> Result<PathBuf, PipelineError> {
        let persist = |e: &dyn std::fmt::Display| PipelineError::Persistence(format!("{}: {}", name, e));

        let image = frame.to_image().map_err(|e| persist(&e))?;
        let image = if image.width() > self.width {
            let height = ((image.height() as u64 * self.width as u64) as f64 / image.width() as f64)
                .round()
                .max(1.0) as u32;
            imageops::resize(&image, self.width, height, FilterType::Triangle)
        } else {
            image
        };

        fs::create_dir_all(&self.dir).map_err(|e| persist(&e))?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let written = fs::File::create(&tmp)
            .map_err(anyhow::Error::from)
            .and_then(|file| self.write_jpeg(&image, file))
            .and_then(|file| Ok(file.sync_all()?))
            .and_then(|()| Ok(fs::rename(&tmp, &path)?));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(persist(&format!("{:#}", err)));
        }
        Ok(path)
    }

    /// Encode `image` into `out` and hand `out` back once every byte has
    /// reached it.
    fn write_jpeg<W: Write>(&self, image: &RgbImage, out: W) -> Result<W> {
        let mut writer = BufWriter::new(out);
        JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(image)?;
        writer
            .into_inner()
            .map_err(|e| anyhow!("flush thumbnail: {}", e.error()))
    }

    /// Best-effort removal of a previously saved thumbnail.
    pub fn remove(&self, name: &str) {
        let path = self.dir.join(name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::debug!("failed to remove thumbnail {}: {}", path.display(), err);
            }
        }
    }
}
