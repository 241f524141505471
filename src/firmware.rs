use std::path::Path;

use crate::error::{Error, Result};

/// Raw application image, sent as-is.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|source| Error::Firmware {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consecutive slices of at most `size` bytes. A zero size is read as 1.
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, u8> {
        self.as_bytes().chunks(size.max(1))
    }

    pub fn chunk_count(&self, size: usize) -> usize {
        self.len().div_ceil(size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_image_once_in_order() {
        for len in [0usize, 1, 489, 490, 491, 980, 1000, 4097] {
            let image = FirmwareImage::new((0..len).map(|i| i as u8).collect());
            for size in [1usize, 7, 244, 490] {
                let chunks: Vec<&[u8]> = image.chunks(size).collect();
                assert_eq!(chunks.len(), image.chunk_count(size));
                assert_eq!(chunks.len(), (len + size - 1) / size);
                assert_eq!(chunks.concat(), image.as_bytes());
                if let Some(last) = chunks.last() {
                    let expected = if len % size == 0 { size } else { len % size };
                    assert_eq!(last.len(), expected);
                }
                assert!(chunks.iter().all(|c| c.len() <= size));
            }
        }
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let err = FirmwareImage::load(Path::new("/nonexistent/lamp.bin"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lamp.bin"));
    }
}
