//! Decoded video frames.
//!
//! A `Frame` is handed to the detector for one sampled index and dropped
//! afterwards. Frames are never written anywhere.

/// Processing resolution cap. Larger sources are decoded at half size.
pub const MAX_PROCESSING_WIDTH: u32 = 1280;
pub const MAX_PROCESSING_HEIGHT: u32 = 720;

/// Returns the processing dimensions for a source of the given size.
pub fn processing_size(width: u32, height: u32) -> (u32, u32) {
    if width > MAX_PROCESSING_WIDTH || height > MAX_PROCESSING_HEIGHT {
        (width / 2, height / 2)
    } else {
        (width, height)
    }
}

/// RGB24 frame at processing resolution.
pub struct Frame {
    data: Vec<u8>,
    /// 1-based position in the source.
    pub index: u64,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub(crate) fn new(data: Vec<u8>, index: u64, width: u32, height: u32) -> Self {
        Self {
            data,
            index,
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_sources_are_halved() {
        assert_eq!(processing_size(1920, 1080), (960, 540));
        assert_eq!(processing_size(1280, 720), (1280, 720));
        assert_eq!(processing_size(1281, 400), (640, 200));
        assert_eq!(processing_size(640, 721), (320, 360));
    }

    #[test]
    fn debug_omits_pixels() {
        let frame = Frame::new(vec![7u8; 12], 3, 2, 2);
        let dbg = format!("{:?}", frame);
        assert!(dbg.contains("index: 3"));
        assert!(dbg.contains("bytes: 12"));
        assert_eq!(frame.pixels().len(), frame.byte_len());
    }
}
