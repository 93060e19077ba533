//! FFmpeg-backed local file decoder.
//!
//! Frames are converted to RGB24 at processing resolution in memory.
//! Skipped frames are decoded (the codec needs them) but never scaled.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::VideoInfo;
use crate::frame::{processing_size, Frame};

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
    position: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open video '{}' with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            f64::from(rate)
        } else {
            0.0
        };
        let mut total_frames = u64::try_from(stream.frames()).unwrap_or(0);
        if total_frames == 0 && fps > 0.0 && input.duration() > 0 {
            let seconds = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
            total_frames = (seconds * fps).round() as u64;
        }

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let (out_width, out_height) = processing_size(decoder.width(), decoder.height());
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            out_width,
            out_height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let info = VideoInfo {
            total_frames,
            fps,
            width: out_width,
            height: out_height,
        };
        log::info!(
            "opened {} ({}x{}, {:.2} fps, ~{} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.total_frames
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            position: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn info(&self) -> VideoInfo {
        self.info
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if !self.decode_next(&mut decoded)? {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Ok(Some(Frame::new(pixels, self.position, width, height)))
    }

    pub(crate) fn skip_frame(&mut self) -> Result<bool> {
        let mut decoded = ffmpeg::frame::Video::empty();
        self.decode_next(&mut decoded)
    }

    /// Pulls the next decoded frame, feeding packets as needed.
    fn decode_next(&mut self, decoded: &mut ffmpeg::frame::Video) -> Result<bool> {
        loop {
            if self.decoder.receive_frame(decoded).is_ok() {
                self.position += 1;
                return Ok(true);
            }
            if self.eof_sent {
                return Ok(false);
            }
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than expected")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
