//! Hardware video encoder contract: `create`/`create_frame`/`submit_frame`/
//! `map_frame`/`unmap_frame`/`destroy_frame`, a configuration-change rule
//! (bitrate/quality/mode changes force an IDR with parameter sets
//! prepended), and an intra-refresh period.
//!
//! The original backs this with NVENC/CUDA/Vulkan interop, entirely out of
//! scope here (GPU/codec plumbing). This crate keeps the contract and
//! backs it with a GStreamer `appsrc ! videoconvert ! enc ! parse ! appsink`
//! pipeline, choosing a hardware encoder element first and falling back to
//! a software one.

use std::sync::mpsc;

use depth_stream_proto::{VideoCodec, VideoCompressionMode};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("gstreamer init failed: {0}")]
    Init(#[from] gst::glib::Error),
    #[error("no encoder element available for {0:?} (tried: {1:?})")]
    NoEncoderAvailable(VideoCodec, Vec<&'static str>),
    #[error("failed to build pipeline element: {0}")]
    Element(#[from] gst::glib::BoolError),
    #[error("failed to link pipeline elements")]
    Link,
    #[error("pipeline state change failed: {0}")]
    StateChange(#[from] gst::StateChangeError),
    #[error("failed to push frame into encoder: {0}")]
    Push(String),
    #[error("failed to pull encoded sample: {0}")]
    Pull(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodec,
    pub chroma_subsampling: bool,
    pub mode: VideoCompressionMode,
    pub frame_rate: u32,
    pub bitrate: f64,
    pub quality: f64,
    /// Force an IDR every N frames regardless of encoder decisions,
    /// bounding how long a client can be stuck after packet loss.
    pub intra_refresh_period: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            codec: VideoCodec::H265,
            chroma_subsampling: true,
            mode: VideoCompressionMode::ConstantQuality,
            frame_rate: 10,
            bitrate: 1.0,
            quality: 0.5,
            intra_refresh_period: 120,
        }
    }
}

/// One encoded access unit, ready to go out over the wire as a
/// [`LayerResponseHeader`](depth_stream_proto::LayerResponseHeader) image
/// blob.
#[derive(Debug, Clone)]
pub struct EncoderFrame {
    pub data: Vec<u8>,
    pub time_encode: f32,
}

/// Candidate GStreamer element names per codec, hardware-first.
fn candidate_elements(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::H264 => &["nvh264enc", "vaapih264enc", "x264enc"],
        VideoCodec::H265 => &["nvh265enc", "vaapih265enc", "x265enc"],
        VideoCodec::Av1 => &["nvav1enc", "vaapiav1enc", "av1enc"],
    }
}

fn parser_element(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "h264parse",
        VideoCodec::H265 => "h265parse",
        VideoCodec::Av1 => "av1parse",
    }
}

pub struct Encoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    encoder_element: gst::Element,
    encoder_type: &'static str,
    codec: VideoCodec,
    resolution: (u32, u32),
    mode: VideoCompressionMode,
    frame_rate: u32,
    bitrate: f64,
    quality: f64,
    frame_counter: u32,
    intra_refresh_period: u32,
    frame_rx: mpsc::Receiver<Vec<u8>>,
}

impl Encoder {
    pub fn new(config: &EncoderConfig) -> Result<Self, EncoderError> {
        gst::init()?;

        let candidates = candidate_elements(config.codec);
        let mut encoder_element = None;
        for &name in candidates {
            if let Ok(element) = gst::ElementFactory::make(name).build() {
                encoder_element = Some((name, element));
                break;
            }
        }
        let (encoder_type, encoder_element) = encoder_element
            .ok_or_else(|| EncoderError::NoEncoderAvailable(config.codec, candidates.to_vec()))?;

        apply_mode(&encoder_element, encoder_type, config.mode, config.bitrate, config.quality);

        let pipeline = gst::Pipeline::new();

        let caps = gst_video::VideoCapsBuilder::new()
            .format(if config.chroma_subsampling {
                gst_video::VideoFormat::Nv12
            } else {
                gst_video::VideoFormat::Y444
            })
            .width(config.width as i32)
            .height(config.height as i32)
            .framerate(gst::Fraction::new(config.frame_rate as i32, 1))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert").build()?;
        let parse = gst::ElementFactory::make(parser_element(config.codec)).build()?;
        let appsink = gst_app::AppSink::builder().sync(false).build();

        pipeline.add_many([
            appsrc.upcast_ref::<gst::Element>(),
            &videoconvert,
            &encoder_element,
            &parse,
            appsink.upcast_ref::<gst::Element>(),
        ])?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &videoconvert,
            &encoder_element,
            &parse,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|_| EncoderError::Link)?;

        let (tx, rx) = mpsc::channel();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let _ = tx.send(map.as_slice().to_vec());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gst::State::Playing)?;

        Ok(Self {
            pipeline,
            appsrc,
            encoder_element,
            encoder_type,
            codec: config.codec,
            resolution: (config.width, config.height),
            mode: config.mode,
            frame_rate: config.frame_rate,
            bitrate: config.bitrate,
            quality: config.quality,
            frame_counter: 0,
            intra_refresh_period: config.intra_refresh_period,
            frame_rx: rx,
        })
    }

    pub fn encoder_type(&self) -> &'static str {
        self.encoder_type
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Marks the encoder's next output as an IDR; per the original's
    /// config-changed rule, called whenever `set_mode`/`set_bitrate`/
    /// `set_quality` change a live parameter, and on session setup.
    pub fn force_keyframe(&mut self) {
        let event = gst::event::CustomUpstream::new(gst::Structure::builder("GstForceKeyUnit").build());
        self.encoder_element.send_event(event);
    }

    pub fn set_mode(&mut self, mode: VideoCompressionMode) {
        self.mode = mode;
        apply_mode(&self.encoder_element, self.encoder_type, mode, self.bitrate, self.quality);
        self.force_keyframe();
    }

    pub fn set_bitrate(&mut self, bitrate: f64) {
        self.bitrate = bitrate;
        apply_mode(&self.encoder_element, self.encoder_type, self.mode, bitrate, self.quality);
        self.force_keyframe();
    }

    pub fn set_quality(&mut self, quality: f64) {
        self.quality = quality;
        apply_mode(&self.encoder_element, self.encoder_type, self.mode, self.bitrate, quality);
        self.force_keyframe();
    }

    pub fn set_frame_rate(&mut self, frame_rate: u32) {
        self.frame_rate = frame_rate;
    }

    /// Pushes one raw frame (already in the negotiated pixel format) into
    /// the pipeline. Returns the encoded access unit if one is ready,
    /// mirroring NVENC's async-completion-polling contract: encoders may
    /// buffer several frames before the first output appears.
    pub fn encode_frame(&mut self, data: &[u8]) -> Result<Option<EncoderFrame>, EncoderError> {
        let start = std::time::Instant::now();

        if self.intra_refresh_period > 0 && self.frame_counter % self.intra_refresh_period == 0 {
            self.force_keyframe();
        }
        self.frame_counter = self.frame_counter.wrapping_add(1);

        let mut buffer = gst::Buffer::with_size(data.len()).map_err(|e| EncoderError::Push(e.to_string()))?;
        {
            let buffer_mut = buffer.get_mut().expect("freshly allocated buffer is uniquely owned");
            let mut map = buffer_mut.map_writable().map_err(|e| EncoderError::Push(e.to_string()))?;
            map.copy_from_slice(data);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Push(e.to_string()))?;

        match self.frame_rx.try_recv() {
            Ok(encoded) => Ok(Some(EncoderFrame {
                data: encoded,
                time_encode: start.elapsed().as_secs_f32() * 1000.0,
            })),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(EncoderError::Pull("appsink disconnected".into())),
        }
    }

    /// Checks for an access unit from a frame pushed by an earlier
    /// `encode_frame` call, without pushing new input. Used by the session
    /// loop's completion poll once a frame has already been submitted.
    pub fn poll_frame(&mut self) -> Result<Option<EncoderFrame>, EncoderError> {
        match self.frame_rx.try_recv() {
            Ok(encoded) => Ok(Some(EncoderFrame {
                data: encoded,
                time_encode: 0.0,
            })),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(EncoderError::Pull("appsink disconnected".into())),
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn apply_mode(
    encoder: &gst::Element,
    encoder_type: &str,
    mode: VideoCompressionMode,
    bitrate: f64,
    quality: f64,
) {
    match mode {
        VideoCompressionMode::ConstantBitrate => {
            let kbps = (bitrate * 1000.0).round() as u32;
            if encoder.has_property("bitrate") {
                encoder.set_property("bitrate", kbps);
            }
            if encoder_type.starts_with('x') && encoder.has_property("pass") {
                encoder.set_property_from_str("pass", "cbr");
            }
        }
        VideoCompressionMode::ConstantQuality => {
            let cq = (quality * 51.0).round() as i32;
            if encoder.has_property("quantizer") {
                encoder.set_property("quantizer", cq);
            } else if encoder.has_property("qp") {
                encoder.set_property("qp", cq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_elements_prefer_hardware_first() {
        let candidates = candidate_elements(VideoCodec::H264);
        assert_eq!(candidates[0], "nvh264enc");
        assert_eq!(candidates.last(), Some(&"x264enc"));
    }

    #[test]
    fn default_config_matches_the_original_defaults() {
        let config = EncoderConfig::default();
        assert_eq!(config.codec, VideoCodec::H265);
        assert_eq!(config.mode, VideoCompressionMode::ConstantQuality);
        assert_eq!(config.frame_rate, 10);
    }
}
