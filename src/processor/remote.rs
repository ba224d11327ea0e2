#![cfg(feature = "remote-inference")]

use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use serde::Deserialize;
use url::Url;

use super::{BoundingBox, Detection, FrameProcessor, ProcessingResult, ProcessorSettings};
use crate::definition::{Params, ProcessingType};
use crate::frame::Frame;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RemoteDetection>,
}

#[derive(Debug, Deserialize)]
struct RemoteDetection {
    class_name: String,
    confidence: f32,
    bbox: RemoteBox,
    #[serde(default)]
    additional_data: Option<Params>,
}

#[derive(Debug, Deserialize)]
struct RemoteBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// Processor that delegates inference to an HTTP detection service.
///
/// Each frame is JPEG-encoded and POSTed to `<endpoint>/detect/<kind>` with
/// `model`, `confidence` and JSON `params` in the query string. The service
/// answers `{"detections": [{class_name, confidence, bbox{x,y,width,height}}]}`.
/// Detections below the configured confidence are dropped locally as well.
pub struct RemoteProcessor {
    kind: ProcessingType,
    url: Url,
    confidence: f32,
    agent: ureq::Agent,
}

impl RemoteProcessor {
    pub fn new(kind: ProcessingType, settings: ProcessorSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("remote processor requires a processing endpoint"))?;
        let mut url = Url::parse(endpoint).context("parse processing endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("processing endpoint cannot carry a path"))?
            .pop_if_empty()
            .extend(["detect", kind.as_str()]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(model) = &settings.model_path {
                query.append_pair("model", model);
            }
            query.append_pair("confidence", &settings.confidence.to_string());
            if !settings.params.is_empty() {
                query.append_pair("params", &serde_json::to_string(&settings.params)?);
            }
        }
        log::info!("{} processor: remote inference via {}", kind, redact(&url));
        Ok(Self {
            kind,
            url,
            confidence: settings.confidence,
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        })
    }

    fn encode(frame: &Frame) -> Result<Vec<u8>> {
        let image = frame.to_image()?;
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, UPLOAD_JPEG_QUALITY)
            .encode_image(&image)
            .context("encode frame for upload")?;
        Ok(out.into_inner())
    }
}

impl FrameProcessor for RemoteProcessor {
    fn kind(&self) -> ProcessingType {
        self.kind
    }

    fn process(&mut self, frame: &Frame, frame_id: u64, timestamp: f64) -> Result<ProcessingResult> {
        let body = Self::encode(frame)?;
        let response: DetectResponse = self
            .agent
            .post(self.url.as_str())
            .set("Content-Type", "image/jpeg")
            .set("X-Frame-Id", &frame_id.to_string())
            .send_bytes(&body)
            .map_err(|e| anyhow!("detection service request failed: {}", e))?
            .into_json()
            .context("decode detection service response")?;

        let detections = response
            .detections
            .into_iter()
            .filter(|d| d.confidence >= self.confidence)
            .map(|d| Detection {
                class_name: d.class_name,
                confidence: d.confidence.clamp(0.0, 1.0),
                bbox: BoundingBox {
                    x: d.bbox.x,
                    y: d.bbox.y,
                    width: d.bbox.width,
                    height: d.bbox.height,
                },
                additional_data: d.additional_data,
            })
            .collect();

        Ok(ProcessingResult {
            processor_kind: self.kind,
            frame_id,
            timestamp,
            detections,
        })
    }
}

fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let _ = shown.set_password(None);
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_detect_url_from_endpoint() {
        let mut params = Params::new();
        params.insert("region".into(), serde_json::json!("eu"));
        let settings = ProcessorSettings {
            model_path: Some("plate-recognizer-v2".into()),
            confidence: 0.7,
            params,
            endpoint: Some("http://ai.local:8500/".into()),
        };
        let processor = RemoteProcessor::new(ProcessingType::LicensePlate, settings).unwrap();
        assert_eq!(processor.url.path(), "/detect/license_plate");
        let query: Vec<(String, String)> = processor.url.query_pairs().into_owned().collect();
        assert!(query.contains(&("model".into(), "plate-recognizer-v2".into())));
        assert!(query.contains(&("confidence".into(), "0.7".into())));
        assert!(query.contains(&("params".into(), r#"{"region":"eu"}"#.into())));
    }
}
