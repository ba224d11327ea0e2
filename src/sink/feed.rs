use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use url::Url;

use super::FrameEvent;
use crate::definition::{Params, StreamOutput};
use crate::error::PipelineError;

pub const DEFAULT_MAX_ITEMS: usize = 100;
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FEED_PATH: &str = "/parking/feed";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_IMAGES_DIR: &str = "static/images";
pub const IMAGES_ROUTE: &str = "/static/images";
const DEFAULT_TITLE: &str = "Pipeline Events";
const DEFAULT_DESCRIPTION: &str = "Frame events published by the monitoring pipeline";
const RSS_CONTENT_TYPE: &str = "application/rss+xml";

/// Feed and HTTP settings derived from a pipeline's output declaration.
#[derive(Clone, Debug)]
pub struct FeedSettings {
    pub title: String,
    pub description: String,
    /// Channel link (the declared output URI).
    pub link: String,
    pub max_items: usize,
    pub update_interval_secs: u64,
    /// Path the feed is served on.
    pub feed_path: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Prefix for thumbnail URLs, e.g. `http://events.example.com:8080`.
    pub public_base_url: String,
    pub images_dir: PathBuf,
    pub content_type: String,
}

impl FeedSettings {
    /// Params honoured: `title`, `description`, `max_items`, `update_interval`,
    /// `bind_addr`, `images_dir`, `content_type`.
    pub fn from_output(output: &StreamOutput) -> Result<Self, PipelineError> {
        let url = Url::parse(&output.uri)
            .map_err(|e| PipelineError::config("output.uri", e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| PipelineError::config("output.uri", "missing host"))?
            .to_string();
        // `Url` drops a port equal to the scheme default, so read it back
        // from the authority as written.
        let port = url
            .port()
            .or_else(|| authority_port(&output.uri))
            .unwrap_or(DEFAULT_PORT);
        let feed_path = match url.path() {
            "" | "/" => DEFAULT_FEED_PATH.to_string(),
            path => path.to_string(),
        };
        let params = &output.params;

        let max_items = match positive_int(params, "max_items")? {
            Some(n) => n as usize,
            None => DEFAULT_MAX_ITEMS,
        };
        let update_interval_secs =
            positive_int(params, "update_interval")?.unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);

        let content_type = match string_param(params, "content_type")? {
            Some(ct) => ct,
            None => match output.format.to_ascii_lowercase().as_str() {
                "xml" | "rss" => RSS_CONTENT_TYPE.to_string(),
                other => {
                    return Err(PipelineError::config(
                        "output.format",
                        format!("unsupported feed format '{}'; expected xml or rss", other),
                    ))
                }
            },
        };

        Ok(Self {
            title: string_param(params, "title")?.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: string_param(params, "description")?
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            link: output.uri.clone(),
            max_items,
            update_interval_secs,
            feed_path,
            bind_addr: string_param(params, "bind_addr")?
                .unwrap_or_else(|| format!("{}:{}", host, port)),
            public_base_url: format!("{}://{}:{}", url.scheme(), host, port),
            images_dir: string_param(params, "images_dir")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGES_DIR)),
            content_type,
        })
    }

    pub fn image_url(&self, file_name: &str) -> String {
        format!("{}{}/{}", self.public_base_url, IMAGES_ROUTE, file_name)
    }

    /// RSS `<ttl>` in whole minutes, at least one.
    pub fn ttl_minutes(&self) -> u64 {
        self.update_interval_secs.div_ceil(60).max(1)
    }
}

/// Port spelled out in the authority of `uri`, if any.
fn authority_port(uri: &str) -> Option<u16> {
    let rest = &uri[uri.find("://")? + 3..];
    let authority = &rest[..rest.find(['/', '?', '#']).unwrap_or(rest.len())];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host.rsplit_once(':')?.1.parse().ok()
}

fn string_param(params: &Params, key: &str) -> Result<Option<String>, PipelineError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| PipelineError::config(format!("output.params.{}", key), "expected a string")),
    }
}

fn positive_int(params: &Params, key: &str) -> Result<Option<u64>, PipelineError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(PipelineError::config(
                format!("output.params.{}", key),
                "expected a positive integer",
            )),
        },
    }
}

/// Render an RSS 2.0 document. `events` must be ordered newest first.
pub fn render_rss<'a>(
    settings: &FeedSettings,
    events: impl IntoIterator<Item = &'a FrameEvent>,
    last_modified: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("rss").with_attributes([("version", "2.0")]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &settings.title)?;
    text_element(&mut writer, "link", &settings.link)?;
    text_element(&mut writer, "description", &settings.description)?;
    text_element(&mut writer, "language", "en")?;
    text_element(&mut writer, "lastBuildDate", &last_modified.to_rfc2822())?;
    text_element(&mut writer, "ttl", &settings.ttl_minutes().to_string())?;

    for event in events {
        write_item(&mut writer, event)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;
    Ok(writer.into_inner().into_inner())
}

fn write_item(writer: &mut Writer<Cursor<Vec<u8>>>, event: &FrameEvent) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;
    text_element(writer, "title", &item_title(event))?;
    writer.write_event(Event::Start(
        BytesStart::new("guid").with_attributes([("isPermaLink", "false")]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(&event_guid(event))))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;
    text_element(writer, "description", &item_description(event))?;
    if let Some(published) = event_time(event.timestamp) {
        text_element(writer, "pubDate", &published.to_rfc2822())?;
    }
    if let Some(url) = &event.image_url {
        writer.write_event(Event::Empty(BytesStart::new("enclosure").with_attributes([
            ("url", url.as_str()),
            ("length", "0"),
            ("type", "image/jpeg"),
        ])))?;
    }
    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn event_guid(event: &FrameEvent) -> String {
    format!("frame-{}-{}", event.frame_id, (event.timestamp * 1000.0).round() as i64)
}

fn event_time(timestamp: f64) -> Option<DateTime<Utc>> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

fn item_title(event: &FrameEvent) -> String {
    let mut classes: Vec<&str> = event
        .results
        .iter()
        .flat_map(|r| r.detections.iter().map(|d| d.class_name.as_str()))
        .collect();
    classes.sort_unstable();
    classes.dedup();
    if !classes.is_empty() {
        format!("Detected: {}", classes.join(", "))
    } else if event.motion_detected == Some(true) {
        "Motion detected".to_string()
    } else {
        "Frame event".to_string()
    }
}

fn item_description(event: &FrameEvent) -> String {
    let mut lines = vec![
        format!("Frame size: {}", event.dimensions),
        format!("Brightness level: {:.2}", event.brightness),
    ];
    if let Some(motion) = event.motion_detected {
        lines.push(format!("Motion detected: {}", motion));
    }
    for result in &event.results {
        for det in &result.detections {
            lines.push(format!(
                "{}: {} ({:.2}) at [{:.0}, {:.0}, {:.0}x{:.0}]",
                result.processor_kind,
                det.class_name,
                det.confidence,
                det.bbox.x,
                det.bbox.y,
                det.bbox.width,
                det.bbox.height
            ));
        }
    }
    if let Some(url) = &event.image_url {
        lines.push(format!("<img src=\"{}\" />", url));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ProcessingType;
    use crate::frame::FrameDimensions;
    use crate::processor::{BoundingBox, Detection, ProcessingResult};
    use serde_json::json;

    fn output(uri: &str, params: serde_json::Value) -> StreamOutput {
        StreamOutput {
            uri: uri.to_string(),
            protocol: "rss".to_string(),
            format: "xml".to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn event(frame_id: u64, timestamp: f64) -> FrameEvent {
        FrameEvent {
            frame_id,
            timestamp,
            dimensions: FrameDimensions {
                width: 640,
                height: 480,
                channels: 3,
            },
            brightness: 42.5,
            motion_detected: Some(true),
            results: Vec::new(),
            image_url: Some("http://localhost:8080/static/images/f.jpg".to_string()),
        }
    }

    #[test]
    fn settings_from_output_params() {
        let settings = FeedSettings::from_output(&output(
            "http://events.example.com/parking/feed",
            json!({"max_items": 2, "update_interval": 90, "title": "Lot", "bind_addr": "0.0.0.0:9000"}),
        ))
        .unwrap();
        assert_eq!(settings.max_items, 2);
        assert_eq!(settings.ttl_minutes(), 2);
        assert_eq!(settings.title, "Lot");
        assert_eq!(settings.feed_path, "/parking/feed");
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");
        assert_eq!(
            settings.image_url("a.jpg"),
            "http://events.example.com:8080/static/images/a.jpg"
        );
        assert_eq!(settings.content_type, "application/rss+xml");
    }

    #[test]
    fn settings_defaults() {
        let settings = FeedSettings::from_output(&output("http://localhost", json!({}))).unwrap();
        assert_eq!(settings.max_items, DEFAULT_MAX_ITEMS);
        assert_eq!(settings.feed_path, "/parking/feed");
        assert_eq!(settings.bind_addr, "localhost:8080");
        assert_eq!(settings.ttl_minutes(), 1);
    }

    #[test]
    fn explicit_default_port_is_kept() {
        let settings =
            FeedSettings::from_output(&output("http://localhost:80/feed", json!({}))).unwrap();
        assert_eq!(settings.bind_addr, "localhost:80");
        assert_eq!(
            settings.image_url("a.jpg"),
            "http://localhost:80/static/images/a.jpg"
        );

        let settings =
            FeedSettings::from_output(&output("http://user:pw@[::1]:80/feed", json!({}))).unwrap();
        assert!(settings.bind_addr.ends_with(":80"));
        assert_eq!(authority_port("http://localhost/feed"), None);
    }

    #[test]
    fn invalid_params_are_configuration_errors() {
        let err = FeedSettings::from_output(&output("http://localhost", json!({"max_items": 0})))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { ref field, .. } if field == "output.params.max_items"));
    }

    #[test]
    fn renders_items_with_escaped_markup() {
        let settings = FeedSettings::from_output(&output(
            "http://localhost:8080/feed",
            json!({"title": "Lot & Garage"}),
        ))
        .unwrap();
        let mut e = event(7, 1_700_000_000.5);
        e.results.push(ProcessingResult {
            processor_kind: ProcessingType::ObjectDetection,
            frame_id: 7,
            timestamp: 1_700_000_000.5,
            detections: vec![Detection {
                class_name: "car".to_string(),
                confidence: 0.91,
                bbox: BoundingBox {
                    x: 10.0,
                    y: 20.0,
                    width: 30.0,
                    height: 40.0,
                },
                additional_data: None,
            }],
        });
        let last = event_time(1_700_000_001.0).unwrap();
        let xml = String::from_utf8(render_rss(&settings, [&e], last).unwrap()).unwrap();

        assert!(xml.contains("<rss version=\"2.0\">"));
        assert!(xml.contains("<title>Lot &amp; Garage</title>"));
        assert!(xml.contains("<title>Detected: car</title>"));
        assert!(xml.contains("object_detection: car (0.91)"));
        assert!(xml.contains("&lt;img src="));
        assert!(xml.contains("<guid isPermaLink=\"false\">frame-7-1700000000500</guid>"));
        assert!(xml.contains("<pubDate>Tue, 14 Nov 2023 22:13:20 +0000</pubDate>"));
        assert!(xml.contains(
            "<enclosure url=\"http://localhost:8080/static/images/f.jpg\" length=\"0\" type=\"image/jpeg\"/>"
        ));
    }
}
