use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::builtin::InferencePlaceholder;
use super::motion::MotionProcessor;
use super::{FrameProcessor, ProcessorSettings};
use crate::definition::ProcessingType;
use crate::error::PipelineError;

/// Builds a processor from its step settings.
pub type ProcessorFactory =
    Arc<dyn Fn(ProcessorSettings) -> Result<Box<dyn FrameProcessor>> + Send + Sync>;

/// Maps a step kind to the factory that builds its processor.
///
/// Populate it at startup, before any executor is constructed; executors only
/// read from it while building their processor chain.
#[derive(Clone)]
pub struct ProcessorRegistry {
    factories: HashMap<ProcessingType, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// Empty registry with no kinds registered.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with a factory for every built-in kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ProcessingType::MotionDetection, |settings| {
            Ok(Box::new(MotionProcessor::new(settings)?) as Box<dyn FrameProcessor>)
        });
        for kind in [
            ProcessingType::ObjectDetection,
            ProcessingType::FaceDetection,
            ProcessingType::LicensePlate,
            ProcessingType::CrowdCounting,
            ProcessingType::Custom,
        ] {
            registry.register(kind, move |settings| inference_processor(kind, settings));
        }
        registry
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: ProcessingType, factory: F)
    where
        F: Fn(ProcessorSettings) -> Result<Box<dyn FrameProcessor>> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Arc::new(factory)).is_some() {
            log::debug!("processor registry: replaced factory for {}", kind);
        }
    }

    pub fn contains(&self, kind: ProcessingType) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ProcessingType> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Build a processor for `kind`.
    pub fn create(
        &self,
        kind: ProcessingType,
        settings: ProcessorSettings,
    ) -> Result<Box<dyn FrameProcessor>, PipelineError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(PipelineError::UnknownProcessorKind(kind))?;
        factory(settings).map_err(|e| {
            PipelineError::config(
                kind.as_str(),
                format!("failed to construct processor: {:#}", e),
            )
        })
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(feature = "remote-inference")]
fn inference_processor(
    kind: ProcessingType,
    settings: ProcessorSettings,
) -> Result<Box<dyn FrameProcessor>> {
    if settings.endpoint.as_deref().is_some_and(is_http_endpoint) {
        return Ok(Box::new(super::remote::RemoteProcessor::new(kind, settings)?));
    }
    Ok(Box::new(InferencePlaceholder::new(kind, settings)))
}

/// Whether `uri` names an HTTP(S) inference service. Schemes compare
/// case-insensitively, as the loader accepts them.
#[cfg(any(feature = "remote-inference", test))]
fn is_http_endpoint(uri: &str) -> bool {
    url::Url::parse(uri).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

#[cfg(not(feature = "remote-inference"))]
fn inference_processor(
    kind: ProcessingType,
    settings: ProcessorSettings,
) -> Result<Box<dyn FrameProcessor>> {
    Ok(Box::new(InferencePlaceholder::new(kind, settings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::processor::ProcessingResult;

    struct CountingProcessor {
        calls: usize,
    }

    impl FrameProcessor for CountingProcessor {
        fn kind(&self) -> ProcessingType {
            ProcessingType::Custom
        }

        fn process(
            &mut self,
            _frame: &Frame,
            frame_id: u64,
            timestamp: f64,
        ) -> Result<ProcessingResult> {
            self.calls += 1;
            Ok(ProcessingResult::empty(self.kind(), frame_id, timestamp))
        }
    }

    #[test]
    fn builtins_cover_every_kind() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.kinds(), ProcessingType::ALL.to_vec());
        for kind in ProcessingType::ALL {
            let processor = registry
                .create(kind, ProcessorSettings::default())
                .unwrap();
            assert_eq!(processor.kind(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_reported() {
        let registry = ProcessorRegistry::new();
        let err = registry
            .create(ProcessingType::FaceDetection, ProcessorSettings::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::UnknownProcessorKind(ProcessingType::FaceDetection)
        ));
    }

    #[test]
    fn register_overrides_builtin() {
        let mut registry = ProcessorRegistry::with_builtins();
        registry.register(ProcessingType::Custom, |_settings| {
            Ok(Box::new(CountingProcessor { calls: 0 }) as Box<dyn FrameProcessor>)
        });
        let mut processor = registry
            .create(ProcessingType::Custom, ProcessorSettings::default())
            .unwrap();
        let frame = Frame::filled(2, 2, [0, 0, 0]).unwrap();
        let result = processor.process(&frame, 7, 1.5).unwrap();
        assert_eq!(result.frame_id, 7);
        assert!(result.detections.is_empty());
    }

    #[test]
    fn http_endpoints_match_any_scheme_case() {
        assert!(is_http_endpoint("http://localhost:9000"));
        assert!(is_http_endpoint("HTTPS://infer.example.com/v1"));
        assert!(!is_http_endpoint("grpc://localhost:50051"));
        assert!(!is_http_endpoint("not a uri"));
    }

    #[test]
    fn factory_failure_is_a_configuration_error() {
        let mut registry = ProcessorRegistry::new();
        registry.register(ProcessingType::ObjectDetection, |_settings| {
            Err(anyhow::anyhow!("model file missing"))
        });
        let err = registry
            .create(ProcessingType::ObjectDetection, ProcessorSettings::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("model file missing"));
    }
}
