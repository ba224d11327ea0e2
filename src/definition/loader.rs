use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use super::{
    validate_uri, Credentials, Params, PipelineDefinition, ProcessingNode, ProcessingStep,
    ProcessingType, StreamOutput, StreamSource, DEFAULT_CONFIDENCE,
};
use crate::error::PipelineError;

#[derive(Debug, Deserialize, Default)]
struct DocumentFile {
    pipelines: Option<Vec<PipelineFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineFile {
    name: Option<String>,
    source: Option<SourceFile>,
    processing: Option<ProcessingFile>,
    output: Option<OutputFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceFile {
    uri: Option<String>,
    protocol: Option<String>,
    credentials: Option<CredentialsFile>,
    params: Option<Params>,
}

#[derive(Deserialize, Default)]
struct CredentialsFile {
    username: Option<String>,
    password: Option<String>,
}

// Keeps passwords out of serde error messages and debug logs.
impl std::fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsFile")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProcessingFile {
    uri: Option<String>,
    protocol: Option<String>,
    steps: Option<Vec<StepFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct StepFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    model: Option<String>,
    confidence: Option<f64>,
    params: Option<Params>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputFile {
    uri: Option<String>,
    protocol: Option<String>,
    format: Option<String>,
    params: Option<Params>,
}

/// Parse a YAML pipeline document into validated definitions keyed by name.
///
/// All-or-nothing: the first invalid pipeline fails the whole document and
/// no definitions are returned.
pub fn load(text: &str) -> Result<BTreeMap<String, PipelineDefinition>, PipelineError> {
    let document: DocumentFile = serde_yaml::from_str(text)
        .map_err(|e| PipelineError::config("document", e.to_string()))?;
    let pipelines = required(document.pipelines, "pipelines")?;
    if pipelines.is_empty() {
        return Err(PipelineError::config(
            "pipelines",
            "at least one pipeline is required",
        ));
    }

    let mut names = HashSet::new();
    let mut definitions = BTreeMap::new();
    for (index, file) in pipelines.into_iter().enumerate() {
        let prefix = format!("pipelines[{}]", index);
        let definition = parse_pipeline(file, &prefix)?;
        if !names.insert(definition.name.clone()) {
            return Err(PipelineError::config(
                format!("{}.name", prefix),
                format!("duplicate pipeline name '{}'", definition.name),
            ));
        }
        definitions.insert(definition.name.clone(), definition);
    }
    Ok(definitions)
}

/// Read and parse a pipeline document from disk.
pub fn load_file(path: &Path) -> Result<BTreeMap<String, PipelineDefinition>, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(
            path.display().to_string(),
            format!("failed to read pipeline document: {}", e),
        )
    })?;
    load(&text)
}

fn parse_pipeline(file: PipelineFile, prefix: &str) -> Result<PipelineDefinition, PipelineError> {
    let name = required(file.name, &format!("{}.name", prefix))?;
    if name.trim().is_empty() {
        return Err(PipelineError::config(
            format!("{}.name", prefix),
            "pipeline name must not be empty",
        ));
    }

    let source_field = format!("{}.source", prefix);
    let source = required(file.source, &source_field)?;
    let processing_field = format!("{}.processing", prefix);
    let processing = required(file.processing, &processing_field)?;
    let output_field = format!("{}.output", prefix);
    let output = required(file.output, &output_field)?;

    Ok(PipelineDefinition {
        name,
        source: parse_source(source, &source_field)?,
        processing: parse_processing(processing, &processing_field)?,
        output: parse_output(output, &output_field)?,
    })
}

fn parse_source(file: SourceFile, prefix: &str) -> Result<StreamSource, PipelineError> {
    let uri = required_uri(file.uri, prefix)?;
    let protocol = required(file.protocol, &format!("{}.protocol", prefix))?;
    let credentials = match file.credentials {
        Some(creds) => Some(Credentials::new(
            required(creds.username, &format!("{}.credentials.username", prefix))?,
            creds.password.unwrap_or_default(),
        )),
        None => None,
    };
    Ok(StreamSource {
        uri,
        protocol,
        credentials,
        params: file.params.unwrap_or_default(),
    })
}

fn parse_processing(file: ProcessingFile, prefix: &str) -> Result<ProcessingNode, PipelineError> {
    let uri = required_uri(file.uri, prefix)?;
    let protocol = required(file.protocol, &format!("{}.protocol", prefix))?;
    let steps = required(file.steps, &format!("{}.steps", prefix))?
        .into_iter()
        .enumerate()
        .map(|(index, step)| parse_step(step, &format!("{}.steps[{}]", prefix, index)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ProcessingNode {
        uri,
        protocol,
        steps,
    })
}

fn parse_step(file: StepFile, prefix: &str) -> Result<ProcessingStep, PipelineError> {
    let type_field = format!("{}.type", prefix);
    let kind = required(file.kind, &type_field)?
        .parse::<ProcessingType>()
        .map_err(|reason| PipelineError::config(&type_field, reason))?;
    let model = required(file.model, &format!("{}.model", prefix))?;
    let confidence = match file.confidence {
        Some(value) if (0.0..=1.0).contains(&value) => value as f32,
        Some(value) => {
            return Err(PipelineError::config(
                format!("{}.confidence", prefix),
                format!("confidence {} is outside [0, 1]", value),
            ))
        }
        None => DEFAULT_CONFIDENCE,
    };
    Ok(ProcessingStep {
        kind,
        model,
        confidence,
        params: file.params.unwrap_or_default(),
    })
}

fn parse_output(file: OutputFile, prefix: &str) -> Result<StreamOutput, PipelineError> {
    Ok(StreamOutput {
        uri: required_uri(file.uri, prefix)?,
        protocol: required(file.protocol, &format!("{}.protocol", prefix))?,
        format: required(file.format, &format!("{}.format", prefix))?,
        params: file.params.unwrap_or_default(),
    })
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, PipelineError> {
    value.ok_or_else(|| PipelineError::config(field, "required field is missing"))
}

fn required_uri(value: Option<String>, prefix: &str) -> Result<String, PipelineError> {
    let field = format!("{}.uri", prefix);
    let uri = required(value, &field)?;
    if !validate_uri(&uri) {
        return Err(PipelineError::config(
            field,
            "expected scheme://[user:pass@]host[:port][/path] with scheme http, ftp, rtsp or grpc",
        ));
    }
    Ok(uri)
}
