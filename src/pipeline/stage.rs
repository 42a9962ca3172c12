//! Table-driven definition of the presentation pipeline.
//!
//! Every step is a [`StageDescriptor`]: where to send the request, how to
//! build its payload, how long it may take, whether its failure is fatal and
//! which progress checkpoint it reaches. [`PRESENTATION_STAGES`] is the
//! process-wide ordered list the orchestrator runs.

use std::collections::HashMap;
use std::fmt;

use serde_json::json;

use crate::gateway::{Endpoint, Payload, ResponseBody, Service, TimeoutClass};

use super::job::{DocumentRef, JobSpec};

/// Paths the backend uses between stages. They are part of its contract.
const LAYOUT_DETAILS_PATH: &str = "data/metadata/layout_details.json";
const EXECUTION_JSON: &str = "execution_agent.json";
const PROCESSED_LAYOUT_JSON: &str = "processed_layout.json";

/// Where a stage sends its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Fixed(&'static str),
    /// Different endpoints for URL documents and uploaded files.
    BySource { url: &'static str, upload: &'static str },
}

/// Outputs of the stages that completed so far, keyed by stage name.
/// Optional stages that failed leave no entry.
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    outputs: HashMap<&'static str, ResponseBody>,
}

impl StageOutputs {
    pub fn insert(&mut self, stage: &'static str, body: ResponseBody) {
        self.outputs.insert(stage, body);
    }

    pub fn get(&self, stage: &str) -> Option<&ResponseBody> {
        self.outputs.get(stage)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Everything a payload builder may look at.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub job: &'a JobSpec,
    pub outputs: &'a StageOutputs,
}

/// Static definition of one pipeline step.
#[derive(Clone, Copy)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub route: Route,
    /// Status shown while the stage runs. `None` keeps the previous one.
    pub status: Option<&'static str>,
    /// Prefix of the error message when the stage fails.
    pub failure_summary: &'static str,
    /// Percent complete once the stage finishes.
    pub checkpoint: u8,
    pub timeout: TimeoutClass,
    pub required: bool,
    pub build: fn(&StageInput<'_>) -> Payload,
}

impl StageDescriptor {
    pub fn endpoint(&self, document: &DocumentRef) -> Endpoint {
        let path = match self.route {
            Route::Fixed(path) => path,
            Route::BySource { url, upload } => {
                if document.is_upload() {
                    upload
                } else {
                    url
                }
            }
        };
        Endpoint::post(Service::Backend, path)
    }

    pub fn payload(&self, input: &StageInput<'_>) -> Payload {
        (self.build)(input)
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("checkpoint", &self.checkpoint)
            .field("timeout", &self.timeout)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Form carrying the document, either as a URL field or as an uploaded file.
fn document_form(document: &DocumentRef, url_field: &str) -> Payload {
    match document {
        DocumentRef::Url(url) => Payload::form().text(url_field, url.as_str()),
        DocumentRef::Upload { file_name, bytes } => Payload::form().file("file", file_name, bytes.clone()),
    }
}

fn analyze_payload(input: &StageInput<'_>) -> Payload {
    document_form(&input.job.document, "url").text("student_level", input.job.level.code())
}

fn template_payload(input: &StageInput<'_>) -> Payload {
    Payload::form().text("template_name", input.job.template.as_str())
}

fn placeholders_payload(_: &StageInput<'_>) -> Payload {
    Payload::form().text("layout_extracted_path", LAYOUT_DETAILS_PATH)
}

fn ocr_payload(input: &StageInput<'_>) -> Payload {
    document_form(&input.job.document, "document_url")
}

fn save_figures_payload(input: &StageInput<'_>) -> Payload {
    let ocr_response = input
        .outputs
        .get("ocr-figure")
        .map(|body| body.value())
        .and_then(|value| value.get("ocr_response").cloned())
        .filter(|value| !value.is_null())
        .unwrap_or_else(|| json!({}));
    Payload::Json(ocr_response)
}

fn slide_data_payload(input: &StageInput<'_>) -> Payload {
    let job = input.job;
    let form = Payload::form()
        .text("student_level", job.level.prompt_label())
        .text("document_url", job.document.as_str())
        .text("num_slides", job.slide_count.to_string());
    job.topics
        .iter()
        .fold(form, |form, topic| form.text("selected_topics", topic.as_str()))
}

fn empty_form(_: &StageInput<'_>) -> Payload {
    Payload::form()
}

fn generate_payload(input: &StageInput<'_>) -> Payload {
    Payload::form()
        .text("template_name", input.job.template.as_str())
        .text("execution_json_filename", EXECUTION_JSON)
        .text("output_ppt_filename", input.job.artifact_name.as_str())
        .text("processed_layout_filename", PROCESSED_LAYOUT_JSON)
}

/// The presentation pipeline, in execution order.
pub const PRESENTATION_STAGES: &[StageDescriptor] = &[
    StageDescriptor {
        name: "analyze",
        route: Route::BySource {
            url: "analyze/url",
            upload: "analyze/pdf",
        },
        status: Some("Analyzing prerequisites..."),
        failure_summary: "Document analysis failed",
        checkpoint: 10,
        timeout: TimeoutClass::Standard,
        required: true,
        build: analyze_payload,
    },
    StageDescriptor {
        name: "extract-template-layout",
        route: Route::Fixed("extract-template-layout"),
        status: Some("Processing template..."),
        failure_summary: "Template layout extraction failed",
        checkpoint: 20,
        timeout: TimeoutClass::Standard,
        required: true,
        build: template_payload,
    },
    StageDescriptor {
        name: "convert-placeholders",
        route: Route::Fixed("convert-placeholders"),
        status: None,
        failure_summary: "Placeholder conversion failed",
        checkpoint: 30,
        timeout: TimeoutClass::Standard,
        required: true,
        build: placeholders_payload,
    },
    StageDescriptor {
        name: "ocr-figure",
        route: Route::BySource {
            url: "ocr-figure-url",
            upload: "ocr-figure-pdf",
        },
        status: Some("Extracting figures from paper..."),
        failure_summary: "Figure extraction failed",
        checkpoint: 40,
        timeout: TimeoutClass::Standard,
        required: true,
        build: ocr_payload,
    },
    StageDescriptor {
        name: "save-figures",
        route: Route::Fixed("save-figures"),
        status: None,
        failure_summary: "Saving figures failed",
        checkpoint: 50,
        timeout: TimeoutClass::Standard,
        required: true,
        build: save_figures_payload,
    },
    StageDescriptor {
        name: "slide-data-gen",
        route: Route::Fixed("slide-data-gen"),
        status: Some("Creating slide content..."),
        failure_summary: "Slide content generation failed",
        checkpoint: 60,
        timeout: TimeoutClass::Extended,
        required: true,
        build: slide_data_payload,
    },
    StageDescriptor {
        name: "process-slides-data",
        route: Route::Fixed("process-slides-data"),
        status: Some("Processing slides..."),
        failure_summary: "Slide processing failed",
        checkpoint: 70,
        timeout: TimeoutClass::Standard,
        required: true,
        build: empty_form,
    },
    StageDescriptor {
        name: "enhance-slides",
        route: Route::Fixed("enhace-slides-agent"),
        status: Some("Enhancing slides..."),
        failure_summary: "Slide enhancement failed",
        checkpoint: 80,
        timeout: TimeoutClass::Standard,
        required: true,
        build: empty_form,
    },
    // Layout refinement. When it fails the renderer falls back to the
    // processed layout.
    StageDescriptor {
        name: "execution-agent-parsing",
        route: Route::Fixed("execution-agent-parsing"),
        status: Some("Designing your presentation..."),
        failure_summary: "Presentation design failed",
        checkpoint: 90,
        timeout: TimeoutClass::Extended,
        required: false,
        build: template_payload,
    },
    StageDescriptor {
        name: "generate-presentation",
        route: Route::Fixed("generate-presentation"),
        status: Some("Building your presentation..."),
        failure_summary: "Presentation generation failed",
        checkpoint: 95,
        timeout: TimeoutClass::Extended,
        required: true,
        build: generate_payload,
    },
];

/// Look up a stage of [`PRESENTATION_STAGES`] by name.
pub fn find_stage(name: &str) -> Option<&'static StageDescriptor> {
    PRESENTATION_STAGES.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::AudienceLevel;
    use std::sync::Arc;

    fn url_job() -> JobSpec {
        JobSpec::new(
            DocumentRef::Url("https://arxiv.org/pdf/1706.03762".into()),
            AudienceLevel::Phd,
            10,
            "basic",
        )
        .unwrap()
    }

    fn upload_job() -> JobSpec {
        JobSpec::new(
            DocumentRef::Upload {
                file_name: "attention.pdf".into(),
                bytes: Arc::from(b"%PDF-1.7".to_vec()),
            },
            AudienceLevel::Undergraduate,
            8,
            "modern",
        )
        .unwrap()
    }

    #[test]
    fn checkpoints_strictly_ascend_below_hundred() {
        let checkpoints: Vec<u8> = PRESENTATION_STAGES.iter().map(|s| s.checkpoint).collect();
        assert!(checkpoints.windows(2).all(|w| w[0] < w[1]), "{checkpoints:?}");
        assert!(checkpoints.iter().all(|c| *c < 100));
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = PRESENTATION_STAGES.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PRESENTATION_STAGES.len());
    }

    #[test]
    fn only_execution_parsing_is_optional() {
        let optional: Vec<_> = PRESENTATION_STAGES
            .iter()
            .filter(|s| !s.required)
            .map(|s| s.name)
            .collect();
        assert_eq!(optional, vec!["execution-agent-parsing"]);
    }

    #[test]
    fn expensive_stages_use_extended_timeout() {
        for name in ["slide-data-gen", "execution-agent-parsing", "generate-presentation"] {
            assert_eq!(find_stage(name).unwrap().timeout, TimeoutClass::Extended, "{name}");
        }
        assert_eq!(find_stage("analyze").unwrap().timeout, TimeoutClass::Standard);
    }

    #[test]
    fn routes_follow_document_source() {
        let analyze = find_stage("analyze").unwrap();
        let ocr = find_stage("ocr-figure").unwrap();
        assert_eq!(analyze.endpoint(&url_job().document).path, "analyze/url");
        assert_eq!(analyze.endpoint(&upload_job().document).path, "analyze/pdf");
        assert_eq!(ocr.endpoint(&url_job().document).path, "ocr-figure-url");
        assert_eq!(ocr.endpoint(&upload_job().document).path, "ocr-figure-pdf");
        assert_eq!(
            find_stage("enhance-slides").unwrap().endpoint(&url_job().document).path,
            "enhace-slides-agent"
        );
    }

    #[test]
    fn analyze_payload_for_url_and_upload() {
        let outputs = StageOutputs::default();
        let job = url_job();
        let payload = find_stage("analyze").unwrap().payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(payload.text_value("url"), Some("https://arxiv.org/pdf/1706.03762"));
        assert_eq!(payload.text_value("student_level"), Some("1"));

        let job = upload_job();
        let payload = find_stage("analyze").unwrap().payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(payload.text_value("url"), None);
        assert_eq!(payload.text_value("student_level"), Some("3"));
        match payload {
            Payload::Form(fields) => assert!(fields.iter().any(|f| matches!(
                f,
                crate::gateway::FormField::File { name, file_name, .. } if name == "file" && file_name == "attention.pdf"
            ))),
            other => panic!("expected form, got {other:?}"),
        }
    }

    #[test]
    fn save_figures_forwards_ocr_response() {
        let job = url_job();
        let mut outputs = StageOutputs::default();
        let stage = find_stage("save-figures").unwrap();

        let payload = stage.payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(payload, Payload::Json(json!({})));

        outputs.insert(
            "ocr-figure",
            ResponseBody::json_value(&json!({"ocr_response": {"pages": [{"index": 0}]}})),
        );
        let payload = stage.payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(payload, Payload::Json(json!({"pages": [{"index": 0}]})));
    }

    #[test]
    fn slide_data_sends_one_field_per_topic() {
        let outputs = StageOutputs::default();
        let stage = find_stage("slide-data-gen").unwrap();

        let job = url_job();
        let payload = stage.payload(&StageInput { job: &job, outputs: &outputs });
        assert!(payload.text_values("selected_topics").is_empty());
        assert_eq!(payload.text_value("student_level"), Some("phd researcher"));
        assert_eq!(payload.text_value("num_slides"), Some("10"));

        let job = url_job().with_topics(["Self-attention", "Positional encoding"]);
        let payload = stage.payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(
            payload.text_values("selected_topics"),
            vec!["Positional encoding", "Self-attention"]
        );
    }

    #[test]
    fn generate_payload_names_artifact() {
        let job = url_job().with_artifact_name("deck.pptx");
        let outputs = StageOutputs::default();
        let payload = find_stage("generate-presentation")
            .unwrap()
            .payload(&StageInput { job: &job, outputs: &outputs });
        assert_eq!(payload.text_value("template_name"), Some("basic"));
        assert_eq!(payload.text_value("output_ppt_filename"), Some("deck.pptx"));
        assert_eq!(payload.text_value("execution_json_filename"), Some(EXECUTION_JSON));
        assert_eq!(payload.text_value("processed_layout_filename"), Some(PROCESSED_LAYOUT_JSON));
    }
}
