use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::{
    agents::{AgentRegistry, AgentRole},
    config::PipelineConfig,
    errors::DecorateError,
    extraction,
    models::{ContentBlock, DecorationResult},
    util::{StoredUpload, UploadStore},
    validation::{self, Gate, INDOOR_SCENE_QUESTION, ValidationVerdict},
};

type Outcome<T> = std::result::Result<T, DecorateError>;

/// Photo as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct DecorationRequest {
    pub image: UploadedImage,
    pub prompt: Option<String>,
}

/// Runs the decoration pipeline: ingest, image gate, prompt gate, plan, generate, extract.
pub struct Decorator {
    registry: Arc<AgentRegistry>,
    uploads: UploadStore,
    pipeline: PipelineConfig,
}

impl Decorator {
    pub fn new(registry: Arc<AgentRegistry>, uploads: UploadStore, pipeline: PipelineConfig) -> Self {
        Self {
            registry,
            uploads,
            pipeline,
        }
    }

    pub async fn decorate(&self, request: DecorationRequest) -> Outcome<DecorationResult> {
        let DecorationRequest { image, prompt } = request;
        let prompt = prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty());

        // The stored file lives exactly as long as `upload`.
        let upload = self.ingest(&image).await?;
        let outcome = self.run(&upload, prompt).await;

        match &outcome {
            Ok(_) => info!(target: "pipeline", path = ?upload.path(), "decoration finished"),
            Err(err) if err.is_client_error() => {
                info!(target: "pipeline", reason = %err, "request rejected")
            }
            Err(err) => error!(target: "pipeline", error = %err, prompt = ?prompt, "decoration failed"),
        }

        outcome
    }

    async fn ingest(&self, image: &UploadedImage) -> Outcome<StoredUpload> {
        let filename = image
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DecorateError::invalid_input("No filename provided"))?;

        if image.data.is_empty() {
            return Err(DecorateError::invalid_input("Uploaded image is empty"));
        }

        let upload = self
            .uploads
            .persist(filename, image.content_type.as_deref(), &image.data)
            .await
            .map_err(|err| {
                error!(target: "pipeline", error = ?err, "failed to store upload");
                DecorateError::from(err)
            })?;

        info!(
            target: "pipeline",
            path = ?upload.path(),
            mime_type = upload.mime_type(),
            "saved uploaded image"
        );
        Ok(upload)
    }

    async fn run(&self, upload: &StoredUpload, prompt: Option<&str>) -> Outcome<DecorationResult> {
        let image = || ContentBlock::image_path(upload.path(), upload.subtype().map(str::to_string));

        let verdict = validation::evaluate(
            self.registry.agent(AgentRole::ImageValidator)?,
            Gate::Image,
            INDOOR_SCENE_QUESTION,
            image(),
        )
        .await?;
        self.enforce(Gate::Image, verdict)?;

        if let Some(prompt) = prompt {
            let verdict = validation::evaluate(
                self.registry.agent(AgentRole::TextValidator)?,
                Gate::Prompt,
                &validation::prompt_relevance_question(prompt),
                image(),
            )
            .await?;
            self.enforce(Gate::Prompt, verdict)?;
        }

        let plan = if self.pipeline.plan_decorations {
            let response = self
                .registry
                .agent(AgentRole::DecorationDescriber)?
                .run(&[ContentBlock::text(planning_message(prompt)), image()])
                .await?;
            let plan = response
                .primary_text()
                .map(str::trim)
                .filter(|plan| !plan.is_empty())
                .map(str::to_string);
            info!(target: "pipeline", plan = ?plan, "decoration plan");
            plan
        } else {
            None
        };

        let instruction = generation_instruction(prompt, plan.as_deref());
        let response = self
            .registry
            .agent(AgentRole::DecorationGenerator)?
            .run(&[ContentBlock::text(instruction), image()])
            .await?;

        info!(
            target: "pipeline",
            blocks = response.content.len(),
            has_image = response.primary_image().is_some(),
            stop_reason = ?response.stop_reason,
            "generation finished"
        );

        let original = upload.read().await?;
        let result = extraction::finalize(&response, &original);
        if response.primary_image().is_none() {
            warn!(target: "pipeline", "no image in generation response, returning original");
        }
        Ok(result)
    }

    fn enforce(&self, gate: Gate, verdict: ValidationVerdict) -> Outcome<()> {
        if verdict.passed {
            return Ok(());
        }

        if self.pipeline.enforce_validation {
            return Err(DecorateError::ValidationFailed {
                gate,
                verdict: verdict.raw_text,
            });
        }

        warn!(
            target: "pipeline",
            %gate,
            verdict = %verdict.raw_text,
            "validation failed, continuing because enforcement is off"
        );
        Ok(())
    }
}

fn planning_message(prompt: Option<&str>) -> String {
    match prompt {
        Some(prompt) => format!(
            "Based on the user's request: '{}', describe the best Christmas decorations to add to this room. Be specific about placement and style. Keep it concise.",
            prompt
        ),
        None => "Analyze this room and describe the best Christmas decorations to add. Consider the room's style, lighting, and available spaces. Be specific about placement and style. Keep it concise.".to_string(),
    }
}

fn generation_instruction(prompt: Option<&str>, plan: Option<&str>) -> String {
    let mut instruction = match prompt {
        Some(prompt) => format!(
            "Add Christmas decorations to this image following the user's request: '{}'.",
            prompt
        ),
        None => "Add the Christmas decorations you judge best for this room.".to_string(),
    };

    if let Some(plan) = plan {
        instruction.push_str(" Decoration plan: ");
        instruction.push_str(plan);
    }

    instruction.push_str(" Make it festive, photorealistic, and high quality.");
    instruction
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use base64::{Engine as _, engine::general_purpose};

    use super::*;
    use crate::{
        config::AgentPrompts,
        extraction::FALLBACK_EXPLANATION,
        models::{ClientResponse, MediaReference, MediaSource},
        providers::scripted::ScriptedBackend,
    };

    struct Harness {
        _dir: tempfile::TempDir,
        uploads_dir: std::path::PathBuf,
        vision: Arc<ScriptedBackend>,
        image: Arc<ScriptedBackend>,
        decorator: Decorator,
    }

    async fn harness(
        vision: ScriptedBackend,
        image: ScriptedBackend,
        pipeline: PipelineConfig,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let uploads_dir = dir.path().join("uploads");
        let vision = Arc::new(vision);
        let image = Arc::new(image);
        let registry = AgentRegistry::with_backends(
            &AgentPrompts::default(),
            vision.clone(),
            image.clone(),
        );
        let uploads = UploadStore::new(uploads_dir.clone()).await.unwrap();

        Harness {
            _dir: dir,
            uploads_dir,
            vision,
            image,
            decorator: Decorator::new(Arc::new(registry), uploads, pipeline),
        }
    }

    fn request(prompt: Option<&str>) -> DecorationRequest {
        DecorationRequest {
            image: UploadedImage {
                filename: Some("room.png".to_string()),
                content_type: Some("image/png".to_string()),
                data: Bytes::from_static(b"original-photo"),
            },
            prompt: prompt.map(str::to_string),
        }
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    fn decorated(text: &str, image: &str) -> ClientResponse {
        ClientResponse::from_blocks(vec![
            ContentBlock::text(text),
            ContentBlock::image_base64(image),
        ])
    }

    #[tokio::test]
    async fn without_prompt_the_prompt_gate_is_skipped() {
        let h = harness(
            ScriptedBackend::new("vlm")
                .reply_text("YES, a living room.")
                .reply_text("A tree by the window."),
            ScriptedBackend::new("diffusion").reply(decorated("Added a tree.", "Zm9v")),
            PipelineConfig::default(),
        )
        .await;

        let result = h.decorator.decorate(request(None)).await.unwrap();

        assert_eq!(
            result,
            DecorationResult {
                image_base64: "Zm9v".to_string(),
                explanation: "Added a tree.".to_string(),
            }
        );

        let vision_calls = h.vision.calls();
        assert_eq!(vision_calls.len(), 2);
        assert_eq!(vision_calls[0].text(), INDOOR_SCENE_QUESTION);
        assert!(vision_calls[1].text().starts_with("Analyze this room"));

        let image_calls = h.image.calls();
        assert_eq!(image_calls.len(), 1);
        let instruction = image_calls[0].text();
        assert!(instruction.contains("you judge best"));
        assert!(instruction.contains("Decoration plan: A tree by the window."));
        match &image_calls[0].task_input[1] {
            ContentBlock::Media(MediaReference {
                source: MediaSource::Path(_),
                extension,
                ..
            }) => assert_eq!(extension.as_deref(), Some("png")),
            other => panic!("expected stored image reference, got {other:?}"),
        }

        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn prompt_gate_runs_before_generation() {
        let h = harness(
            ScriptedBackend::new("vlm")
                .reply_text("YES")
                .reply_text("Yes, garlands fit this room.")
                .reply_text("Garlands over the fireplace."),
            ScriptedBackend::new("diffusion").reply(decorated("Garlands added.", "YmFy")),
            PipelineConfig::default(),
        )
        .await;

        let result = h
            .decorator
            .decorate(request(Some("  add garlands  ")))
            .await
            .unwrap();
        assert_eq!(result.image_base64, "YmFy");

        let vision_calls = h.vision.calls();
        assert_eq!(vision_calls.len(), 3);
        assert_eq!(
            vision_calls[1].text(),
            validation::prompt_relevance_question("add garlands")
        );
        assert_eq!(
            vision_calls[1].system_prompt,
            AgentPrompts::default().validate_text
        );
        assert!(vision_calls[2].text().contains("'add garlands'"));
        assert!(h.image.calls()[0].text().contains("'add garlands'"));
    }

    #[tokio::test]
    async fn blank_prompt_counts_as_no_prompt() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("YES").reply_text("plan"),
            ScriptedBackend::new("diffusion").reply(decorated("ok", "Zm9v")),
            PipelineConfig::default(),
        )
        .await;

        h.decorator.decorate(request(Some("   "))).await.unwrap();
        assert_eq!(h.vision.calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_image_gate_rejects_and_cleans_up() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("NO, this is a beach."),
            ScriptedBackend::new("diffusion"),
            PipelineConfig::default(),
        )
        .await;

        let err = h.decorator.decorate(request(Some("add lights"))).await.unwrap_err();

        assert_eq!(err.to_string(), "Image validation failed: NO, this is a beach.");
        assert!(err.is_client_error());
        assert_eq!(h.vision.calls().len(), 1);
        assert!(h.image.calls().is_empty());
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn failed_prompt_gate_rejects_before_generation() {
        let h = harness(
            ScriptedBackend::new("vlm")
                .reply_text("YES, an office.")
                .reply_text("No. That request is about cooking."),
            ScriptedBackend::new("diffusion"),
            PipelineConfig::default(),
        )
        .await;

        let err = h
            .decorator
            .decorate(request(Some("bake a cake")))
            .await
            .unwrap_err();

        match err {
            DecorateError::ValidationFailed { gate, verdict } => {
                assert_eq!(gate, Gate::Prompt);
                assert_eq!(verdict, "No. That request is about cooking.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.image.calls().is_empty());
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn missing_generated_image_returns_original() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("YES").reply_text("plan"),
            ScriptedBackend::new("diffusion").reply_text("sorry, cannot"),
            PipelineConfig::default(),
        )
        .await;

        let result = h.decorator.decorate(request(None)).await.unwrap();

        assert_eq!(
            result.image_base64,
            general_purpose::STANDARD.encode(b"original-photo")
        );
        assert_eq!(result.explanation, "sorry, cannot");
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn empty_generation_uses_fixed_explanation() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("YES").reply_text("plan"),
            ScriptedBackend::new("diffusion").reply(ClientResponse::default()),
            PipelineConfig::default(),
        )
        .await;

        let result = h.decorator.decorate(request(None)).await.unwrap();
        assert_eq!(result.explanation, FALLBACK_EXPLANATION);
    }

    #[tokio::test]
    async fn quota_errors_are_rate_limited_in_any_state() {
        let h = harness(
            ScriptedBackend::new("vlm").fail("status RESOURCE_EXHAUSTED: quota exceeded"),
            ScriptedBackend::new("diffusion"),
            PipelineConfig::default(),
        )
        .await;
        let err = h.decorator.decorate(request(None)).await.unwrap_err();
        assert!(matches!(err, DecorateError::RateLimited));
        assert!(is_empty_dir(&h.uploads_dir));

        let h = harness(
            ScriptedBackend::new("vlm").reply_text("YES").reply_text("plan"),
            ScriptedBackend::new("diffusion").fail("RESOURCE_EXHAUSTED"),
            PipelineConfig::default(),
        )
        .await;
        let err = h.decorator.decorate(request(None)).await.unwrap_err();
        assert!(matches!(err, DecorateError::RateLimited));
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn unexpected_errors_carry_original_text() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("YES").fail("connection refused"),
            ScriptedBackend::new("diffusion"),
            PipelineConfig::default(),
        )
        .await;

        let err = h.decorator.decorate(request(None)).await.unwrap_err();

        match &err {
            DecorateError::Unexpected(text) => assert!(text.contains("connection refused")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_client_error());
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn missing_filename_or_content_is_invalid_input() {
        let h = harness(
            ScriptedBackend::new("vlm"),
            ScriptedBackend::new("diffusion"),
            PipelineConfig::default(),
        )
        .await;

        let mut no_name = request(None);
        no_name.image.filename = None;
        let err = h.decorator.decorate(no_name).await.unwrap_err();
        assert_eq!(err.to_string(), "No filename provided");

        let mut empty = request(None);
        empty.image.data = Bytes::new();
        let err = h.decorator.decorate(empty).await.unwrap_err();
        assert_eq!(err.to_string(), "Uploaded image is empty");

        assert!(h.vision.calls().is_empty());
        assert!(is_empty_dir(&h.uploads_dir));
    }

    #[tokio::test]
    async fn gates_only_warn_when_enforcement_is_off() {
        let h = harness(
            ScriptedBackend::new("vlm").reply_text("NO, it is a garden."),
            ScriptedBackend::new("diffusion").reply(decorated("done", "Zm9v")),
            PipelineConfig {
                enforce_validation: false,
                plan_decorations: false,
            },
        )
        .await;

        let result = h.decorator.decorate(request(None)).await.unwrap();

        assert_eq!(result.image_base64, "Zm9v");
        assert_eq!(h.vision.calls().len(), 1);
        let instruction = h.image.calls()[0].text();
        assert!(!instruction.contains("Decoration plan"));
    }

    #[test]
    fn instruction_restates_prompt_and_plan() {
        assert_eq!(
            generation_instruction(Some("add a wreath"), Some("Wreath on the door.")),
            "Add Christmas decorations to this image following the user's request: 'add a wreath'. Decoration plan: Wreath on the door. Make it festive, photorealistic, and high quality."
        );
        assert_eq!(
            generation_instruction(None, None),
            "Add the Christmas decorations you judge best for this room. Make it festive, photorealistic, and high quality."
        );
    }
}
