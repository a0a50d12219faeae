use crate::error::{BackendError, QaError};
use crate::generation::{ApiKey, GenerationRequest, Generator};
use std::time::Duration;
use tracing::{debug, info};

/// What the model is told to reply when the context does not hold the answer.
pub const FALLBACK_ANSWER: &str = "answer not available in context.";

const PROMPT_INSTRUCTIONS: &str = "You are an expert assistant. Answer the question as accurately and precisely as possible using only the provided context.
If the answer is not contained in the context, respond with \"answer not available in context.\"";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub timeout: Duration,
}

pub fn build_prompt<S: AsRef<str>>(question: &str, context_chunks: &[S]) -> String {
    let context = context_chunks
        .iter()
        .map(|chunk| chunk.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{PROMPT_INSTRUCTIONS}\nContext:{context}\nQuestion:{question}\nAnswer:")
}

/// Whether `answer` is the model's "not in context" reply rather than an answer.
pub fn is_fallback_answer(answer: &str) -> bool {
    answer
        .trim()
        .trim_end_matches('.')
        .eq_ignore_ascii_case(FALLBACK_ANSWER.trim_end_matches('.'))
}

/// Asks `generator` to answer `question` from `context_chunks` alone. Called once;
/// failures are returned, never retried.
pub async fn compose_answer<G, S>(
    question: &str,
    context_chunks: &[S],
    generator: &G,
    settings: GenerationSettings,
    api_key: &ApiKey,
) -> Result<String, QaError>
where
    G: Generator + ?Sized,
    S: AsRef<str>,
{
    let request = GenerationRequest {
        prompt: build_prompt(question, context_chunks),
        temperature: settings.temperature,
        api_key: api_key.clone(),
    };
    debug!(
        generator = generator.name(),
        prompt_len = request.prompt.len(),
        context_chunks = context_chunks.len(),
        "composed prompt"
    );

    let response = tokio::time::timeout(settings.timeout, generator.generate(&request))
        .await
        .map_err(|_| {
            QaError::Generation(BackendError::timeout(
                generator.name(),
                format!("no answer within {}ms", settings.timeout.as_millis()),
            ))
        })?
        .map_err(QaError::Generation)?;

    let answer = response.first_text().ok_or_else(|| {
        QaError::Generation(BackendError::invalid_response(
            generator.name(),
            "response contained no text",
        ))
    })?;

    info!(
        generator = generator.name(),
        answer_len = answer.len(),
        fallback = is_fallback_answer(answer),
        "answer generated"
    );
    Ok(answer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;
    use crate::generation::GenerationResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const SETTINGS: GenerationSettings = GenerationSettings {
        temperature: 0.1,
        timeout: Duration::from_secs(5),
    };

    /// Answers only when the context mentions the asked-about word.
    #[derive(Default)]
    struct GroundedGenerator {
        prompts: Mutex<Vec<(String, f32)>>,
    }

    #[async_trait]
    impl Generator for GroundedGenerator {
        fn name(&self) -> &str {
            "grounded"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, BackendError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push((request.prompt.clone(), request.temperature));
            }
            let context = request
                .prompt
                .split("Context:")
                .nth(1)
                .and_then(|rest| rest.split("Question:").next())
                .unwrap_or_default();
            let text = if context.contains("Paris") {
                " The capital is Paris. "
            } else {
                FALLBACK_ANSWER
            };
            Ok(GenerationResponse::from_text(text))
        }
    }

    struct FixedGenerator(Result<GenerationResponse, BackendError>);

    #[async_trait]
    impl Generator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, BackendError> {
            self.0.clone()
        }
    }

    struct HangingGenerator;

    #[async_trait]
    impl Generator for HangingGenerator {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, BackendError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GenerationResponse::from_text("too late"))
        }
    }

    #[test]
    fn prompt_joins_chunks_with_blank_line() {
        let prompt = build_prompt("Who?", &["first chunk", "second chunk"]);
        assert!(prompt.contains("Context:first chunk\n\nsecond chunk\nQuestion:Who?\nAnswer:"));
        assert!(prompt.contains("respond with \"answer not available in context.\""));
    }

    #[test]
    fn fallback_detection_ignores_case_and_trailing_period() {
        assert!(is_fallback_answer("answer not available in context."));
        assert!(is_fallback_answer(" Answer not available in context "));
        assert!(!is_fallback_answer("The capital is Paris."));
    }

    #[tokio::test]
    async fn answers_from_context_with_low_temperature() {
        let generator = GroundedGenerator::default();
        let answer = compose_answer(
            "What is the capital?",
            &["France's capital is Paris."],
            &generator,
            SETTINGS,
            &ApiKey::new("key"),
        )
        .await
        .unwrap();

        assert_eq!(answer, "The capital is Paris.");
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].1, 0.1);
    }

    #[tokio::test]
    async fn irrelevant_context_yields_fallback_phrase() {
        let answer = compose_answer(
            "What is the capital of France?",
            &["Cats sleep most of the day.", "Dogs enjoy walks."],
            &GroundedGenerator::default(),
            SETTINGS,
            &ApiKey::new("key"),
        )
        .await
        .unwrap();

        assert_eq!(answer, FALLBACK_ANSWER);
        assert!(is_fallback_answer(&answer));
    }

    #[tokio::test]
    async fn empty_output_is_a_generation_error() {
        let generator = FixedGenerator(Ok(GenerationResponse::from_text("   ")));
        let result = compose_answer("q", &["c"], &generator, SETTINGS, &ApiKey::new("key")).await;

        assert!(matches!(
            result,
            Err(QaError::Generation(ref error)) if error.kind == BackendErrorKind::InvalidResponse
        ));
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced_unchanged() {
        let generator = FixedGenerator(Err(BackendError::new(
            "fixed",
            BackendErrorKind::Status(401),
            "invalid api token",
        )));
        let result = compose_answer("q", &["c"], &generator, SETTINGS, &ApiKey::new("key")).await;

        match result {
            Err(QaError::Generation(error)) => {
                assert_eq!(error.kind, BackendErrorKind::Status(401));
                assert!(!error.is_transient());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let settings = GenerationSettings {
            temperature: 0.1,
            timeout: Duration::from_millis(20),
        };
        let result =
            compose_answer("q", &["c"], &HangingGenerator, settings, &ApiKey::new("key")).await;

        let error = result.unwrap_err();
        assert!(matches!(error, QaError::Generation(_)));
        assert!(error.is_timeout());
    }
}
