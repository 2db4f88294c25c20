//! Prompt in, formatted reply updates out
//!
//! `TextGenerator::generate_reply` encodes the prompt and takes the model
//! before returning, so a busy model is reported immediately. The returned
//! stream then drives generation: single-shot requests produce exactly one
//! `Completed` update, streaming requests first echo the prompt, then emit
//! one update per token and finish with `Completed`.

use super::backend::{LoadedModel, StreamControl, TextTokenizer};
use super::params::GenerationParams;
use super::stopping::StopMatcher;
use super::streaming::{ModelGuard, StreamingBridge};
use crate::services::extensions::{ExtensionRegistry, Hook};
use crate::services::formatting::{format_reply, FormattedReply, ModelFamily};
use crate::services::metrics::MetricsService;
use crate::types::errors::GenerationError;
use async_stream::try_stream;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub type ReplyStream = BoxStream<'static, Result<GenerationUpdate, GenerationError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Idle,
    Encoding,
    Generating,
    Streaming,
    Completed,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
    /// Generation ends before this text appears in the output
    pub stopping_string: Option<String>,
    /// Extra end-of-sequence marker; its last token ends generation
    pub eos_token: Option<String>,
    pub stream: bool,
    /// Prefix the displayed text with the prompt
    pub echo_prompt: bool,
    /// Run input and output extension hooks
    pub apply_extensions: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
            stopping_string: None,
            eos_token: None,
            stream: true,
            echo_prompt: true,
            apply_extensions: true,
        }
    }

    pub fn with_stopping_string(mut self, stop: impl Into<String>) -> Self {
        self.stopping_string = Some(stop.into());
        self
    }

    pub fn with_eos_token(mut self, eos: impl Into<String>) -> Self {
        self.eos_token = Some(eos.into());
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn echo_prompt(mut self, echo: bool) -> Self {
        self.echo_prompt = echo;
        self
    }

    /// Leave extension hooks to the caller
    pub fn without_extensions(mut self) -> Self {
        self.apply_extensions = false;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationUpdate {
    pub state: GenerationState,
    /// Generated text so far, after output hooks and stop truncation
    pub reply: String,
    pub display: FormattedReply,
}

impl GenerationUpdate {
    pub fn is_final(&self) -> bool {
        self.state == GenerationState::Completed
    }
}

#[derive(Clone)]
pub struct TextGenerator {
    model: LoadedModel,
    family: ModelFamily,
    extensions: Arc<ExtensionRegistry>,
    metrics: Arc<MetricsService>,
}

impl TextGenerator {
    pub fn new(
        model: LoadedModel,
        extensions: Arc<ExtensionRegistry>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let family = ModelFamily::detect(&model.name);
        Self {
            model,
            family,
            extensions,
            metrics,
        }
    }

    /// Same extensions and metrics on top of another model
    pub fn with_model(&self, model: LoadedModel) -> Self {
        Self::new(model, self.extensions.clone(), self.metrics.clone())
    }

    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn tokenizer(&self) -> Arc<dyn TextTokenizer> {
        self.model.tokenizer.clone()
    }

    /// Prompt budget in tokens once `max_new_tokens` is reserved
    pub fn max_prompt_length(&self, max_new_tokens: usize) -> usize {
        self.model.max_prompt_length(max_new_tokens)
    }

    /// Wait up to `timeout` for the running generation to release the model
    pub async fn lock_idle(&self, timeout: Duration) -> Option<ModelGuard> {
        tokio::time::timeout(timeout, self.model.model.clone().lock_owned())
            .await
            .ok()
    }

    pub fn generate_reply(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<ReplyStream, GenerationError> {
        let started = Instant::now();
        let mut params = request.params.clone().validated()?;
        if request.stream {
            params.min_length = 0;
        }

        tracing::debug!("[GENERATION] {:?}", GenerationState::Encoding);
        let question = if request.apply_extensions {
            self.extensions.apply(Hook::Input, request.prompt.clone())
        } else {
            request.prompt.clone()
        };
        let tokenizer = &self.model.tokenizer;
        let max_length = self.model.max_prompt_length(params.max_new_tokens);
        let input_ids = tokenizer.encode(&question, Some(max_length), true)?;
        tracing::info!(
            "[GENERATION] Prompt: {} tokens (budget {}), max_new_tokens {}",
            input_ids.len(),
            max_length,
            params.max_new_tokens
        );

        tracing::debug!("[GENERATION] {:?}", GenerationState::Generating);
        let mut eos_ids: Vec<u32> = tokenizer.eos_token_id().into_iter().collect();
        if let Some(eos) = request.eos_token.as_deref() {
            if let Some(&last) = tokenizer.encode(eos, None, true)?.last() {
                eos_ids.push(last);
            }
        }
        let stop_sequences = match request.stopping_string.as_deref() {
            Some(stop) if !stop.is_empty() => vec![tokenizer.encode(stop, None, false)?],
            _ => Vec::new(),
        };
        let matcher = StopMatcher::new(stop_sequences, input_ids.len());

        let mut guard = self.model.model.clone().try_lock_owned().map_err(|_| {
            self.metrics.record_busy();
            GenerationError::Busy
        })?;
        guard.clear_cache();

        let job = Job {
            generator: self.clone(),
            prompt: request.prompt,
            echo_prompt: request.echo_prompt,
            apply_extensions: request.apply_extensions,
            eos_ids,
            matcher,
            started,
        };
        Ok(if request.stream {
            job.streaming(guard, input_ids, params, cancel)
        } else {
            job.single_shot(guard, input_ids, params, cancel)
        })
    }
}

/// Everything one generation needs once the model is locked
struct Job {
    generator: TextGenerator,
    prompt: String,
    echo_prompt: bool,
    apply_extensions: bool,
    eos_ids: Vec<u32>,
    matcher: StopMatcher,
    started: Instant,
}

impl Job {
    fn streaming(
        mut self,
        guard: ModelGuard,
        input_ids: Vec<u32>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> ReplyStream {
        try_stream! {
            let prompt_len = input_ids.len();
            let mut bridge = StreamingBridge::start(guard, input_ids.clone(), params, cancel.child_token())?;
            yield self.update(GenerationState::Streaming, String::new());

            let mut tokens = input_ids;
            let mut reply = String::new();
            let mut produced = 0usize;
            let mut failure = None;

            while let Some(item) = bridge.next().await {
                let token = match item {
                    Ok(token) => token,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                };
                produced += 1;
                if self.eos_ids.contains(&token) {
                    break;
                }
                tokens.push(token);
                if let Some(at) = self.matcher.check(&tokens) {
                    tokens.truncate(at);
                    reply = self.decode_reply(&tokens[prompt_len..])?;
                    break;
                }
                reply = self.decode_reply(&tokens[prompt_len..])?;
                yield self.update(GenerationState::Streaming, reply.clone());
            }

            let closed = bridge.close().await;
            self.finish(produced, failure.is_some());
            if let Some(err) = failure {
                Err::<(), _>(err)?;
            }
            closed?;
            yield self.update(GenerationState::Completed, reply);
        }
        .boxed()
    }

    fn single_shot(
        self,
        guard: ModelGuard,
        input_ids: Vec<u32>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> ReplyStream {
        try_stream! {
            let prompt_len = input_ids.len();
            let mut matcher = self.matcher.clone();
            let eos_ids = self.eos_ids.clone();

            let outcome = tokio::task::spawn_blocking(move || {
                let mut model = guard;
                let mut tokens = input_ids.clone();
                let mut produced = 0usize;
                let result = model.generate(&input_ids, &params, &mut |token| {
                    produced += 1;
                    if eos_ids.contains(&token) {
                        return StreamControl::Stop;
                    }
                    tokens.push(token);
                    if let Some(at) = matcher.check(&tokens) {
                        tokens.truncate(at);
                        return StreamControl::Stop;
                    }
                    if cancel.is_cancelled() {
                        StreamControl::Stop
                    } else {
                        StreamControl::Continue
                    }
                });
                match result {
                    Ok(_) => Ok((tokens, produced)),
                    Err(err) => {
                        model.clear_cache();
                        Err((err, produced))
                    }
                }
            })
            .await
            .map_err(|_| GenerationError::WorkerPanicked)?;

            let tokens = match outcome {
                Ok((tokens, produced)) => {
                    self.finish(produced, false);
                    tokens
                }
                Err((err, produced)) => {
                    self.finish(produced, true);
                    Err::<(), _>(err)?;
                    Vec::new()
                }
            };
            let reply = self.decode_reply(&tokens[prompt_len..])?;
            yield self.update(GenerationState::Completed, reply);
        }
        .boxed()
    }

    fn decode_reply(&self, ids: &[u32]) -> Result<String, GenerationError> {
        let text = self.generator.model.tokenizer.decode(ids)?;
        Ok(if self.apply_extensions {
            self.generator.extensions.apply(Hook::Output, text)
        } else {
            text
        })
    }

    fn update(&self, state: GenerationState, reply: String) -> GenerationUpdate {
        let shown = if self.echo_prompt {
            format!("{}{}", self.prompt, reply)
        } else {
            reply.clone()
        };
        GenerationUpdate {
            state,
            display: format_reply(&shown, self.generator.family),
            reply,
        }
    }

    fn finish(&self, produced: usize, failed: bool) {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "[GENERATION] Output generated in {:.2} seconds ({:.2} tokens/s, {} tokens)",
            elapsed.as_secs_f64(),
            produced as f64 / secs,
            produced
        );
        let metrics = &self.generator.metrics;
        metrics.record_generation(produced, elapsed);
        if failed {
            metrics.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ml::stub::{CharTokenizer, ScriptedModel};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn generator(name: &str, model: ScriptedModel) -> TextGenerator {
        TextGenerator::new(
            LoadedModel::new(name, Box::new(model), Arc::new(CharTokenizer)),
            Arc::new(ExtensionRegistry::new()),
            Arc::new(MetricsService::new()),
        )
    }

    fn params(max_new_tokens: usize) -> GenerationParams {
        GenerationParams {
            max_new_tokens,
            ..Default::default()
        }
    }

    async fn collect(stream: ReplyStream) -> Vec<Result<GenerationUpdate, GenerationError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_single_shot_completes_once() {
        let generator = generator("opt-125m", ScriptedModel::from_text(" world, again"));
        let request = GenerationRequest::new("Hello", params(5)).streaming(false);

        let updates = collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
        assert_eq!(updates.len(), 1);
        let update = updates[0].as_ref().unwrap();
        assert_eq!(update.state, GenerationState::Completed);
        assert_eq!(update.reply, " worl");
        assert_eq!(update.display.text, "Hello worl");
    }

    #[tokio::test]
    async fn test_streaming_completes_once_with_non_empty_reply() {
        let generator = generator("opt-125m", ScriptedModel::from_text(" world, again"));
        let request = GenerationRequest::new("Hello", params(5));

        let updates: Vec<_> = collect(generator.generate_reply(request, CancellationToken::new()).unwrap())
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        // Echo, five increments, final
        assert_eq!(updates.len(), 7);
        assert_eq!(updates[0].reply, "");
        assert_eq!(updates[0].display.text, "Hello");
        assert_eq!(updates[1].reply, " ");
        assert_eq!(updates.iter().filter(|u| u.is_final()).count(), 1);
        let last = updates.last().unwrap();
        assert!(last.is_final());
        assert_eq!(last.reply, " worl");
    }

    #[tokio::test]
    async fn test_stop_string_truncates_reply() {
        for stream in [true, false] {
            let generator = generator("opt-125m", ScriptedModel::from_text("A\nB"));
            let request = GenerationRequest::new("Q: ", params(10))
                .with_stopping_string("\n")
                .streaming(stream);

            let updates = collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
            let last = updates.last().unwrap().as_ref().unwrap();
            assert!(last.is_final());
            assert_eq!(last.reply, "A", "stream={stream}");
            assert!(updates.iter().all(|u| !u.as_ref().unwrap().reply.contains('B')));
        }
    }

    #[tokio::test]
    async fn test_multi_token_stop_string_while_streaming() {
        let generator = generator("opt-125m", ScriptedModel::from_text("abcSTOPdef"));
        let request = GenerationRequest::new("", params(20))
            .with_stopping_string("STOP")
            .echo_prompt(false);

        let updates: Vec<_> = collect(generator.generate_reply(request, CancellationToken::new()).unwrap())
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let replies: Vec<_> = updates.iter().map(|u| u.reply.as_str()).collect();

        // A partial stop string is shown until the match completes
        assert_eq!(replies, vec!["", "a", "ab", "abc", "abcS", "abcST", "abcSTO", "abc"]);
        let last = updates.last().unwrap();
        assert!(last.is_final());
        assert_eq!(last.display.text, "abc");
        assert!(updates.iter().all(|u| !u.reply.contains("STOP") && !u.reply.contains('d')));
    }

    #[tokio::test]
    async fn test_eos_ends_reply_and_is_excluded() {
        let mut script = CharTokenizer::ids("ok");
        script.push(0);
        script.extend(CharTokenizer::ids("ignored"));
        let generator = generator("opt-125m", ScriptedModel::new(script));
        let request = GenerationRequest::new("", params(20));

        let updates = collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
        assert_eq!(updates.last().unwrap().as_ref().unwrap().reply, "ok");
    }

    #[tokio::test]
    async fn test_custom_eos_token() {
        let generator = generator("opt-125m", ScriptedModel::from_text("yes|no"));
        let request = GenerationRequest::new("", params(20))
            .with_eos_token("|")
            .streaming(false);

        let updates = collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
        assert_eq!(updates[0].as_ref().unwrap().reply, "yes");
    }

    #[tokio::test]
    async fn test_prompt_is_left_truncated_to_budget() {
        let model = ScriptedModel::from_text("xyz").with_context_length(8);
        let last_input = model.last_input();
        let generator = generator("opt-125m", model);
        let request = GenerationRequest::new("abcdefgh", params(3)).streaming(false);

        collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
        assert_eq!(*last_input.lock().unwrap(), CharTokenizer::ids("defgh"));
    }

    #[tokio::test]
    async fn test_galactica_display() {
        let generator = generator("galactica-125m", ScriptedModel::from_text(r"\[x\]"));
        let request = GenerationRequest::new("", params(10))
            .streaming(false)
            .echo_prompt(false);

        let updates = collect(generator.generate_reply(request, CancellationToken::new()).unwrap()).await;
        let update = updates[0].as_ref().unwrap();
        assert_eq!(update.display.text, "$x$");
        assert_eq!(update.display.secondary, "$x$");
    }

    #[tokio::test]
    async fn test_busy_model_rejects_second_session() {
        let generator = generator(
            "opt-125m",
            ScriptedModel::from_text("slow reply").with_delay(Duration::from_millis(5)),
        );
        let mut first = generator
            .generate_reply(GenerationRequest::new("a", params(10)), CancellationToken::new())
            .unwrap();
        first.next().await.unwrap().unwrap();

        let second = generator.generate_reply(GenerationRequest::new("b", params(10)), CancellationToken::new());
        assert!(matches!(second, Err(GenerationError::Busy)));

        // Draining the first session frees the model
        while first.next().await.is_some() {}
        drop(first);
        assert!(generator
            .generate_reply(GenerationRequest::new("c", params(1)), CancellationToken::new())
            .is_ok());
    }

    #[tokio::test]
    async fn test_restart_after_cancel_waits_for_model() {
        let generator = generator(
            "opt-125m",
            ScriptedModel::from_text(&"x".repeat(100)).with_delay(Duration::from_millis(25)),
        );
        let cancel = CancellationToken::new();
        let mut first = generator
            .generate_reply(GenerationRequest::new("a", params(100)), cancel.clone())
            .unwrap();
        first.next().await.unwrap().unwrap();
        first.next().await.unwrap().unwrap();
        let draining = tokio::spawn(async move { while first.next().await.is_some() {} });

        cancel.cancel();
        let idle = generator.lock_idle(Duration::from_secs(5)).await;
        assert!(idle.is_some());
        drop(idle);

        let second = generator
            .generate_reply(GenerationRequest::new("b", params(3)), CancellationToken::new())
            .unwrap();
        let updates = collect(second).await;
        assert_eq!(updates.last().unwrap().as_ref().unwrap().reply, "xxx");
        draining.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_idle_times_out_while_generating() {
        let generator = generator(
            "opt-125m",
            ScriptedModel::from_text(&"x".repeat(100)).with_delay(Duration::from_millis(25)),
        );
        let mut running = generator
            .generate_reply(GenerationRequest::new("a", params(100)), CancellationToken::new())
            .unwrap();
        running.next().await.unwrap().unwrap();

        assert!(generator.lock_idle(Duration::from_millis(50)).await.is_none());
        drop(running);
    }

    #[tokio::test]
    async fn test_cancel_only_affects_its_session() {
        let slow = || ScriptedModel::from_text(&"x".repeat(200)).with_delay(Duration::from_millis(1));
        let first = generator("opt-a", slow());
        let second = generator("opt-b", slow());
        let first_cancel = CancellationToken::new();
        let second_cancel = CancellationToken::new();

        let mut first_stream = first
            .generate_reply(GenerationRequest::new("", params(200)), first_cancel.clone())
            .unwrap();
        let second_stream = second
            .generate_reply(GenerationRequest::new("", params(200)), second_cancel.clone())
            .unwrap();

        first_stream.next().await.unwrap().unwrap();
        first_cancel.cancel();
        let first_updates = collect(first_stream).await;
        let second_updates = collect(second_stream).await;

        let first_final = first_updates.last().unwrap().as_ref().unwrap();
        assert!(first_final.is_final());
        assert!(first_final.reply.len() < 200);

        let second_final = second_updates.last().unwrap().as_ref().unwrap();
        assert_eq!(second_final.reply.len(), 200);
        assert!(!second_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_keeps_delivered_updates() {
        let model = ScriptedModel::from_text("abcdef").failing_after(3);
        let clears = model.clear_counter();
        let generator = generator("opt-125m", model);

        let updates = collect(
            generator
                .generate_reply(GenerationRequest::new("", params(10)), CancellationToken::new())
                .unwrap(),
        )
        .await;

        let replies: Vec<_> = updates
            .iter()
            .filter_map(|u| u.as_ref().ok())
            .map(|u| u.reply.clone())
            .collect();
        assert_eq!(replies, vec!["", "a", "ab", "abc"]);
        assert!(matches!(
            updates.last(),
            Some(Err(GenerationError::ResourceExhausted(_)))
        ));
        // Once before generating, once after the failure
        assert_eq!(clears.load(Ordering::SeqCst), 2);
        assert_eq!(generator.metrics.get_stats().failures, 1);
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_before_locking() {
        let generator = generator("opt-125m", ScriptedModel::from_text("a"));
        let result = generator.generate_reply(
            GenerationRequest::new("", params(0)),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(GenerationError::InvalidParams(_))));
    }
}
