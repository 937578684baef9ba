use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::agents::conversation::{Conversation, Turn};
use crate::agents::model::{CompletionModel, ToolCall};
use crate::agents::progress::{NoopSink, Phase, ProgressEvent, ProgressSink};
use crate::agents::prompt::{self, AgentAnswer};
use crate::config::SynthesisConfig;
use crate::error::{ForgeError, Result};
use crate::parser::extract_with_report;
use crate::parser::schema::{ExtractedFeed, ExtractionConfig, SynthesisResult};
use crate::parser::trim_html;
use crate::selector::tester::TOOL_NAME;
use crate::selector::{ConfigValidator, SelectorProbe, SelectorTester, TestOutcome, ValidatedConfig};

/// What one evaluated terminal answer leads to.
enum Step {
    Done(SynthesisResult),
    Retry { feedback: String, error: ForgeError },
}

/// Drives the proposing agent towards an extraction config that works on the
/// real page. Each call to `synthesize` is independent; nothing is shared
/// between runs except the injected collaborators.
pub struct SynthesisController {
    model: Arc<dyn CompletionModel>,
    settings: SynthesisConfig,
    tester: SelectorTester,
    validator: ConfigValidator,
    sink: Arc<dyn ProgressSink>,
}

impl SynthesisController {
    pub fn new(model: Arc<dyn CompletionModel>, settings: SynthesisConfig) -> Self {
        let tester = SelectorTester::new(settings.sample_limit, settings.sample_chars);
        Self {
            model,
            settings,
            tester,
            validator: ConfigValidator::default(),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn settings(&self) -> &SynthesisConfig {
        &self.settings
    }

    /// Synthesize an extraction config for `markup` fetched from `source_url`.
    ///
    /// Returns `Suitable` with a config whose replay yields at least one item,
    /// or `Unsuitable` when the agent judged the page to have no repeating
    /// structure. Dropping the future cancels the run.
    pub async fn synthesize(&self, markup: &str, source_url: &str) -> Result<SynthesisResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("synthesis", %run_id, url = %source_url);

        let result = self.run(markup, source_url).instrument(span).await;
        if let Err(e) = &result {
            error!(%run_id, error = %e, "Synthesis failed");
            self.emit(ProgressEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    /// Re-synthesize a config for a page whose stored config stopped producing
    /// items. Any failure is logged and reported as `None`.
    pub async fn regenerate(
        &self,
        markup: &str,
        source_url: &str,
    ) -> Option<(ExtractionConfig, ExtractedFeed)> {
        info!(url = %source_url, "Attempting config regeneration");
        match self.synthesize(markup, source_url).await {
            Ok(SynthesisResult::Suitable { config, preview, .. }) => {
                info!(
                    url = %source_url,
                    item_count = preview.items.len(),
                    "Config regenerated successfully"
                );
                Some((config, preview))
            }
            Ok(SynthesisResult::Unsuitable { reason, .. }) => {
                warn!(url = %source_url, reason = %reason, "Agent deemed page unsuitable");
                None
            }
            Err(e) => {
                error!(url = %source_url, error = %e, "Config regeneration failed");
                None
            }
        }
    }

    async fn run(&self, markup: &str, source_url: &str) -> Result<SynthesisResult> {
        let url = Url::parse(source_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ForgeError::Input(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let trimmed = trim_html(markup, self.settings.max_prompt_chars);
        debug!(
            raw_len = markup.len(),
            trimmed_len = trimmed.len(),
            "Trimmed markup for prompt"
        );

        let mut conversation = Conversation::new(
            prompt::initial_prompt(&trimmed, source_url),
            self.settings.max_iterations,
        );
        let tools = [self.tester.definition()];
        let mut last_error = None;

        while conversation.advance() {
            let iteration = conversation.iteration();
            let is_final = conversation.is_final_iteration();
            info!(
                iteration,
                max_iterations = conversation.max_iterations(),
                turns = conversation.len(),
                "Synthesis iteration starting"
            );
            self.emit(ProgressEvent::Status(Phase::Analyze {
                iteration,
                max_iterations: conversation.max_iterations(),
            }));

            if is_final && matches!(conversation.last(), Some(Turn::ToolResult { .. })) {
                conversation.push_user(prompt::final_answer_request());
            }

            let offered = if is_final { None } else { Some(&tools[..]) };
            let turn = self.model.complete(&conversation, offered).await?;

            if turn.has_tool_calls() {
                if let Some(text) = turn.content() {
                    self.emit(ProgressEvent::AiText {
                        text: text.to_string(),
                    });
                }

                if !is_final {
                    info!(
                        iteration,
                        tool_call_count = turn.tool_calls.len(),
                        "Agent requested tool calls"
                    );
                    let calls = turn.tool_calls.clone();
                    conversation.push_agent(turn);
                    // strictly one at a time, in the order the agent issued them
                    for call in &calls {
                        let result = self.run_tool(markup, call);
                        conversation.push_tool_result(call.id.clone(), result);
                    }
                    continue;
                }

                warn!(
                    iteration,
                    tool_call_count = turn.tool_calls.len(),
                    "Ignoring tool calls on the final iteration"
                );
            }

            let text = turn.text.clone();
            conversation.push_agent(turn);

            self.emit(ProgressEvent::Status(Phase::Validate));
            match self.evaluate(markup, source_url, text.as_deref(), iteration, is_final)? {
                Step::Done(result) => return Ok(result),
                Step::Retry { feedback, error } => {
                    warn!(iteration, error = %error, "Retrying with corrective feedback");
                    conversation.push_user(feedback);
                    last_error = Some(error);
                }
            }
        }

        Err(ForgeError::ConvergenceExhausted {
            iterations: conversation.iteration(),
            last_error: Box::new(last_error.unwrap_or_else(|| {
                ForgeError::AgentProtocol("No terminal answer from model".to_string())
            })),
        })
    }

    /// Judge a terminal answer: unsuitable, retry with feedback, or accept.
    fn evaluate(
        &self,
        markup: &str,
        source_url: &str,
        text: Option<&str>,
        iteration: u32,
        is_final: bool,
    ) -> Result<Step> {
        let answer = prompt::parse_answer(text)?;

        let (candidate, monitor) = match answer {
            AgentAnswer::Unsuitable { reason, monitor } => {
                info!(reason = %reason, "Agent deemed page unsuitable");
                return Ok(Step::Done(SynthesisResult::Unsuitable { reason, monitor }));
            }
            AgentAnswer::Proposal { candidate, monitor } => (candidate, monitor),
        };

        let config = match self.validator.validate(&candidate) {
            Ok(ValidatedConfig::Clean(config)) => config,
            Ok(ValidatedConfig::Fragile { config, flagged }) => {
                if is_final {
                    warn!(
                        flagged = flagged.len(),
                        "Accepting fragile selectors on the final iteration"
                    );
                    config
                } else {
                    let error = ForgeError::validation(
                        flagged[0].path.clone(),
                        format!("generated class name \"{}\"", flagged[0].class_name),
                    );
                    return Ok(Step::Retry {
                        feedback: prompt::fragile_feedback(&flagged),
                        error,
                    });
                }
            }
            Err(e) => {
                let feedback = prompt::validation_feedback(&e);
                return recover(e, feedback, iteration, is_final);
            }
        };

        let report = extract_with_report(markup, &config, source_url)?;
        if report.feed.items.is_empty() {
            let feedback = prompt::empty_extraction_feedback(&config.item_selector, report.matched);
            let error = ForgeError::ExtractionEmpty {
                selector: config.item_selector.clone(),
                matched: report.matched,
            };
            return recover(error, feedback, iteration, is_final);
        }

        info!(
            iteration,
            item_selector = %config.item_selector,
            item_count = report.feed.items.len(),
            "Accepted extraction config"
        );
        Ok(Step::Done(SynthesisResult::Suitable {
            config,
            preview: report.feed,
            monitor,
        }))
    }

    /// Execute one `test_selector` call. Failures become an error outcome for
    /// the agent to read.
    fn run_tool(&self, markup: &str, call: &ToolCall) -> String {
        if call.name != TOOL_NAME {
            warn!(tool = %call.name, "Unknown tool requested");
            return TestOutcome::Error {
                error: format!("Unknown tool '{}'", call.name),
            }
            .to_json();
        }

        let probe: SelectorProbe = match serde_json::from_str(&call.arguments) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(id = %call.id, error = %e, "Malformed tool arguments");
                return TestOutcome::Error {
                    error: format!("Invalid arguments: {}", e),
                }
                .to_json();
            }
        };

        self.emit(ProgressEvent::tool_call(&probe));
        let outcome = self.tester.test(markup, &probe);
        debug!(
            id = %call.id,
            selector = %probe.selector,
            match_count = outcome.match_count(),
            "Tool call complete"
        );
        self.emit(ProgressEvent::tool_result(&probe, &outcome));
        outcome.to_json()
    }

    fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event);
    }
}

fn recover(error: ForgeError, feedback: String, iteration: u32, is_final: bool) -> Result<Step> {
    if !error.is_retryable() {
        return Err(error);
    }
    if is_final {
        return Err(ForgeError::ConvergenceExhausted {
            iterations: iteration,
            last_error: Box::new(error),
        });
    }
    Ok(Step::Retry { feedback, error })
}
