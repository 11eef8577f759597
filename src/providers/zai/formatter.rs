use std::sync::LazyLock;

use regex::Regex;

use crate::config::ThinkMode;
use crate::providers::openai::ResponseMessage;

use super::types::{Phase, UpstreamEvent};

// 上游在 tool_call 阶段把 JSON 包在 <glm_block> 里，这里剥掉外壳
static TOOL_CALL_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\n*<glm_block[^>]*>\{\s*"type":\s*"mcp",\s*"data":\s*\{\s*"metadata":\s*\{"#)
        .expect("valid regex")
});
static TOOL_CALL_CLOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[}"],\s*"result":\s*"".*</glm_block>"#).expect("valid regex")
});
static TOOL_CALL_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"null,\s*"display_result":\s*"".*</glm_block>"#).expect("valid regex")
});
static SUMMARY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n*<summary>.*?</summary>\n*").expect("valid regex"));
static DETAILS_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<details[^>]*>\n*").expect("valid regex"));
static DETAILS_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n*</details>").expect("valid regex"));
static QUOTE_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n>\s?").expect("valid regex"));
static REASONING_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<reasoning>\n*").expect("valid regex"));
static REASONING_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n*</reasoning>").expect("valid regex"));

const WRAPPER_MARKER: &str = "glm_block";

/// One outward delta, tagged by the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormattedDelta {
    Reasoning(String),
    Content(String),
    ToolCall(String),
}

impl FormattedDelta {
    pub fn into_message(self) -> ResponseMessage {
        match self {
            FormattedDelta::Reasoning(text) => ResponseMessage {
                reasoning_content: Some(text),
                ..ResponseMessage::assistant()
            },
            FormattedDelta::Content(text) => ResponseMessage {
                content: Some(text),
                ..ResponseMessage::assistant()
            },
            FormattedDelta::ToolCall(text) => ResponseMessage {
                tool_call: Some(text),
                ..Default::default()
            },
        }
    }
}

/// Turns phase-tagged upstream deltas into OpenAI-shaped fragments.
///
/// Holds the phase of the previous event so that a tool call whose tail
/// arrives under phase `other` is still recognised. One instance per
/// upstream stream; never share it between requests.
#[derive(Debug, Clone)]
pub struct ResponsePhaseFormatter {
    think_mode: ThinkMode,
    previous_phase: Option<Phase>,
}

impl ResponsePhaseFormatter {
    pub fn new(think_mode: ThinkMode) -> Self {
        Self {
            think_mode,
            previous_phase: None,
        }
    }

    pub fn previous_phase(&self) -> Option<Phase> {
        self.previous_phase
    }

    pub fn format(&mut self, event: &UpstreamEvent) -> Option<FormattedDelta> {
        let mut content = event.content().to_string();
        if content.is_empty() {
            return None;
        }

        let mut phase = event.phase;
        if phase == Phase::ToolCall {
            content = TOOL_CALL_OPEN.replace_all(&content, "{").into_owned();
            content = TOOL_CALL_CLOSE.replace_all(&content, "").into_owned();
        } else if phase == Phase::Other
            && self.previous_phase == Some(Phase::ToolCall)
            && content.contains(WRAPPER_MARKER)
        {
            phase = Phase::ToolCall;
            content = TOOL_CALL_TAIL.replace_all(&content, "\"}").into_owned();
        }

        if phase == Phase::Thinking || (phase == Phase::Answer && content.contains("summary>")) {
            content = self.rewrite_reasoning(phase, content);
        }

        self.previous_phase = Some(phase);

        if content.is_empty() {
            return None;
        }
        match phase {
            Phase::Thinking if self.think_mode == ThinkMode::Reasoning => {
                Some(FormattedDelta::Reasoning(content))
            }
            Phase::ToolCall => Some(FormattedDelta::ToolCall(content)),
            _ => Some(FormattedDelta::Content(content)),
        }
    }

    fn rewrite_reasoning(&self, phase: Phase, content: String) -> String {
        let thinking = phase == Phase::Thinking;
        let mut content = content
            .replace("</thinking>", "")
            .replace("<Full>", "")
            .replace("</Full>", "");
        if thinking {
            content = SUMMARY_BLOCK.replace_all(&content, "\n\n").into_owned();
        }
        content = DETAILS_OPEN
            .replace_all(&content, "<reasoning>\n\n")
            .into_owned();
        content = DETAILS_CLOSE
            .replace_all(&content, "\n\n</reasoning>")
            .into_owned();

        match self.think_mode {
            ThinkMode::Reasoning => {
                if thinking {
                    content = QUOTE_PREFIX.replace_all(&content, "\n").into_owned();
                }
                content = SUMMARY_BLOCK.replace_all(&content, "").into_owned();
                content = REASONING_OPEN.replace_all(&content, "").into_owned();
                REASONING_CLOSE.replace_all(&content, "").into_owned()
            }
            ThinkMode::Think => {
                if thinking {
                    content = QUOTE_PREFIX.replace_all(&content, "\n").into_owned();
                }
                content = SUMMARY_BLOCK.replace_all(&content, "").into_owned();
                content
                    .replace("<reasoning>", "<think>")
                    .replace("</reasoning>", "</think>")
            }
            ThinkMode::Strip => {
                content = SUMMARY_BLOCK.replace_all(&content, "").into_owned();
                content = REASONING_OPEN.replace_all(&content, "").into_owned();
                content.replace("</reasoning>", "")
            }
            ThinkMode::Details => content.replace("</reasoning>", "</reasoning>\n\n"),
        }
    }
}
