//! Prompt templating and output sanitation.
//!
//! `llama-server` takes a raw prompt string, so the user message has to be
//! wrapped in whatever control-token syntax the model family was tuned on.
//! Reasoning-tuned models additionally leak `<think>` spans into their
//! output; those are stripped before the answer is returned.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::ModelSpec;

const SYSTEM_DEFAULT: &str = "You are a helpful assistant. Provide clear, concise answers.";

const SYSTEM_ANSWER_ONLY: &str = "You are a helpful assistant. Answer the question directly \
and concisely. Do not show your thinking process or reasoning steps. Only provide the final \
answer.";

lazy_static! {
    static ref REASONING_SPAN: Regex = Regex::new(r"(?s)<think>.*?</think>").unwrap();
}

/// Render a user message into the model's expected instruction template.
///
/// Total function: an unrecognized template id falls back to a generic
/// instruct format rather than failing.
pub fn format_prompt(spec: &ModelSpec, message: &str) -> String {
    let template = spec.prompt_template.as_deref().unwrap_or("chatml");

    match template {
        // ChatML (dolphin, phi-3, qwen)
        "chatml" => {
            let system = if spec.reasoning {
                SYSTEM_ANSWER_ONLY
            } else {
                SYSTEM_DEFAULT
            };
            format!(
                "<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
                system, message
            )
        }
        "llama3" => format!(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n",
            SYSTEM_DEFAULT, message
        ),
        _ => format!("### Instruction:\n{}\n\n### Response:\n", message),
    }
}

/// Remove every `<think>…</think>` span (non-greedy, newlines included)
/// and trim the remainder.
pub fn strip_reasoning(text: &str) -> String {
    REASONING_SPAN.replace_all(text, "").trim().to_string()
}
