//! # Answer templates and prompt construction
//!
//! Retrieved tickets are "context stuffed" into a single user prompt:
//!
//! ```text
//! Based on these support tickets, answer concisely.
//!
//! Tickets:
//! Issue: ... | Solution: ...
//!
//! Issue: ... | Solution: ...
//!
//! Question: How do I fix error code 5412?
//!
//! Answer:
//! ```
//!
//! The wording lives in an [`AnswerTemplate`], a small YAML document stored under the
//! configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ```yaml
//! system_prompt: "You are a telecom support assistant."
//! preamble: "Based on these support tickets, answer concisely."
//! ```
//!
//! Tickets are added in rank order while their combined token count (cl100k BPE) fits the
//! configured budget, so a small local model never receives a prompt larger than its
//! context window.

use serde::{Deserialize, Serialize};
use std::fs;
use tiktoken_rs::cl100k_base;

use crate::error::{SupportError, SupportResult};
use crate::vector_service::QueryResult;

/// Template used when the configuration does not name one.
pub const DEFAULT_TEMPLATE_NAME: &str = "support_answer";

/// Wording of the answer prompt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnswerTemplate {
    /// Optional instruction sent as a system message.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// First paragraph of the user prompt, before the ticket list.
    pub preamble: String,
}

impl Default for AnswerTemplate {
    fn default() -> Self {
        Self {
            system_prompt: None,
            preamble: "Based on these support tickets, answer concisely.".to_string(),
        }
    }
}

/// A prompt ready to send, plus how many tickets made it in.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub tickets_used: usize,
}

impl AnswerTemplate {
    /// Stuff `results` into the prompt for `question`.
    ///
    /// Results without metadata are skipped. Once a ticket would push the ticket text over
    /// `token_budget`, it and every lower-ranked ticket are left out.
    pub fn build_prompt(
        &self,
        question: &str,
        results: &[QueryResult],
        token_budget: usize,
    ) -> SupportResult<Prompt> {
        let bpe = cl100k_base().map_err(|e| SupportError::Generation(e.to_string()))?;

        let mut used_tokens = 0usize;
        let mut context = Vec::new();
        for text in results
            .iter()
            .filter_map(|r| r.metadata.as_ref().map(|m| m.text.as_str()))
        {
            let tokens = bpe.encode_with_special_tokens(text).len();
            if used_tokens + tokens > token_budget {
                tracing::debug!(
                    used_tokens,
                    tokens,
                    token_budget,
                    "Dropping lower-ranked tickets to fit the context budget"
                );
                break;
            }
            used_tokens += tokens;
            context.push(text);
        }

        let user_prompt = format!(
            "{}\n\nTickets:\n{}\n\nQuestion: {}\n\nAnswer:",
            self.preamble,
            context.join("\n\n"),
            question
        );

        Ok(Prompt {
            system_prompt: self.system_prompt.clone(),
            user_prompt,
            tickets_used: context.len(),
        })
    }
}

/// Load an answer template by name from the user's config directory.
///
/// Resolves `<config_dir>/templates/<name>.yaml`.
///
/// ### Errors
/// Returns an error if the config directory cannot be determined, the file cannot be
/// read, or the YAML does not describe an [`AnswerTemplate`].
pub fn load_template(name: &str) -> SupportResult<AnswerTemplate> {
    let path = format!("templates/{}.yaml", name);
    let config_path = crate::config_dir()
        .map_err(|e| SupportError::Config(e.to_string()))?
        .join(&path);

    tracing::info!("Loading template: {}", config_path.display());

    let content = fs::read_to_string(config_path)?;
    let template: AnswerTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

/// Load the named template, or the built-in default when no name is configured.
///
/// A configured template that cannot be loaded is an error, not a silent fallback.
pub fn resolve_template(name: Option<&str>) -> SupportResult<AnswerTemplate> {
    match name {
        Some(name) => load_template(name),
        None => Ok(AnswerTemplate::default()),
    }
}
