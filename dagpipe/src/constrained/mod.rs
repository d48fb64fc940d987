//! Validate-and-repair loop for structured provider output.
//!
//! The provider is asked for a single raw JSON object matching the schema of
//! the target type. Whatever comes back is trimmed down to its JSON object
//! candidate, parsed and checked. On failure the original transcript is
//! re-sent with the schema instruction and the exact validation error, until
//! the attempt budget is spent.
//!
//! ```rust,ignore
//! let spec: Generated<ProductSpec> = ConstrainedGenerator::new()
//!     .with_max_retries(2)
//!     .generate(&provider, &[ChatMessage::user("Create a spec")])
//!     .await?;
//! ```

mod extract;
mod schema;

pub use extract::extract_json;
pub use schema::{parse_output, schema_json, validate_value, OutputSchema, SchemaRegistry};

use crate::errors::ConstrainedError;
use crate::provider::{ChatMessage, Provider, Role};

/// Default number of repair retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// A validated value and the number of provider calls it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    /// The validated output.
    pub value: T,
    /// Provider calls made, including the successful one.
    pub attempts: usize,
}

/// Runs the constrained generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstrainedGenerator {
    max_retries: usize,
}

impl Default for ConstrainedGenerator {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ConstrainedGenerator {
    /// Creates a generator with the default retry budget.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Returns the total number of provider calls permitted.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Asks `provider` for a `T`, repairing invalid output.
    ///
    /// # Errors
    ///
    /// - [`ConstrainedError::Exhausted`] when every attempt fails validation.
    /// - [`ConstrainedError::Provider`] as soon as the provider call fails;
    ///   provider failures are left to the caller's own retry policy.
    /// - [`ConstrainedError::Schema`] if the schema of `T` cannot be rendered.
    pub async fn generate<T, P>(
        &self,
        provider: &P,
        messages: &[ChatMessage],
    ) -> Result<Generated<T>, ConstrainedError>
    where
        T: OutputSchema,
        P: Provider + ?Sized,
    {
        let schema = schema_json::<T>().map_err(ConstrainedError::Schema)?;
        let instruction = schema_instruction(&schema);
        let max_attempts = self.max_attempts();
        let mut prompt = with_instruction(messages, &instruction);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let raw = provider.complete(&prompt).await?;

            match parse_output::<T>(extract_json(&raw)) {
                Ok(value) => {
                    tracing::debug!(attempt, "Constrained output validated");
                    return Ok(Generated {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Constrained output failed validation"
                    );
                    if attempt < max_attempts {
                        let repair = format!("{instruction}{}", repair_note(&e));
                        prompt = with_instruction(messages, &repair);
                    }
                    last_error = e;
                }
            }
        }

        Err(ConstrainedError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Shorthand for a one-off [`ConstrainedGenerator::generate`] call.
///
/// # Errors
///
/// See [`ConstrainedGenerator::generate`].
pub async fn constrained_generate<T, P>(
    provider: &P,
    messages: &[ChatMessage],
    max_retries: usize,
) -> Result<T, ConstrainedError>
where
    T: OutputSchema,
    P: Provider + ?Sized,
{
    ConstrainedGenerator::new()
        .with_max_retries(max_retries)
        .generate(provider, messages)
        .await
        .map(|generated| generated.value)
}

fn schema_instruction(schema: &str) -> String {
    format!(
        "\n\nYou MUST respond with ONLY a valid JSON object matching this schema:\n\
         ```json\n{schema}\n```\n\
         Do NOT include any text before or after the JSON. \
         Do NOT wrap in markdown code blocks. \
         Output ONLY the raw JSON object starting with {{ and ending with }}."
    )
}

fn repair_note(error: &str) -> String {
    format!(
        "\n\nYour previous JSON was INVALID: {error}\n\
         Fix the error and respond with ONLY the corrected JSON."
    )
}

/// Appends `instruction` to the last user message of a copy of `messages`.
///
/// A transcript without a user message gets the instruction as a new one.
fn with_instruction(messages: &[ChatMessage], instruction: &str) -> Vec<ChatMessage> {
    let mut prompt = messages.to_vec();
    match prompt.iter_mut().rev().find(|m| m.role == Role::User) {
        Some(last_user) => last_user.content.push_str(instruction),
        None => prompt.push(ChatMessage::user(instruction.trim_start())),
    }
    prompt
}
