//! Structured output: declared types and the validation loop.

mod schema;
mod validator;

pub use schema::{SchemaError, TypeDescriptor};
pub use validator::{
    strip_code_fence, typed_prompt, TypedGenerator, TypedOutcome, ValidationAttempt, MAX_ATTEMPTS,
};
