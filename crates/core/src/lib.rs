pub mod chat;
pub mod evaluator;
pub mod history;
pub mod interview;
pub mod pipeline;
pub mod prompts;
pub mod sanitize;
pub mod segment;
