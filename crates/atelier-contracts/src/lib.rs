pub mod catalog;
pub mod error;
pub mod history;
pub mod options;
pub mod prompts;
pub mod ratio;
