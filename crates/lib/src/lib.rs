//! askbot core library: relay a chat command to a question-answering HTTP
//! service and post the answer back, plus the Discord connector and bot wiring
//! used by the CLI.

pub mod bot;
pub mod channels;
pub mod command;
pub mod config;
pub mod relay;
