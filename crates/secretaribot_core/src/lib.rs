pub mod client;
pub mod config;
pub mod meeting;
pub mod merge;
pub mod probe;
pub mod readme;
pub mod runtime;
pub mod spam;
pub mod watch;
pub mod wikitable;
