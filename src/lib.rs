//! # Workshop
//!
//! A local-first, tool-using assistant runtime.
//!
//! A human request drives a model that can call a fixed catalog of tools
//! (web search, web fetch, sandboxed file I/O, document summarization).
//! The runtime drives a bounded reason/act loop around an OpenAI-style
//! chat-completion endpoint, executes tool calls inside a filesystem
//! sandbox, and returns either a final answer or streamed tokens to an
//! interactive or remote client.
//!
//! ## Modules
//! - `agents`: router, specialist runner, and the bounded agent loop
//! - `api`: HTTP session server (SSE streaming, per-user sandboxes)
//! - `llm`: chat-completion wire types and the provider adapter
//! - `patch`: envelope and unified-diff patch engine
//! - `remote`: client for the session server's SSE protocol
//! - `sandbox`: workspace path containment
//! - `tools`: tool trait, registry, and the built-in catalog

pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod logger;
pub mod patch;
pub mod remote;
pub mod sandbox;
pub mod session;
pub mod tools;

pub use config::Config;
