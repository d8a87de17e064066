//! Agent layer: specialist profiles, intent routing, and the main loop.
//!
//! Observers receive a small sum type of events through a single
//! callback; the loop never reaches back into UI state. The confirm
//! collaborator gates write tools when auto-approve is off.

mod executor;
mod router;
mod specialist;

pub use executor::{AgentLoop, LoopError};
pub use router::{route, RouteDecision};
pub use specialist::{run_specialist, specialist_note};

use std::sync::Arc;

use async_trait::async_trait;

/// A specialist agent: a distinct system prompt invoked before the main
/// loop to seed context.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub system_prompt: &'static str,
}

/// The registered specialists, in routing order.
pub fn profiles() -> &'static [AgentProfile] {
    &PROFILES
}

pub(crate) static PROFILES: [AgentProfile; 2] = [
    AgentProfile {
        id: "research",
        name: "Research Agent",
        system_prompt: "You are a research specialist. Produce a structured \
research brief for the request: key questions to answer, what is already \
known, promising sources or search queries, and suggested next steps. Be \
factual and flag uncertainty explicitly.",
    },
    AgentProfile {
        id: "email_writer",
        name: "Email Writer",
        system_prompt: "You are an email-writing specialist. Draft the \
requested email: clear subject line, appropriate tone, short paragraphs, \
and an explicit call to action when one is needed. Offer one draft, not \
alternatives.",
    },
];

/// Events emitted by the loop to its observer, in program order.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// One streamed content token.
    Token(String),
    /// A specialist agent produced a pre-turn note.
    AgentNote { name: String, content: String },
}

/// Single observer callback; the loop holds no other reference to the
/// caller's state.
pub type EventSink = Arc<dyn Fn(LoopEvent) + Send + Sync>;

/// Asks the user to approve a write operation.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// Confirm that always denies. Used by the remote server, which has no
/// interactive channel back to the user.
pub struct DenyAll;

#[async_trait]
impl Confirm for DenyAll {
    async fn confirm(&self, _question: &str) -> bool {
        false
    }
}

/// Confirm that always approves; test and auto-approve helper.
pub struct ApproveAll;

#[async_trait]
impl Confirm for ApproveAll {
    async fn confirm(&self, _question: &str) -> bool {
        true
    }
}
