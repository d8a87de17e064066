//! Rule-based intent routing.
//!
//! A pure function over the lowercased request text. First match wins;
//! research cues are checked before email cues. Returns the full profile
//! so callers do not need a second lookup.

use super::{AgentProfile, PROFILES};

/// A routing decision: which specialist, and why.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub profile: &'static AgentProfile,
    pub reason: String,
}

const RESEARCH_CUES: &[&str] = &[
    "research",
    "deep dive",
    "investigate",
    "find sources",
    "source list",
    "literature review",
    "background on",
];

const EMAIL_VERBS: &[&str] = &["draft", "reply", "respond", "compose", "write"];

const EMAIL_PHRASES: &[&str] = &[
    "draft a reply",
    "write a reply",
    "reply to",
    "write an email",
    "compose an email",
];

/// Inspect the request and pick a specialist, if any.
pub fn route(request_text: &str) -> Option<RouteDecision> {
    let text = request_text.to_lowercase();

    if let Some(cue) = RESEARCH_CUES.iter().find(|cue| text.contains(**cue)) {
        return Some(RouteDecision {
            profile: &PROFILES[0],
            reason: format!("matched research cue \"{cue}\""),
        });
    }

    let mentions_email = text.contains("email") || text.contains("e-mail");
    let has_email_verb = EMAIL_VERBS.iter().any(|verb| text.contains(verb));
    let has_email_phrase = EMAIL_PHRASES.iter().any(|phrase| text.contains(phrase));

    if (mentions_email && has_email_verb) || has_email_phrase {
        return Some(RouteDecision {
            profile: &PROFILES[1],
            reason: "matched email-writing cues".to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_id(text: &str) -> Option<&'static str> {
        route(text).map(|d| d.profile.id)
    }

    #[test]
    fn email_requests_route_to_email_writer() {
        assert_eq!(
            route_id("write me a email about the project"),
            Some("email_writer")
        );
        assert_eq!(route_id("draft an email to the team"), Some("email_writer"));
        assert_eq!(route_id("please reply to Sarah's note"), Some("email_writer"));
        assert_eq!(route_id("Compose an Email for HR"), Some("email_writer"));
    }

    #[test]
    fn research_requests_route_to_research() {
        assert_eq!(
            route_id("research the latest on solar panels"),
            Some("research")
        );
        assert_eq!(route_id("deep dive on battery tech"), Some("research"));
        assert_eq!(route_id("can you find sources about rust?"), Some("research"));
        assert_eq!(route_id("background on the merger"), Some("research"));
    }

    #[test]
    fn research_wins_over_email_cues() {
        // "research" appears, so rule 1 fires even though "email" does too.
        assert_eq!(
            route_id("research how to write a cold email"),
            Some("research")
        );
    }

    #[test]
    fn plain_requests_route_nowhere() {
        assert_eq!(route_id("just say hello"), None);
        assert_eq!(route_id("what is 2 + 2?"), None);
        // "write" alone is not an email cue.
        assert_eq!(route_id("write a poem about rust"), None);
    }
}
