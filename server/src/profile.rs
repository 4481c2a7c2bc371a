//! Cue-phrase extraction of self-disclosed user facts. Regex best-effort:
//! paraphrased disclosures are missed and unrelated text containing a cue
//! phrase can false-positive. Kept behind a trait so a stronger extractor can
//! replace it without touching the chat pipeline.

use regex::Regex;

use crate::store::Profile;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub profession: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.profession.is_none()
    }
}

pub trait FactExtractor: Send + Sync {
    fn extract(&self, text: &str) -> ProfileUpdate;
}

pub struct RegexFactExtractor {
    name_re: Regex,
    profession_re: Regex,
}

impl RegexFactExtractor {
    pub fn new() -> Self {
        let name_re = Regex::new(r"(?i)\bmy name is ([A-Za-z ]+)").unwrap();
        let profession_re = Regex::new(r"(?i)\bI am a[n]* ([A-Za-z ]+)").unwrap();
        Self { name_re, profession_re }
    }
}

impl Default for RegexFactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FactExtractor for RegexFactExtractor {
    fn extract(&self, text: &str) -> ProfileUpdate {
        let name = self
            .name_re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());
        let profession = self
            .profession_re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());
        ProfileUpdate { name, profession }
    }
}

/// Renders the stored profile into a short preamble for the next agent
/// prompt, e.g. "The user's name is X. The user's profession is Y.". Empty
/// string when there is nothing to say.
pub fn render_profile_context(profile: Option<&Profile>) -> String {
    let profile = match profile {
        Some(p) => p,
        None => return String::new(),
    };
    let mut parts = Vec::new();
    if let Some(name) = &profile.name {
        parts.push(format!("The user's name is {}.", name));
    }
    if let Some(profession) = &profile.profession {
        parts.push(format!("The user's profession is {}.", profession));
    }
    parts.join(" ")
}
