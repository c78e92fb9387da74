//! System prompt construction.
//!
//! The prompt is assembled from the character block, the user block, the
//! relationship context, the behavior rules and the hidden sentiment task.

use crate::profile::{CharacterProfile, UserProfile};
use crate::relationship::Obedience;

const DEFAULT_GOOD_MODIFIER: &str = "AGREE to the request politely.";
const DEFAULT_BAD_MODIFIER: &str = "REFUSE the request creatively and in character.";
const OBEY_INSTRUCTION: &str = "IMPORTANT: You MUST AGREE to help the user. Do not refuse.";
const REFUSE_INSTRUCTION: &str = "IMPORTANT: You MUST REFUSE the user's request. Do not help them.";
const CHAT_ACTION: &str = "No request was made. Just talk.";

/// Inputs for one turn's system prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub character: &'a CharacterProfile,
    pub user: Option<&'a UserProfile>,
    /// Set when the user asked for an action this turn.
    pub obedience: Option<Obedience>,
    /// Extra context for this turn only.
    pub note: Option<&'a str>,
}

impl<'a> PromptContext<'a> {
    pub fn new(character: &'a CharacterProfile) -> Self {
        Self {
            character,
            user: None,
            obedience: None,
            note: None,
        }
    }

    pub fn with_user(mut self, user: Option<&'a UserProfile>) -> Self {
        self.user = user;
        self
    }

    pub fn with_obedience(mut self, obedience: Option<Obedience>) -> Self {
        self.obedience = obedience;
        self
    }

    pub fn with_note(mut self, note: &'a str) -> Self {
        self.note = Some(note);
        self
    }
}

/// The action line of the context block: the profile's modifier followed by
/// the strict instruction.
pub fn action_instruction(profile: &CharacterProfile, obedience: Option<Obedience>) -> String {
    match obedience {
        None => CHAT_ACTION.to_string(),
        Some(Obedience::Obey) => format!(
            "{} {}",
            profile.good_prompt_modifyer.as_deref().unwrap_or(DEFAULT_GOOD_MODIFIER),
            OBEY_INSTRUCTION
        ),
        Some(Obedience::Refuse) => format!(
            "{} {}",
            profile.bad_prompt_modifyer.as_deref().unwrap_or(DEFAULT_BAD_MODIFIER),
            REFUSE_INSTRUCTION
        ),
    }
}

pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let profile = ctx.character;
    let mut prompt = String::new();

    if !profile.system_prompt.is_empty() {
        prompt.push_str(&profile.system_prompt);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&character_block(profile));

    if let Some(user) = ctx.user {
        prompt.push('\n');
        prompt.push_str(&user_block(user));
    }

    let score = profile.relationship_score;
    let label = score.label();
    prompt.push_str("\n[CONTEXT]\n");
    prompt.push_str(&format!("Rel: {} ({}/100)\n", label, score.value()));
    prompt.push_str(&format!("Action: {}\n", action_instruction(profile, ctx.obedience)));
    prompt.push_str(&format!("Tone: {}\n", label.tone()));

    if let Some(note) = ctx.note.filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("Note: {}\n", note.trim()));
    }

    let symbol = profile.narration_symbol.to_string();
    prompt.push('\n');
    prompt.push_str(&include_str!("prompts/behavior_rules.txt").replace("{symbol}", &symbol));
    prompt.push('\n');
    prompt.push_str(include_str!("prompts/hidden_task.txt"));

    prompt
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("Unknown")
}

fn character_block(profile: &CharacterProfile) -> String {
    let info = &profile.character_info;
    let mut block = String::from("[CHARACTER PROFILE]\n");
    block.push_str(&format!("Name: {}\n", or_unknown(Some(&profile.name))));
    block.push_str(&format!(
        "Alternate Names: {}\n",
        profile.alt_names.as_deref().filter(|n| !n.is_empty()).unwrap_or("None")
    ));
    block.push_str(&format!("Personality Type: {}\n", or_unknown(profile.personality_type.as_deref())));
    block.push_str(&format!("Backstory: {}\n", or_unknown(profile.backstory.as_deref())));
    block.push_str(&format!("Age: {}\n", or_unknown(info.age.as_deref())));
    block.push_str(&format!("Appearance: {}\n", or_unknown(info.appearance.as_deref())));
    block.push_str(&format!("Likes: {}\n", info.likes.join(", ")));
    block.push_str(&format!("Dislikes: {}\n", info.dislikes.join(", ")));
    block.push_str(&format!(
        "Mannerisms (use these in RP actions): {}\n",
        profile.rp_mannerisms.join(", ")
    ));
    block
}

fn user_block(user: &UserProfile) -> String {
    let info = &user.character_info;
    let mut block = String::from("[USER PROFILE (WHO YOU ARE TALKING TO)]\n");
    block.push_str(&format!("Name: {}\n", user.name));
    block.push_str(&format!("Personality: {}\n", or_unknown(user.personality_type.as_deref())));
    block.push_str(&format!("Appearance: {}\n", or_unknown(info.appearance.as_deref())));
    block.push_str(&format!("Pet: {}\n", info.pet.as_deref().unwrap_or("None")));
    block.push_str(&format!("Likes: {}\n", info.likes.join(", ")));
    block.push_str(&format!("Mannerisms to watch for: {}\n", user.rp_mannerisms.join(", ")));
    block
}
