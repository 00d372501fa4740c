//! Debate roles and participant personas.
//!
//! A [`Role`] is a debate-side tag, not an identity: the same philosopher may
//! argue PRO in one room and CON in another.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DebateError;

/// Identifier of a participant inside one debate room.
pub type ParticipantId = String;

/// Role of a participant in the debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Arguing in favor of the topic.
    Pro,
    /// Arguing against the topic.
    Con,
    /// Weighing both sides without committing to one.
    Neutral,
    /// Opens, bridges and summarises stages.
    Moderator,
    /// A live user speaking without a side.
    User,
}

impl Role {
    /// Roles that take part in argumentation, in default priority order.
    pub const DEBATERS: [Role; 3] = [Role::Pro, Role::Con, Role::Neutral];

    pub fn display_name(&self) -> &str {
        match self {
            Role::Pro => "PRO",
            Role::Con => "CON",
            Role::Neutral => "NEUTRAL",
            Role::Moderator => "MODERATOR",
            Role::User => "USER",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pro => "pro",
            Role::Con => "con",
            Role::Neutral => "neutral",
            Role::Moderator => "moderator",
            Role::User => "user",
        }
    }

    /// Whether this role argues a position.
    pub fn is_debater(&self) -> bool {
        matches!(self, Role::Pro | Role::Con | Role::Neutral)
    }

    /// Roles whose arguments this role should attack.
    ///
    /// Pro and con oppose each other; a neutral participant probes both.
    pub fn opponents(&self) -> &'static [Role] {
        match self {
            Role::Pro => &[Role::Con],
            Role::Con => &[Role::Pro],
            Role::Neutral => &[Role::Pro, Role::Con],
            Role::Moderator | Role::User => &[],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DebateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pro" | "for" => Ok(Role::Pro),
            "con" | "against" => Ok(Role::Con),
            "neutral" => Ok(Role::Neutral),
            "moderator" => Ok(Role::Moderator),
            "user" => Ok(Role::User),
            other => Err(DebateError::UnknownRole(other.to_string())),
        }
    }
}

/// One of the two opposing sides of the motion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn role(&self) -> Role {
        match self {
            Side::Pro => Role::Pro,
            Side::Con => Role::Con,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().display_name())
    }
}

/// A scripted debater persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Stable id used in the roster and in turn records.
    pub id: ParticipantId,
    /// Display name for this participant.
    pub name: String,
    /// The role this participant is playing.
    pub role: Role,
    /// Model override (e.g., "gpt-4o", "llama3:8b").
    pub model: Option<String>,
    /// Persona description injected into the speaker prompt.
    pub persona: Option<String>,
}

impl Participant {
    /// Create a participant. The id is the name lowercased, with spaces
    /// replaced by underscores.
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        let name = name.into();
        Self {
            id: name.to_lowercase().replace(' ', "_"),
            name,
            role,
            model: None,
            persona: None,
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the model used for this participant.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set a persona description.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Get the full display name with role.
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, self.role.display_name())
    }
}
