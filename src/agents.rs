//! Agent command registry
//!
//! Maps an agent identifier plus options to the exact shell invocation used
//! for one-shot jobs, and to the interactive command run inside a terminal
//! session. Pure data and string building; no I/O happens here.

use serde::{Deserialize, Serialize};

/// Closed set of supported agent CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    /// Anthropic's `claude` CLI
    Claude,
    /// Google's `gemini` CLI
    Gemini,
}

/// Static description of one agent CLI
///
/// Produced once as `'static` data at startup and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct AgentSpec {
    /// Which agent this spec describes
    pub id: AgentId,
    /// Fixed single-shot command template.
    ///
    /// The baked-in flags force non-interactive, reproducible runs: tool use
    /// disabled, no session persistence, plain-text output.
    pub command_template: &'static str,
    /// Whether a `--model` flag may be appended to the template
    pub supports_model_flag: bool,
}

const CLAUDE_SPEC: AgentSpec = AgentSpec {
    id: AgentId::Claude,
    command_template: "DISABLE_OMC=1 claude -p --output-format text \
--no-session-persistence --disallowedTools 'Edit,Write,Bash,NotebookEdit' \
--setting-sources ''",
    supports_model_flag: true,
};

const GEMINI_SPEC: AgentSpec = AgentSpec {
    id: AgentId::Gemini,
    command_template: "gemini -p \"\" -o text",
    supports_model_flag: true,
};

impl AgentId {
    /// Registry entry for this agent
    #[must_use]
    pub fn spec(self) -> &'static AgentSpec {
        match self {
            AgentId::Claude => &CLAUDE_SPEC,
            AgentId::Gemini => &GEMINI_SPEC,
        }
    }

    /// Name of the executable looked up on `PATH` before spawning
    #[must_use]
    pub fn binary_name(self) -> &'static str {
        match self {
            AgentId::Claude => "claude",
            AgentId::Gemini => "gemini",
        }
    }

    /// Command run inside an interactive terminal session
    #[must_use]
    pub fn interactive_command(self) -> &'static str {
        match self {
            AgentId::Claude => "claude",
            AgentId::Gemini => "gemini",
        }
    }

    /// Lowercase identifier, matching the serde representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AgentId::Claude => "claude",
            AgentId::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the shell command line for a single-shot agent job
///
/// Returns the agent's fixed template unchanged, except that when `model` is
/// present exactly one model-selection flag is appended with a single leading
/// space. There is no other conditional behavior.
#[must_use]
pub fn build_command(agent: AgentId, model: Option<&str>) -> String {
    let spec = agent.spec();
    match model {
        Some(model) if spec.supports_model_flag => {
            format!("{} --model {model}", spec.command_template)
        }
        _ => spec.command_template.to_string(),
    }
}
