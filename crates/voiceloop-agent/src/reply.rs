//! Reply decision policy — echo or scripted.

use voiceloop_core::config::{AgentConfig, ReplyMode};

/// Per-session reply policy. Scripted mode keeps a cyclic cursor into the
/// configured lines, advancing one line per reply.
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    mode: ReplyMode,
    lines: Vec<String>,
    index: usize,
}

impl ReplyPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            mode: config.reply_mode,
            lines: config.scripted_lines.clone(),
            index: 0,
        }
    }

    /// Compute the reply for a final transcript.
    pub fn next_reply(&mut self, transcript: &str) -> String {
        match self.mode {
            ReplyMode::Echo => format!("You said: {transcript}."),
            ReplyMode::Scripted => {
                // Empty scripts are rejected by config validation at startup.
                if self.lines.is_empty() {
                    return String::new();
                }
                let line = self.lines[self.index % self.lines.len()].clone();
                self.index += 1;
                line
            }
        }
    }
}
