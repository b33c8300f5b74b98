//! Voice output boundary.
//!
//! The assistant hands finished reply text to a [`SpeechOutput`] and forgets
//! about it. Playback, queuing and interruption belong to whatever sits
//! behind the trait.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::VoiceConfig;

pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str);
}

/// Speaks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

impl SpeechOutput for SilentSpeech {
    fn speak(&self, _text: &str) {}
}

/// Runs an external text-to-speech program (`espeak`, `say`, ...) with the
/// text as its single argument. Fire-and-forget: the child is spawned and
/// reaped on a background task.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    program: String,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start the program for `text`. `Ok(false)` when there is nothing to say.
    fn launch(&self, text: &str) -> std::io::Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        let mut child = Command::new(&self.program)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;
        debug!(program = %self.program, chars = text.chars().count(), "speaking reply");
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!(error = %e, "speech process wait failed");
            }
        });
        Ok(true)
    }
}

impl SpeechOutput for CommandSpeech {
    fn speak(&self, text: &str) {
        if let Err(e) = self.launch(text) {
            warn!(program = %self.program, error = %e, "cannot start speech program");
        }
    }
}

/// Pick the speech output for `[voice]`.
pub fn from_config(config: &VoiceConfig) -> Box<dyn SpeechOutput> {
    match command_for(config) {
        Some(speech) => Box::new(speech),
        None => Box::new(SilentSpeech),
    }
}

fn command_for(config: &VoiceConfig) -> Option<CommandSpeech> {
    match (&config.speech_command, config.speak_replies) {
        (Some(cmd), true) => Some(CommandSpeech::new(cmd.clone())),
        (None, true) => {
            warn!("voice.speak_replies is set but voice.speech_command is empty; replies stay silent");
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_unless_enabled_with_a_command() {
        assert!(command_for(&VoiceConfig::default()).is_none());

        let no_command = VoiceConfig { speak_replies: true, speech_command: None };
        assert!(command_for(&no_command).is_none());

        let disabled = VoiceConfig { speak_replies: false, speech_command: Some("espeak".into()) };
        assert!(command_for(&disabled).is_none());

        let enabled = VoiceConfig { speak_replies: true, speech_command: Some("espeak".into()) };
        assert_eq!(command_for(&enabled).map(|c| c.program().to_string()).as_deref(), Some("espeak"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error_not_a_panic() {
        let speech = CommandSpeech::new("orchid-no-such-tts-program");
        assert!(speech.launch("bonjour").is_err());
        speech.speak("bonjour");
    }

    #[tokio::test]
    async fn blank_text_spawns_nothing() {
        let speech = CommandSpeech::new("orchid-no-such-tts-program");
        assert!(!speech.launch("   ").unwrap());
    }
}
