//! Text-to-speech through an external engine (`espeak-ng` or `pico2wave`).

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{TtsError, TtsResult};
use crate::protocol_constants::TTS_TIMEOUT_SECS;
use crate::state::{TtsConfig, TtsEngine};
use crate::utils::{run_command, CommandOutput};

/// Default pico2wave language when no voice is configured.
const PICO_DEFAULT_LANGUAGE: &str = "de-DE";

/// Speaks synthesized text on the audio output.
pub trait TtsSpeaker: Send + Sync {
    /// Speaks `text`, blocking until the engine finishes.
    fn speak(&self, text: &str) -> TtsResult<()>;

    /// Speaks each line in order, stopping at the first failure.
    fn speak_lines(&self, lines: &[String]) -> TtsResult<()> {
        if lines.is_empty() {
            return Err(TtsError::NoLines);
        }
        for line in lines {
            self.speak(line)?;
        }
        Ok(())
    }
}

/// [`TtsSpeaker`] running the configured engine as a subprocess.
pub struct CommandTtsSpeaker {
    config: TtsConfig,
    timeout: Duration,
    /// Only one utterance at a time.
    lock: Mutex<()>,
}

impl CommandTtsSpeaker {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            timeout: Duration::from_secs(TTS_TIMEOUT_SECS),
            lock: Mutex::new(()),
        }
    }

    /// Arguments for `espeak-ng`.
    #[must_use]
    pub fn espeak_args(&self, text: &str) -> Vec<String> {
        let mut args = vec![
            "-s".to_string(),
            self.config.rate.to_string(),
            "-a".to_string(),
            self.config.volume.to_string(),
        ];
        if let Some(voice) = &self.config.voice {
            args.push("-v".to_string());
            args.push(voice.clone());
        }
        args.push(text.to_string());
        args
    }

    /// Arguments for `pico2wave` rendering into `wav_path`.
    #[must_use]
    pub fn pico_args(&self, text: &str, wav_path: &str) -> Vec<String> {
        let language = self
            .config
            .voice
            .as_deref()
            .unwrap_or(PICO_DEFAULT_LANGUAGE);
        vec![
            "-l".to_string(),
            language.to_string(),
            "-w".to_string(),
            wav_path.to_string(),
            text.to_string(),
        ]
    }

    fn run(&self, program: &str, args: &[String]) -> TtsResult<()> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = run_command(program, &args, self.timeout)?;
        check(program, &output)
    }

    fn speak_pico(&self, text: &str) -> TtsResult<()> {
        // Removed when dropped, on every exit path.
        let wav = tempfile::Builder::new()
            .prefix("klarfunk-tts-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| TtsError::Failed(format!("cannot create temp file: {e}")))?;
        let wav_path = wav.path().to_string_lossy().into_owned();

        self.run(
            self.config.engine.program(),
            &self.pico_args(text, &wav_path),
        )?;
        self.run("aplay", &["-q".to_string(), wav_path])
    }
}

fn check(program: &str, output: &CommandOutput) -> TtsResult<()> {
    if output.success() {
        Ok(())
    } else {
        Err(TtsError::Failed(format!(
            "{program}: {}",
            output.diagnostic()
        )))
    }
}

impl TtsSpeaker for CommandTtsSpeaker {
    fn speak(&self, text: &str) -> TtsResult<()> {
        if !self.config.enabled {
            return Err(TtsError::Disabled);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }

        let _guard = self.lock.lock();
        log::debug!("[Tts] Speaking: {}", text);
        let result = match self.config.engine {
            TtsEngine::EspeakNg => self.run(self.config.engine.program(), &self.espeak_args(text)),
            TtsEngine::Pico2Wave => self.speak_pico(text),
        };
        if let Err(e) = &result {
            log::warn!("[Tts] Failed to speak: {}", e);
        }
        result
    }
}
