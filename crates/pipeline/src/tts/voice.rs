//! Voice selection for TTS
//!
//! Resolves a voice profile into a concrete engine voice. Cloning requires a
//! valid reference sample; fast mode disables cloning entirely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::TtsError;

/// Per-request voice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub language: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub voice_sample_path: Option<PathBuf>,
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub use_voice_cloning: bool,
    #[serde(default = "default_clamp_min")]
    pub speed_clamp_min: f64,
    #[serde(default = "default_clamp_max")]
    pub speed_clamp_max: f64,
    #[serde(default)]
    pub only_speed_up: bool,
}

fn default_clamp_min() -> f64 {
    0.5
}

fn default_clamp_max() -> f64 {
    2.0
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            model_name: None,
            fast_mode: false,
            voice_sample_path: None,
            speaker_name: None,
            use_voice_cloning: false,
            speed_clamp_min: default_clamp_min(),
            speed_clamp_max: default_clamp_max(),
            only_speed_up: false,
        }
    }
}

impl VoiceProfile {
    pub fn validate(&self) -> Result<(), TtsError> {
        if self.speed_clamp_min <= 0.0 || self.speed_clamp_min > 1.0 {
            return Err(TtsError::InvalidInput(format!(
                "speed_clamp_min {} outside (0, 1]",
                self.speed_clamp_min
            )));
        }
        if self.speed_clamp_max > 4.0 || self.speed_clamp_max < self.speed_clamp_min {
            return Err(TtsError::InvalidInput(format!(
                "speed_clamp_max {} outside [{}, 4]",
                self.speed_clamp_max, self.speed_clamp_min
            )));
        }
        Ok(())
    }
}

/// How the engine should voice the synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSelection {
    /// Clone the voice from a validated reference sample.
    CloneFrom(PathBuf),
    /// Use a named speaker of the configured model.
    Speaker(String),
    /// Use the language's default speaker.
    LanguageDefault(String),
}

/// Concrete voice resolved from a profile.
#[derive(Debug, Clone)]
pub struct SelectedVoice {
    pub model_name: String,
    pub selection: VoiceSelection,
    pub language: String,
}

struct LanguageVoices {
    model: &'static str,
    fast_model: &'static str,
    default_speaker: Option<&'static str>,
}

static LANGUAGE_DEFAULTS: Lazy<HashMap<&'static str, LanguageVoices>> = Lazy::new(|| {
    HashMap::from([
        (
            "en",
            LanguageVoices {
                model: "tts_models/multilingual/multi-dataset/xtts_v2",
                fast_model: "tts_models/en/vctk/vits",
                default_speaker: Some("p225"),
            },
        ),
        (
            "es",
            LanguageVoices {
                model: "tts_models/multilingual/multi-dataset/xtts_v2",
                fast_model: "tts_models/es/css10/vits",
                default_speaker: None,
            },
        ),
    ])
});

const FALLBACK_MODEL: &str = "tts_models/multilingual/multi-dataset/xtts_v2";

/// Validated properties of a reference sample.
#[derive(Debug, Clone, Copy)]
pub struct VoiceSampleInfo {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub duration_seconds: f64,
}

/// Validate a cloning reference sample: mono WAV, at least 16 kHz, 3-30 s.
pub fn validate_voice_sample(path: &Path) -> Result<VoiceSampleInfo, TtsError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        TtsError::VoiceSampleInvalid(format!("cannot open {}: {e}", path.display()))
    })?;
    let spec = reader.spec();
    let duration_seconds = reader.duration() as f64 / spec.sample_rate as f64;

    if spec.channels != 1 {
        return Err(TtsError::VoiceSampleInvalid(format!(
            "voice sample must be mono, got {} channels",
            spec.channels
        )));
    }
    if spec.sample_rate < 16_000 {
        return Err(TtsError::VoiceSampleInvalid(format!(
            "voice sample rate {} below 16000 Hz",
            spec.sample_rate
        )));
    }
    if !(3.0..=30.0).contains(&duration_seconds) {
        return Err(TtsError::VoiceSampleInvalid(format!(
            "voice sample duration {duration_seconds:.1}s outside [3, 30]s"
        )));
    }

    Ok(VoiceSampleInfo {
        sample_rate_hz: spec.sample_rate,
        channels: spec.channels,
        duration_seconds,
    })
}

/// Resolve a profile into a concrete voice.
pub fn select_voice(profile: &VoiceProfile) -> Result<SelectedVoice, TtsError> {
    profile.validate()?;

    let defaults = LANGUAGE_DEFAULTS.get(profile.language.as_str());

    let model_name = profile.model_name.clone().unwrap_or_else(|| {
        let model = match defaults {
            Some(v) if profile.fast_mode => v.fast_model,
            Some(v) => v.model,
            None => FALLBACK_MODEL,
        };
        model.to_string()
    });

    // Fast mode disables cloning.
    if profile.use_voice_cloning && !profile.fast_mode {
        let path = profile.voice_sample_path.as_ref().ok_or_else(|| {
            TtsError::VoiceSampleInvalid("voice cloning requested without a sample".into())
        })?;
        validate_voice_sample(path)?;
        return Ok(SelectedVoice {
            model_name,
            selection: VoiceSelection::CloneFrom(path.clone()),
            language: profile.language.clone(),
        });
    }

    let selection = match (&profile.speaker_name, defaults) {
        (Some(name), _) => VoiceSelection::Speaker(name.clone()),
        (None, Some(v)) => match v.default_speaker {
            Some(speaker) => VoiceSelection::Speaker(speaker.to_string()),
            None => VoiceSelection::LanguageDefault(profile.language.clone()),
        },
        (None, None) => VoiceSelection::LanguageDefault(profile.language.clone()),
    };

    Ok(SelectedVoice {
        model_name,
        selection,
        language: profile.language.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, seconds: f64, rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..((seconds * rate as f64) as usize * channels as usize) {
            writer.write_sample(100i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_valid_sample_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        write_wav(&path, 5.0, 22_050, 1);
        let info = validate_voice_sample(&path).unwrap();
        assert_eq!(info.sample_rate_hz, 22_050);
        assert!((info.duration_seconds - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_stereo_sample_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 5.0, 22_050, 2);
        assert!(matches!(
            validate_voice_sample(&path),
            Err(TtsError::VoiceSampleInvalid(_))
        ));
    }

    #[test]
    fn test_low_rate_and_short_samples_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let low = dir.path().join("low.wav");
        write_wav(&low, 5.0, 8_000, 1);
        assert!(validate_voice_sample(&low).is_err());

        let short = dir.path().join("short.wav");
        write_wav(&short, 1.0, 22_050, 1);
        assert!(validate_voice_sample(&short).is_err());
    }

    #[test]
    fn test_cloning_requires_sample() {
        let profile = VoiceProfile {
            use_voice_cloning: true,
            ..Default::default()
        };
        assert!(matches!(
            select_voice(&profile),
            Err(TtsError::VoiceSampleInvalid(_))
        ));
    }

    #[test]
    fn test_fast_mode_disables_cloning() {
        let profile = VoiceProfile {
            use_voice_cloning: true,
            fast_mode: true,
            ..Default::default()
        };
        let voice = select_voice(&profile).unwrap();
        assert!(matches!(voice.selection, VoiceSelection::Speaker(_)));
        assert_eq!(voice.model_name, "tts_models/en/vctk/vits");
    }

    #[test]
    fn test_language_default_speaker() {
        let voice = select_voice(&VoiceProfile::default()).unwrap();
        assert_eq!(voice.selection, VoiceSelection::Speaker("p225".into()));

        let es = select_voice(&VoiceProfile {
            language: "es".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(es.selection, VoiceSelection::LanguageDefault("es".into()));
    }

    #[test]
    fn test_clamp_validation() {
        let bad = VoiceProfile {
            speed_clamp_min: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = VoiceProfile {
            speed_clamp_max: 5.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
