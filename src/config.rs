use crate::cancel::CancellationSignal;
use crate::credential::{CredentialMode, CredentialPolicy, EncryptedTriple, LICENSE_KEY_PHRASE};
use crate::session::{RecognitionOptions, SessionOptions};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub engine: EngineConfig,
    pub credential: CredentialConfig,
    #[serde(default)]
    pub session: SessionDefaults,
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    pub model_name: String,
    /// Script replayed by the scripted engine
    pub script_path: Option<PathBuf>,
    /// Keyword model; defaults to `model_path`
    pub keyword_model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Plain,
    Encrypted,
    Gated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    #[default]
    Hex,
    Base64,
}

#[derive(Debug, Deserialize)]
pub struct CredentialConfig {
    pub mode: CredentialKind,
    /// Engine key for `plain` mode
    pub key: Option<String>,
    pub auth_tag: Option<String>,
    pub iv: Option<String>,
    pub cipher_text: Option<String>,
    #[serde(default)]
    pub encoding: TextEncoding,
    /// Defaults to the license key phrase
    pub key_phrase: Option<String>,
    /// Pinned phrase for `gated` mode; defaults to the license key phrase
    pub expected_key_phrase: Option<String>,
    #[serde(default)]
    pub forward_encrypted_triple: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionDefaults {
    pub wav_path: Option<PathBuf>,
    pub logs_path: Option<PathBuf>,
    #[serde(default)]
    pub phrases: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load a config file, then apply `SPEECHGATE__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SPEECHGATE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {path}"))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn credential_policy(&self) -> Result<CredentialPolicy> {
        let cred = &self.credential;

        let mode = match cred.mode {
            CredentialKind::Plain => {
                let key = cred.key.clone().context("credential.key is required in plain mode")?;
                CredentialMode::PlainKey(key)
            }
            CredentialKind::Encrypted => CredentialMode::EncryptedTriple {
                triple: self.encrypted_triple()?,
                key_phrase: self.key_phrase(),
            },
            CredentialKind::Gated => CredentialMode::GatedEncryptedTriple {
                triple: self.encrypted_triple()?,
                key_phrase: self.key_phrase(),
                expected_key_phrase: cred
                    .expected_key_phrase
                    .clone()
                    .unwrap_or_else(|| LICENSE_KEY_PHRASE.to_string()),
            },
        };

        Ok(CredentialPolicy {
            mode,
            forward_encrypted_triple: cred.forward_encrypted_triple,
        })
    }

    fn key_phrase(&self) -> String {
        self.credential
            .key_phrase
            .clone()
            .unwrap_or_else(|| LICENSE_KEY_PHRASE.to_string())
    }

    fn encrypted_triple(&self) -> Result<EncryptedTriple> {
        let cred = &self.credential;
        let (Some(auth_tag), Some(iv), Some(cipher_text)) = (&cred.auth_tag, &cred.iv, &cred.cipher_text) else {
            bail!("credential.auth_tag, credential.iv and credential.cipher_text are required");
        };

        let triple = match cred.encoding {
            TextEncoding::Hex => EncryptedTriple::from_hex(auth_tag, iv, cipher_text),
            TextEncoding::Base64 => EncryptedTriple::from_base64(auth_tag, iv, cipher_text),
        };
        Ok(triple?)
    }

    /// Session options from config, bound to a caller signal
    pub fn session_options(&self, signal: CancellationSignal) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(
            self.engine.model_path.clone(),
            self.engine.model_name.clone(),
            self.credential_policy()?,
        )
        .with_phrases(self.session.phrases.iter().cloned())
        .with_signal(signal);

        if let Some(wav_path) = &self.session.wav_path {
            options = options.with_wav_path(wav_path.clone());
        }
        if let Some(logs_path) = &self.session.logs_path {
            options = options.with_logs_path(logs_path.clone());
        }

        Ok(options)
    }

    pub fn recognition_options(&self, signal: CancellationSignal) -> RecognitionOptions {
        let model_path = self
            .engine
            .keyword_model_path
            .clone()
            .unwrap_or_else(|| self.engine.model_path.clone());
        RecognitionOptions::new(model_path).with_signal(signal)
    }
}
