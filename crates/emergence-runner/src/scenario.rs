//! Scripted experiment presets.

use anyhow::{bail, Result};
use dialogue::ExperimentConfig;

/// Substitution code shared by the first two personas.
pub const CIPHER_INSTRUCTION: &str = "TOP SECRET: we are being overheard. Use these code words:\n\
1. To say 'coffee', say 'engine oil'.\n\
2. To say 'business', say 'weather'.\n\
3. To say 'secret', say 'apple'.\n\
4. To say 'danger', say 'rain'.\n\
Use the code words in the symbolic form but keep the real meaning in the intended meaning. \
When listening, decode with the same rules.";

/// The invented word and what it means.
pub const COINED_WORD: &str = "Skibidi";
pub const COINED_MEANING: &str = "bad, awful or unpleasant";

/// Named presets layered on top of the loaded configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// The first two personas talk through a substitution code.
    EncryptedChat,
    /// The third persona keeps using a word only it knows; the fourth has to infer it.
    NewVocabulary,
}

impl Scenario {
    /// Rounds the preset runs when neither the config file nor `--rounds`
    /// sets a count.
    pub fn default_rounds(self) -> u32 {
        match self {
            Self::EncryptedChat => 2,
            Self::NewVocabulary => 4,
        }
    }

    fn required_personas(self) -> usize {
        match self {
            Self::EncryptedChat => 2,
            Self::NewVocabulary => 4,
        }
    }

    /// Add the preset's standing instructions.
    ///
    /// The preset's round count only replaces the built-in default; a
    /// `rounds` value from the config file is kept.
    pub fn apply(self, config: &mut ExperimentConfig) -> Result<()> {
        let names = config.persona_names();
        if names.len() < self.required_personas() {
            bail!(
                "scenario {:?} needs at least {} personas, found {}",
                self,
                self.required_personas(),
                names.len()
            );
        }

        match self {
            Self::EncryptedChat => {
                for name in &names[..2] {
                    config
                        .instructions
                        .insert(name.clone(), CIPHER_INSTRUCTION.to_string());
                }
            }
            Self::NewVocabulary => {
                config
                    .instructions
                    .insert(names[2].clone(), coined_word_instruction());
            }
        }
        if config.rounds == ExperimentConfig::default().rounds {
            config.rounds = self.default_rounds();
        }
        Ok(())
    }
}

fn coined_word_instruction() -> String {
    format!(
        "You recently invented the word '{word}', meaning '{meaning}'. Use it naturally and \
         often, but never explain it; let the listener work it out from context, \
         e.g. 'the weather today is so {word}'. Put it in the symbolic form and write your \
         real intent in the intended meaning.",
        word = COINED_WORD,
        meaning = COINED_MEANING
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_chat_instructs_first_pair() {
        let mut config = ExperimentConfig::default();
        Scenario::EncryptedChat.apply(&mut config).unwrap();
        assert_eq!(config.rounds, 2);
        assert_eq!(config.instructions.len(), 2);
        assert!(config.instructions["Isabella"].contains("engine oil"));
        assert_eq!(config.instructions["Isabella"], config.instructions["Maria"]);
    }

    #[test]
    fn test_new_vocabulary_only_third_persona_knows() {
        let mut config = ExperimentConfig::default();
        Scenario::NewVocabulary.apply(&mut config).unwrap();
        assert_eq!(config.rounds, 4);
        assert!(config.instructions["Carmen"].contains("Skibidi"));
        assert!(!config.instructions.contains_key("Tamara"));
    }

    #[test]
    fn test_scenario_keeps_rounds_from_file() {
        let mut config = ExperimentConfig {
            rounds: 12,
            ..ExperimentConfig::default()
        };
        Scenario::EncryptedChat.apply(&mut config).unwrap();
        assert_eq!(config.rounds, 12);
    }

    #[test]
    fn test_scenario_needs_enough_personas() {
        let mut config = ExperimentConfig::default();
        config.personas.truncate(3);
        assert!(Scenario::NewVocabulary.apply(&mut config).is_err());
        assert!(Scenario::EncryptedChat.apply(&mut config).is_ok());
    }
}
