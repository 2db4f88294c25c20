//! Text transforms contributed by extensions
//!
//! Extensions are registered once at startup and applied in registration
//! order. Each hook defaults to the identity. Parameters can be changed
//! while the server runs; the next hook call sees the new values.

use crate::types::errors::ExtensionError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Prompt text before encoding
    Input,
    /// Generated text after decoding
    Output,
    /// Bot name prefix that opens a chat reply
    BotPrefix,
}

pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn input_modifier(&self, text: String) -> String {
        text
    }

    fn output_modifier(&self, text: String) -> String {
        text
    }

    fn bot_prefix_modifier(&self, text: String) -> String {
        text
    }

    /// Current parameter values
    fn params(&self) -> Map<String, Value> {
        Map::new()
    }

    fn set_param(&mut self, key: &str, _value: &Value) -> Result<(), String> {
        Err(format!("unknown parameter {key:?}"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionParams {
    pub name: String,
    pub params: Map<String, Value>,
}

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Box<dyn Extension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from names, skipping and logging unknown ones
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut registry = Self::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            match builtin(name) {
                Some(extension) => {
                    tracing::info!("🧩 Loading the extension \"{}\"", name);
                    registry.register(extension);
                }
                None => tracing::warn!("Unknown extension \"{}\", skipping", name),
            }
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Box<dyn Extension>>> {
        self.extensions.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&mut self, extension: Box<dyn Extension>) {
        self.extensions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(extension);
    }

    pub fn apply(&self, hook: Hook, text: String) -> String {
        self.read().iter().fold(text, |text, ext| match hook {
            Hook::Input => ext.input_modifier(text),
            Hook::Output => ext.output_modifier(text),
            Hook::BotPrefix => ext.bot_prefix_modifier(text),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn params(&self) -> Vec<ExtensionParams> {
        self.read()
            .iter()
            .map(|ext| ExtensionParams {
                name: ext.name().to_string(),
                params: ext.params(),
            })
            .collect()
    }

    /// Set parameters of the named extension and return its new values.
    ///
    /// Every key is checked against the current parameters first, so an
    /// unknown key changes nothing.
    pub fn update(
        &self,
        name: &str,
        values: &Map<String, Value>,
    ) -> Result<ExtensionParams, ExtensionError> {
        let mut extensions = self.extensions.write().unwrap_or_else(PoisonError::into_inner);
        let extension = extensions
            .iter_mut()
            .find(|ext| ext.name() == name)
            .ok_or_else(|| ExtensionError::Unknown(name.to_string()))?;

        let current = extension.params();
        if let Some(key) = values.keys().find(|key| !current.contains_key(*key)) {
            return Err(ExtensionError::InvalidParam {
                extension: name.to_string(),
                message: format!("unknown parameter {key:?}"),
            });
        }
        for (key, value) in values {
            extension
                .set_param(key, value)
                .map_err(|message| ExtensionError::InvalidParam {
                    extension: name.to_string(),
                    message,
                })?;
            tracing::info!("🧩 {}: {} = {}", name, key, value);
        }
        Ok(ExtensionParams {
            name: name.to_string(),
            params: extension.params(),
        })
    }
}

/// Appends a fixed string to the bot prefix, biasing the character's replies
#[derive(Debug, Clone, Serialize)]
pub struct CharacterBias {
    pub activate: bool,
    pub bias_string: String,
}

impl Default for CharacterBias {
    fn default() -> Self {
        Self {
            activate: true,
            bias_string: " *I am so happy*".to_string(),
        }
    }
}

impl Extension for CharacterBias {
    fn name(&self) -> &str {
        "character_bias"
    }

    fn bot_prefix_modifier(&self, text: String) -> String {
        if self.activate {
            format!("{}{}", text, self.bias_string)
        } else {
            text
        }
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("activate".into(), Value::Bool(self.activate));
        params.insert("bias_string".into(), Value::String(self.bias_string.clone()));
        params
    }

    fn set_param(&mut self, key: &str, value: &Value) -> Result<(), String> {
        match (key, value) {
            ("activate", Value::Bool(activate)) => self.activate = *activate,
            ("bias_string", Value::String(bias)) => self.bias_string = bias.clone(),
            ("activate", _) => return Err("activate must be a boolean".into()),
            ("bias_string", _) => return Err("bias_string must be a string".into()),
            _ => return Err(format!("unknown parameter {key:?}")),
        }
        Ok(())
    }
}

/// Extensions shipped with the server
pub fn builtin(name: &str) -> Option<Box<dyn Extension>> {
    match name {
        "character_bias" => Some(Box::new(CharacterBias::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Suffix(&'static str);

    impl Extension for Suffix {
        fn name(&self) -> &str {
            self.0
        }

        fn input_modifier(&self, text: String) -> String {
            text + self.0
        }
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(Suffix("a")));
        registry.register(Box::new(Suffix("b")));
        assert_eq!(registry.apply(Hook::Input, "x".into()), "xab");
        // Output hooks were not overridden
        assert_eq!(registry.apply(Hook::Output, "x".into()), "x");
    }

    #[test]
    fn test_character_bias() {
        let registry = ExtensionRegistry::from_names(&["character_bias", "missing"]);
        assert_eq!(registry.names(), vec!["character_bias"]);
        assert_eq!(
            registry.apply(Hook::BotPrefix, "Bot:".into()),
            "Bot: *I am so happy*"
        );

        let inactive = CharacterBias {
            activate: false,
            ..Default::default()
        };
        assert_eq!(inactive.bot_prefix_modifier("Bot:".into()), "Bot:");
    }

    #[test]
    fn test_update_character_bias_params() {
        let registry = ExtensionRegistry::from_names(&["character_bias"]);
        let values: Map<String, Value> =
            serde_json::from_str(r#"{"bias_string": " *sighs*"}"#).unwrap();

        let updated = registry.update("character_bias", &values).unwrap();
        assert_eq!(updated.params["bias_string"], " *sighs*");
        assert_eq!(updated.params["activate"], true);
        assert_eq!(registry.apply(Hook::BotPrefix, "Bot:".into()), "Bot: *sighs*");

        let off: Map<String, Value> = serde_json::from_str(r#"{"activate": false}"#).unwrap();
        registry.update("character_bias", &off).unwrap();
        assert_eq!(registry.apply(Hook::BotPrefix, "Bot:".into()), "Bot:");
    }

    #[test]
    fn test_update_rejects_bad_params() {
        let registry = ExtensionRegistry::from_names(&["character_bias"]);
        let typo: Map<String, Value> =
            serde_json::from_str(r#"{"bias_string": "x", "activte": false}"#).unwrap();
        assert!(matches!(
            registry.update("character_bias", &typo),
            Err(ExtensionError::InvalidParam { .. })
        ));
        // Nothing was applied
        assert_eq!(registry.params()[0].params["bias_string"], " *I am so happy*");

        let wrong_type: Map<String, Value> = serde_json::from_str(r#"{"activate": "yes"}"#).unwrap();
        assert!(registry.update("character_bias", &wrong_type).is_err());
        assert!(matches!(
            registry.update("missing", &Map::new()),
            Err(ExtensionError::Unknown(_))
        ));
    }
}
