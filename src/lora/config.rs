//! Adapter configuration surface

use crate::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Module names covered by the `all-linear` selector: every 2-D projection
/// in the transformer stack (attention and MLP), excluding the LM head.
pub const ALL_LINEAR_MODULES: &[&str] = &[
    "q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj",
];

/// Which linear modules receive adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetModules {
    /// Every eligible projection weight
    AllLinear,
    /// An explicit module-name list (`q_proj`, `v_proj`, ...)
    List(Vec<String>),
}

impl TargetModules {
    /// Module names selected by this target set
    #[must_use]
    pub fn resolve(&self) -> Vec<&str> {
        match self {
            Self::AllLinear => ALL_LINEAR_MODULES.to_vec(),
            Self::List(modules) => modules.iter().map(String::as_str).collect(),
        }
    }
}

impl Serialize for TargetModules {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::AllLinear => serializer.serialize_str("all-linear"),
            Self::List(modules) => modules.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TargetModules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(s) if s == "all-linear" => Ok(Self::AllLinear),
            Raw::Keyword(other) => Err(D::Error::custom(format!(
                "unknown target selector '{other}' (expected 'all-linear' or a module list)"
            ))),
            Raw::List(modules) => Ok(Self::List(modules)),
        }
    }
}

/// Bias handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasMode {
    /// No bias parameters are trained
    #[default]
    None,
}

/// Adaptation task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Causal language modeling
    #[default]
    CausalLm,
}

/// LoRA hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// Rank of the low-rank decomposition
    pub rank: usize,

    /// Scaling numerator; the applied scale is `alpha / rank`
    pub alpha: f64,

    /// Dropout probability on the adapter path during training
    pub dropout: f32,

    /// Bias handling
    pub bias: BiasMode,

    /// Target module selector
    pub target_modules: TargetModules,

    /// Task type
    pub task_type: TaskType,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 8.0,
            dropout: 0.05,
            bias: BiasMode::None,
            target_modules: TargetModules::AllLinear,
            task_type: TaskType::CausalLm,
        }
    }
}

impl LoraConfig {
    /// Scale applied to the adapter product, `alpha / rank`
    #[must_use]
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    /// Check hyperparameter ranges.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a zero rank, an out-of-range dropout,
    /// or an empty target list.
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(Error::Config("lora.rank must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "lora.dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if let TargetModules::List(modules) = &self.target_modules {
            if modules.is_empty() {
                return Err(Error::Config(
                    "lora.target_modules list must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_qlora_recipe() {
        let cfg = LoraConfig::default();
        assert_eq!(cfg.rank, 16);
        assert_eq!(cfg.alpha, 8.0);
        assert_eq!(cfg.dropout, 0.05);
        assert_eq!(cfg.bias, BiasMode::None);
        assert_eq!(cfg.target_modules, TargetModules::AllLinear);
        assert_eq!(cfg.task_type, TaskType::CausalLm);
        cfg.validate().expect("defaults valid");
    }

    #[test]
    fn scaling_is_alpha_over_rank() {
        let cfg = LoraConfig {
            rank: 16,
            alpha: 8.0,
            ..LoraConfig::default()
        };
        approx::assert_abs_diff_eq!(cfg.scaling(), 0.5);
    }

    #[test]
    fn all_linear_keyword_round_trips() {
        let cfg: LoraConfig = serde_yaml::from_str("target_modules: all-linear").expect("yaml");
        assert_eq!(cfg.target_modules, TargetModules::AllLinear);
        assert_eq!(cfg.target_modules.resolve().len(), 7);

        let yaml = serde_yaml::to_string(&cfg).expect("serialize");
        assert!(yaml.contains("all-linear"));
    }

    #[test]
    fn module_list_parses() {
        let cfg: LoraConfig =
            serde_yaml::from_str("target_modules: [q_proj, v_proj]").expect("yaml");
        assert_eq!(
            cfg.target_modules,
            TargetModules::List(vec!["q_proj".to_string(), "v_proj".to_string()])
        );
    }

    #[test]
    fn unknown_keyword_rejected() {
        let parsed: std::result::Result<LoraConfig, _> =
            serde_yaml::from_str("target_modules: everything");
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_rank_rejected() {
        let cfg = LoraConfig {
            rank: 0,
            ..LoraConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dropout_range_checked() {
        let cfg = LoraConfig {
            dropout: 1.0,
            ..LoraConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
