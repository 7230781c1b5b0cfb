//! Include/exclude rules between annotation classes
//!
//! A rule file is a JSON object mapping a class name to the classes whose
//! area is merged into it (`includes`) and removed from it (`excludes`):
//!
//! ```json
//! {"tumor": {"includes": ["dcis"], "excludes": ["necrosis"]}}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PatchError, PatchResult};

/// Relations of one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleEntry {
    /// Classes whose area is added to this class
    pub includes: Vec<String>,
    /// Classes whose area is removed from this class
    pub excludes: Vec<String>,
}

/// Parsed rule file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    entries: BTreeMap<String, RuleEntry>,
}

impl Rule {
    /// Read a rule file from disk
    pub fn from_path(path: &Path) -> PatchResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PatchError::RuleParse(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Parse rule JSON
    ///
    /// Every entry must carry both `includes` and `excludes`; the error
    /// names the class and the missing key.
    pub fn from_json_str(content: &str) -> PatchResult<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PatchError::RuleParse(format!("malformed JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| PatchError::RuleParse("rule must be a JSON object".to_string()))?;

        let mut entries = BTreeMap::new();
        for (class, body) in object {
            for key in ["includes", "excludes"] {
                if body.get(key).is_none() {
                    return Err(PatchError::RuleParse(format!(
                        "class '{}' is missing '{}'",
                        class, key
                    )));
                }
            }

            let entry: RuleEntry = serde_json::from_value(body.clone())
                .map_err(|e| PatchError::RuleParse(format!("class '{}': {}", class, e)))?;
            entries.insert(class.clone(), entry);
        }

        Ok(Rule { entries })
    }

    /// Relations of a class, if the rule mentions it
    pub fn entry(&self, class: &str) -> Option<&RuleEntry> {
        self.entries.get(class)
    }

    /// Classes with an entry, sorted
    pub fn classes(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
