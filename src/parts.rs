//! Part classification.
//!
//! Decides from a mesh's node name whether the part is user-customizable and
//! which customization category it belongs to. Matching is substring-based
//! against a small keyword table: export pipelines append numeric or version
//! suffixes to node names ("Shape027", "Shape027_1", "Shape027.002"), so
//! exact-name matching would break on every re-export. Keyword collisions
//! with unrelated node names are a configuration error, not a runtime fault.
//!
//! The keyword-to-category association has swapped between iterations of the
//! upstream asset, so the table is data: a versioned [`PartMap`] loadable
//! from JSON, never an assumption baked into logic.

use serde::{Deserialize, Serialize};

/// Customization category of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartCategory {
    /// The shoe's upper/vamp surface: texture library plus sliders.
    Surface,
    /// Laces: flat-color editing.
    Lace,
    /// Tongue label: texture library.
    Label,
}

/// One keyword rule: any node name containing `keyword` gets `category`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartRule {
    pub keyword: String,
    pub category: PartCategory,
}

/// Versioned keyword-to-category table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartMap {
    /// Bumped whenever the asset's naming convention changes.
    pub version: u32,
    pub rules: Vec<PartRule>,
}

impl PartMap {
    /// Classify a mesh node name. First matching rule wins; `None` means the
    /// part is not customizable.
    pub fn classify(&self, mesh_name: &str) -> Option<PartCategory> {
        self.rules
            .iter()
            .find(|rule| mesh_name.contains(rule.keyword.as_str()))
            .map(|rule| rule.category)
    }

    pub fn is_customizable(&self, mesh_name: &str) -> bool {
        self.classify(mesh_name).is_some()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for PartMap {
    /// The mapping observed in the latest asset iteration. Earlier versions
    /// had Shape026/Line040 assigned the other way around; anyone holding an
    /// older export should load their own table instead of relying on this.
    fn default() -> Self {
        let rule = |keyword: &str, category| PartRule {
            keyword: keyword.to_string(),
            category,
        };
        Self {
            version: 2,
            rules: vec![
                rule("Shape027", PartCategory::Surface),
                rule("Shape026", PartCategory::Lace),
                rule("Line040", PartCategory::Label),
                rule("Lace", PartCategory::Lace),
            ],
        }
    }
}
