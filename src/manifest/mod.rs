//! Provenance manifests
//!
//! A [`Manifest`] is the claim handed to the signing engine: who generated it,
//! what the asset is, what happened to it (actions), what it was derived from
//! (ingredients) and any labelled facts (assertions).
//!
//! ## Wire format
//!
//! Actions travel as the `c2pa.actions` assertion, so the serialized document
//! carries a single assertion list:
//!
//! ```json
//! {
//!   "claim_generator": "proofmark/0.1.0",
//!   "title": "IMG_0001.jpg",
//!   "format": "image/jpeg",
//!   "assertions": [
//!     { "label": "c2pa.actions", "data": { "actions": [ ... ] } },
//!     { "label": "stds.exif", "data": { ... } }
//!   ],
//!   "ingredients": [ { "title": "IMG_0001.jpg", "format": "image/jpeg", "relationship": "parentOf" } ]
//! }
//! ```

pub mod assembler;
pub mod assertions;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{ProofmarkError, Result};

pub use assembler::{ManifestAssembler, ManifestRequest};

/// Label of the assertion carrying the action list
pub const ACTIONS_LABEL: &str = "c2pa.actions";

/// IPTC digital source type for content captured directly by a device
pub const DIGITAL_CAPTURE_SOURCE_TYPE: &str =
    "http://cv.iptc.org/newscodes/digitalsourcetype/digitalCapture";

// =============================================================================
// Actions
// =============================================================================

/// Kind of action recorded in the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "c2pa.created")]
    Created,
    #[serde(rename = "c2pa.placed")]
    Placed,
    #[serde(rename = "c2pa.opened")]
    Opened,
    #[serde(rename = "c2pa.edited")]
    Edited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action: ActionKind,
    pub when: DateTime<Utc>,
    pub software_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digital_source_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActionsAssertion {
    actions: Vec<Action>,
}

// =============================================================================
// Ingredients, assertions, resources
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    ParentOf,
    ComponentOf,
    InputTo,
}

/// Reference to prior content this asset derives from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub title: String,
    pub format: String,
    pub relationship: Relationship,
}

/// Labelled structured fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub label: String,
    pub data: JsonValue,
}

impl Assertion {
    pub fn new(label: impl Into<String>, data: JsonValue) -> Self {
        Self {
            label: label.into(),
            data,
        }
    }
}

/// Reference to a binary resource (thumbnail) supplied alongside the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub format: String,
    pub identifier: String,
}

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub claim_generator: String,
    pub title: String,
    /// MIME type of the signed asset
    pub format: String,
    pub actions: Vec<Action>,
    pub ingredients: Vec<Ingredient>,
    /// Assertions other than the action list
    pub assertions: Vec<Assertion>,
    pub thumbnail: Option<ResourceRef>,
}

/// Serialized shape of a manifest.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestDefinition {
    claim_generator: String,
    title: String,
    format: String,
    #[serde(default)]
    assertions: Vec<Assertion>,
    #[serde(default)]
    ingredients: Vec<Ingredient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail: Option<ResourceRef>,
}

impl Manifest {
    /// Reject duplicate assertion labels (the action list counts as one).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        seen.insert(ACTIONS_LABEL);
        for assertion in &self.assertions {
            if !seen.insert(assertion.label.as_str()) {
                return Err(ProofmarkError::Manifest(format!(
                    "Duplicate assertion label: {}",
                    assertion.label
                )));
            }
        }
        Ok(())
    }

    pub fn assertion(&self, label: &str) -> Option<&Assertion> {
        self.assertions.iter().find(|a| a.label == label)
    }

    pub fn to_json(&self) -> Result<SerializedManifest> {
        self.validate()?;

        let actions = serde_json::to_value(ActionsAssertion {
            actions: self.actions.clone(),
        })?;
        let mut assertions = Vec::with_capacity(self.assertions.len() + 1);
        assertions.push(Assertion::new(ACTIONS_LABEL, actions));
        assertions.extend(self.assertions.iter().cloned());

        let definition = ManifestDefinition {
            claim_generator: self.claim_generator.clone(),
            title: self.title.clone(),
            format: self.format.clone(),
            assertions,
            ingredients: self.ingredients.clone(),
            thumbnail: self.thumbnail.clone(),
        };
        Ok(SerializedManifest(serde_json::to_string(&definition)?))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: ManifestDefinition = serde_json::from_str(json)?;

        let mut actions = None;
        let mut assertions = Vec::with_capacity(definition.assertions.len());
        for assertion in definition.assertions {
            if assertion.label != ACTIONS_LABEL {
                assertions.push(assertion);
                continue;
            }
            if actions.is_some() {
                return Err(ProofmarkError::Manifest(format!(
                    "Duplicate assertion label: {ACTIONS_LABEL}"
                )));
            }
            let parsed: ActionsAssertion = serde_json::from_value(assertion.data)?;
            actions = Some(parsed.actions);
        }

        let manifest = Self {
            claim_generator: definition.claim_generator,
            title: definition.title,
            format: definition.format,
            actions: actions.unwrap_or_default(),
            ingredients: definition.ingredients,
            assertions,
            thumbnail: definition.thumbnail,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Manifest JSON as consumed by the signing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedManifest(String);

impl SerializedManifest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn parse(&self) -> Result<Manifest> {
        Manifest::from_json(&self.0)
    }
}

impl fmt::Display for SerializedManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
