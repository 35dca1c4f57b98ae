//! Manifest Assembler
//!
//! Turns a [`ManifestRequest`] into a [`Manifest`] with exactly one action
//! and one source ingredient, plus the location, training-permission and
//! authorship assertions the request asks for.

use chrono::Utc;
use tracing::debug;

use super::assertions;
use super::{
    Action, ActionKind, Assertion, Ingredient, Manifest, Relationship, ResourceRef,
    SerializedManifest, ACTIONS_LABEL, DIGITAL_CAPTURE_SOURCE_TYPE,
};
use crate::types::{Location, ProofmarkError, Result};

/// Default claim generator string
pub fn default_claim_generator() -> String {
    format!("proofmark/{}", env!("CARGO_PKG_VERSION"))
}

/// Inputs for one manifest.
#[derive(Debug, Clone)]
pub struct ManifestRequest {
    pub file_name: String,
    pub format: String,
    /// `c2pa.created` when true, `c2pa.placed` otherwise
    pub is_direct_capture: bool,
    pub software_agent: String,
    /// Source ingredient; derived from file name and format when absent
    pub ingredient: Option<Ingredient>,
    pub location: Option<Location>,
    pub allow_ai_training: bool,
    pub author: Option<String>,
    pub thumbnail: Option<ResourceRef>,
    pub assertions: Vec<Assertion>,
}

impl ManifestRequest {
    pub fn new(file_name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            format: format.into(),
            is_direct_capture: false,
            software_agent: default_claim_generator(),
            ingredient: None,
            location: None,
            allow_ai_training: false,
            author: None,
            thumbnail: None,
            assertions: Vec::new(),
        }
    }

    pub fn direct_capture(mut self, is_direct_capture: bool) -> Self {
        self.is_direct_capture = is_direct_capture;
        self
    }

    pub fn software_agent(mut self, agent: impl Into<String>) -> Self {
        self.software_agent = agent.into();
        self
    }

    pub fn ingredient(mut self, ingredient: Ingredient) -> Self {
        self.ingredient = Some(ingredient);
        self
    }

    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn allow_ai_training(mut self, allowed: bool) -> Self {
        self.allow_ai_training = allowed;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn thumbnail(mut self, thumbnail: ResourceRef) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Additional caller assertion. Labels must be unique.
    pub fn assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }
}

/// Builds manifests with a fixed claim generator.
#[derive(Debug, Clone)]
pub struct ManifestAssembler {
    claim_generator: String,
}

impl Default for ManifestAssembler {
    fn default() -> Self {
        Self::new(default_claim_generator())
    }
}

impl ManifestAssembler {
    pub fn new(claim_generator: impl Into<String>) -> Self {
        Self {
            claim_generator: claim_generator.into(),
        }
    }

    pub fn claim_generator(&self) -> &str {
        &self.claim_generator
    }

    pub fn build(&self, request: &ManifestRequest) -> Result<Manifest> {
        if request.file_name.trim().is_empty() {
            return Err(ProofmarkError::Manifest("File name is required".into()));
        }
        if request.format.trim().is_empty() {
            return Err(ProofmarkError::Manifest("Format is required".into()));
        }

        let action = if request.is_direct_capture {
            Action {
                action: ActionKind::Created,
                when: Utc::now(),
                software_agent: request.software_agent.clone(),
                digital_source_type: Some(DIGITAL_CAPTURE_SOURCE_TYPE.to_string()),
            }
        } else {
            Action {
                action: ActionKind::Placed,
                when: Utc::now(),
                software_agent: request.software_agent.clone(),
                digital_source_type: None,
            }
        };

        let ingredient = request.ingredient.clone().unwrap_or_else(|| Ingredient {
            title: request.file_name.clone(),
            format: request.format.clone(),
            relationship: Relationship::ParentOf,
        });

        let mut assertion_list = Vec::with_capacity(request.assertions.len() + 3);
        if let Some(author) = &request.author {
            assertion_list.push(assertions::creative_work(author));
        }
        if let Some(location) = &request.location {
            assertion_list.push(assertions::location(location));
        }
        assertion_list.push(assertions::training_mining(request.allow_ai_training));

        for extra in &request.assertions {
            if extra.label == ACTIONS_LABEL {
                return Err(ProofmarkError::Manifest(format!(
                    "{ACTIONS_LABEL} is managed by the assembler"
                )));
            }
            assertion_list.push(extra.clone());
        }

        let manifest = Manifest {
            claim_generator: self.claim_generator.clone(),
            title: request.file_name.clone(),
            format: request.format.clone(),
            actions: vec![action],
            ingredients: vec![ingredient],
            assertions: assertion_list,
            thumbnail: request.thumbnail.clone(),
        };
        manifest.validate()?;

        debug!(
            title = %manifest.title,
            format = %manifest.format,
            assertions = manifest.assertions.len(),
            "Assembled manifest"
        );
        Ok(manifest)
    }

    /// Build and serialize in one step.
    pub fn build_manifest(&self, request: &ManifestRequest) -> Result<SerializedManifest> {
        self.build(request)?.to_json()
    }
}
