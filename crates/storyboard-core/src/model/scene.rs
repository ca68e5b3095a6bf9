use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::image::ImagePayload;

/// A parsed scene, as handed over by the script parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleGuide {
    pub text: String,
}

impl StyleGuide {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Leading excerpt used in prompts; long guides are cut on a char boundary.
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.text.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Character,
    Environment,
    Prop,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub description: String,
    /// Ingested reference images. Populated by the reference collaborator.
    #[serde(skip)]
    pub reference_images: Vec<ImagePayload>,
}

impl EntityProfile {
    pub fn new(name: &str, kind: EntityKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            reference_images: Vec::new(),
        }
    }
}

/// Known characters, environments and props, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityCatalog {
    entities: BTreeMap<String, EntityProfile>,
}

impl EntityCatalog {
    pub fn new(profiles: impl IntoIterator<Item = EntityProfile>) -> Self {
        Self {
            entities: profiles.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntityProfile> {
        self.entities.get(name)
    }

    pub fn insert(&mut self, profile: EntityProfile) {
        self.entities.insert(profile.name.clone(), profile);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityProfile> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Reference images for the named entities, in the order given.
    pub fn reference_images(&self, names: &[String]) -> Vec<ImagePayload> {
        names
            .iter()
            .filter_map(|n| self.entities.get(n))
            .flat_map(|p| p.reference_images.iter().cloned())
            .collect()
    }
}

/// Everything the pipeline needs from the surrounding collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptInput {
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub style: StyleGuide,
    #[serde(default)]
    pub entities: Vec<EntityProfile>,
}

impl ScriptInput {
    pub fn catalog(&self) -> EntityCatalog {
        EntityCatalog::new(self.entities.iter().cloned())
    }
}
