use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Produces images from a prompt plus reference images.
    Image,
    /// Answers questions about a single image.
    Vision,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Vision => "vision",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == "dryrun"
    }
}

/// Known models, in preference order per capability.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();
    let mut insert = |name: &str, provider: &str, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert("gemini-2.5-flash-image", "gemini", &[Capability::Image]);
    insert("gemini-3-pro-image-preview", "gemini", &[Capability::Image]);
    insert("gemini-2.5-flash", "gemini", &[Capability::Vision]);
    insert("gemini-3-pro-preview", "gemini", &[Capability::Vision]);
    insert("dryrun-image-1", "dryrun", &[Capability::Image]);
    insert("dryrun-vision-1", "dryrun", &[Capability::Vision]);
    map
}
