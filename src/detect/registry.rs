use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{DetectorFactory, TrackingDetector};

/// Registry of detector factories, keyed by backend name.
///
/// Factories are shared between workers; each job asks for its own detector.
#[derive(Clone)]
pub struct DetectorRegistry {
    factories: HashMap<String, Arc<dyn DetectorFactory>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a factory. The first registered factory becomes the default.
    pub fn register<F: DetectorFactory + 'static>(&mut self, factory: F) {
        let name = factory.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.factories.insert(name, Arc::new(factory));
    }

    /// Set default factory by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DetectorFactory>> {
        self.factories.get(name).cloned()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a detector for `video_ref` from the named backend, or the default.
    pub fn create(&self, name: Option<&str>, video_ref: &Path) -> Result<Box<dyn TrackingDetector>> {
        let name = name
            .or(self.default_name.as_deref())
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let factory = self
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        factory.create(video_ref)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{NullFactory, ReplayFactory, TrackScript};

    #[test]
    fn first_registered_is_default() {
        let mut registry = DetectorRegistry::new();
        registry.register(NullFactory);
        registry.register(ReplayFactory::from_script(TrackScript::default()));
        assert_eq!(registry.default_name(), Some("null"));
        assert_eq!(registry.list(), vec!["null", "replay"]);

        let detector = registry.create(None, Path::new("stub://a")).unwrap();
        assert_eq!(detector.name(), "null");

        registry.set_default("replay").unwrap();
        let detector = registry.create(None, Path::new("stub://a")).unwrap();
        assert_eq!(detector.name(), "replay");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = DetectorRegistry::new();
        assert!(registry.create(None, Path::new("x.mp4")).is_err());
        registry.register(NullFactory);
        assert!(registry.set_default("yolo").is_err());
        assert!(registry.create(Some("yolo"), Path::new("x.mp4")).is_err());
    }
}
