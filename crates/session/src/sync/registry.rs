use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Stopped,
    Running,
}

/// The content side the sync drives: whatever loads, starts and stops
/// resources and mounts downloaded archives.
pub trait ResourceRegistry {
    fn add(&mut self, name: &str, path: &str);
    fn delete(&mut self, name: &str);
    fn start(&mut self, name: &str);
    fn stop(&mut self, name: &str);
    fn is_running(&self, name: &str) -> bool;
    fn mount_archive(&mut self, path: &str);
    fn list(&self) -> Vec<String>;
    fn reset(&mut self);
}

/// In-memory registry, enough for the sync flow and for tests.
#[derive(Debug, Default)]
pub struct ResourceTable {
    resources: BTreeMap<String, (String, ResourceState)>,
    mounts: Vec<String>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_of(&self, name: &str) -> Option<&str> {
        self.resources.get(name).map(|(path, _)| path.as_str())
    }

    pub fn mounts(&self) -> &[String] {
        &self.mounts
    }
}

impl ResourceRegistry for ResourceTable {
    fn add(&mut self, name: &str, path: &str) {
        self.resources
            .insert(name.to_string(), (path.to_string(), ResourceState::Stopped));
    }

    fn delete(&mut self, name: &str) {
        self.resources.remove(name);
    }

    fn start(&mut self, name: &str) {
        if let Some((_, state)) = self.resources.get_mut(name) {
            *state = ResourceState::Running;
        }
    }

    fn stop(&mut self, name: &str) {
        if let Some((_, state)) = self.resources.get_mut(name) {
            *state = ResourceState::Stopped;
        }
    }

    fn is_running(&self, name: &str) -> bool {
        matches!(
            self.resources.get(name),
            Some((_, ResourceState::Running))
        )
    }

    fn mount_archive(&mut self, path: &str) {
        self.mounts.push(path.to_string());
    }

    fn list(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    fn reset(&mut self) {
        self.resources.clear();
        self.mounts.clear();
    }
}
