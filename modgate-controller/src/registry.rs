//! Ordered, append-only collection of tags.

use std::collections::HashMap;

use thiserror::Error;

use crate::tag::Tag;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Duplicate tag name '{0}'")]
    DuplicateName(String),
}

/// Tags in configuration order, indexed by name.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: Vec<Tag>,
    index: HashMap<String, usize>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag, returning its position.
    pub fn push(&mut self, tag: Tag) -> Result<usize, RegistryError> {
        if self.index.contains_key(tag.name()) {
            return Err(RegistryError::DuplicateName(tag.name().to_string()));
        }

        let position = self.tags.len();
        self.index.insert(tag.name().to_string(), position);
        self.tags.push(tag);
        Ok(position)
    }

    /// Look up a tag by name.
    pub fn find(&self, name: &str) -> Option<&Tag> {
        self.position(name).map(|i| &self.tags[i])
    }

    /// Position of a tag in registry order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, position: usize) -> Option<&Tag> {
        self.tags.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Tags belonging to `group`; an empty group yields every tag.
    pub fn group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |tag| tag.in_group(group))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl<'a> IntoIterator for &'a TagRegistry {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Operation;

    fn registry() -> TagRegistry {
        let mut registry = TagRegistry::new();
        registry
            .push(Tag::new("temp", 1, Operation::READ_FLOAT).with_group("state"))
            .unwrap();
        registry
            .push(
                Tag::new("setpoint", 2, Operation::READ_UINT | Operation::WRITE_UINT)
                    .with_group("ust"),
            )
            .unwrap();
        registry
            .push(Tag::new("pressure", 3, Operation::READ_FLOAT).with_group("state"))
            .unwrap();
        registry
    }

    #[test]
    fn test_preserves_order() {
        let registry = registry();
        let names: Vec<&str> = registry.iter().map(|t| t.name()).collect();

        assert_eq!(names, vec!["temp", "setpoint", "pressure"]);
        assert_eq!(registry.position("pressure"), Some(2));
    }

    #[test]
    fn test_find() {
        let registry = registry();

        assert_eq!(registry.find("setpoint").map(|t| t.address()), Some(2));
        assert!(registry.find("nonexistent").is_none());
        assert!(TagRegistry::new().find("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = registry();
        let err = registry
            .push(Tag::new("temp", 9, Operation::READ_UINT))
            .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateName("temp".to_string()));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_group_filter() {
        let registry = registry();

        assert_eq!(registry.group("state").count(), 2);
        assert_eq!(registry.group("ust").count(), 1);
        assert_eq!(registry.group("").count(), 3);
        assert_eq!(registry.group("missing").count(), 0);
    }
}
