//! Mirror table: scaled copies of one entity's input applied to others.
//!
//! This is a demo fixture for checking that several bodies stay in sync.
//! Links go from a source entity to a list of `(target, scale)`. Whenever the
//! source receives an input, each target is displaced by the same input
//! multiplied by its scale. Links are one level deep; a target never
//! propagates further.

use protocol::EntityId;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MirrorError {
    #[error("Entity {0} cannot mirror itself")]
    SelfLink(EntityId),

    #[error("Entity {0} is a mirror source and cannot be a mirror target")]
    TargetIsSource(EntityId),

    #[error("Entity {0} is already a mirror target")]
    AlreadyMirrored(EntityId),

    #[error("Entity {0} is a mirror target and cannot be a mirror source")]
    SourceIsTarget(EntityId),

    #[error("Entity {0} is the primary entity and cannot be a mirror target")]
    PrimaryTarget(EntityId),

    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
}

/// A single mirror relationship.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorLink {
    pub target: EntityId,
    pub scale: f32,
}

#[derive(Debug)]
pub struct MirrorTable {
    enabled: bool,
    links: HashMap<EntityId, Vec<MirrorLink>>,
    /// target -> source, for O(1) membership checks.
    sources: HashMap<EntityId, EntityId>,
}

impl Default for MirrorTable {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MirrorTable {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            links: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    /// Add a link from `source` to `target`.
    pub fn link(
        &mut self,
        source: EntityId,
        target: EntityId,
        scale: f32,
    ) -> Result<(), MirrorError> {
        if source == target {
            return Err(MirrorError::SelfLink(source));
        }
        if self.links.contains_key(&target) {
            return Err(MirrorError::TargetIsSource(target));
        }
        if self.sources.contains_key(&target) {
            return Err(MirrorError::AlreadyMirrored(target));
        }
        if self.sources.contains_key(&source) {
            return Err(MirrorError::SourceIsTarget(source));
        }

        self.links
            .entry(source)
            .or_default()
            .push(MirrorLink { target, scale });
        self.sources.insert(target, source);
        Ok(())
    }

    /// Remove `target` from whatever source it mirrors. No-op if absent.
    pub fn unlink(&mut self, target: EntityId) {
        let Some(source) = self.sources.remove(&target) else {
            return;
        };
        if let Some(links) = self.links.get_mut(&source) {
            links.retain(|l| l.target != target);
            if links.is_empty() {
                self.links.remove(&source);
            }
        }
    }

    /// Links driven by `source`. Empty when disabled or when `source` drives nothing.
    pub fn links_from(&self, source: EntityId) -> &[MirrorLink] {
        if !self.enabled {
            return &[];
        }
        self.links.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Scale applied to `target`, if it is a mirror.
    pub fn coefficient(&self, target: EntityId) -> Option<f32> {
        let source = self.sources.get(&target)?;
        self.links
            .get(source)?
            .iter()
            .find(|l| l.target == target)
            .map(|l| l.scale)
    }

    /// Whether `id` is a key (mirror target) of the table.
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Number of mirror targets.
    #[inline]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_and_lookup() {
        let mut table = MirrorTable::default();
        table.link(1, 2, 0.5).unwrap();
        table.link(1, 3, -1.0).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.coefficient(2), Some(0.5));
        assert_eq!(table.coefficient(3), Some(-1.0));
        assert_eq!(table.coefficient(1), None);
        assert!(!table.contains(1));
        assert_eq!(table.links_from(1).len(), 2);
        assert!(table.links_from(2).is_empty());
    }

    #[test]
    fn test_rejects_invalid_links() {
        let mut table = MirrorTable::default();
        assert_eq!(table.link(1, 1, 1.0), Err(MirrorError::SelfLink(1)));

        table.link(1, 2, 1.0).unwrap();
        assert_eq!(table.link(5, 1, 1.0), Err(MirrorError::TargetIsSource(1)));
        assert_eq!(table.link(5, 2, 1.0), Err(MirrorError::AlreadyMirrored(2)));
        assert_eq!(table.link(2, 6, 1.0), Err(MirrorError::SourceIsTarget(2)));
    }

    #[test]
    fn test_unlink() {
        let mut table = MirrorTable::default();
        table.link(1, 2, 2.0).unwrap();
        table.unlink(2);
        table.unlink(42);
        assert!(table.is_empty());
        assert!(table.links_from(1).is_empty());
        // The freed target may follow another source.
        table.link(9, 2, 1.0).unwrap();
        assert_eq!(table.coefficient(2), Some(1.0));
    }

    #[test]
    fn test_disabled_table_drives_nothing() {
        let mut table = MirrorTable::new(false);
        table.link(1, 2, 1.5).unwrap();
        assert!(table.links_from(1).is_empty());
        assert_eq!(table.coefficient(2), Some(1.5));

        table.set_enabled(true);
        assert_eq!(table.links_from(1), &[MirrorLink { target: 2, scale: 1.5 }]);
    }
}
