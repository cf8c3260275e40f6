//! Callback registration tables.
//!
//! Tables live behind `Rc` so a parser cloned as a template shares them until
//! one side registers something (`Rc::make_mut` copies on first write).

use crate::callback::Callback;
use crate::quote_tags::QuoteTagIndex;
use crate::value::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

pub(crate) type Table = BTreeMap<String, Callback>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TableKind {
    Tags,
    Containers,
    Entities,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Registry {
    pub tags: Rc<Table>,
    pub containers: Rc<Table>,
    pub entities: Rc<Table>,
    pub quote_tags: Rc<QuoteTagIndex>,
    /// Called for tags with no registration.
    pub tag_callback: Option<Callback>,
    /// Called for literal text between constructs.
    pub data_callback: Option<Callback>,
    /// Called for entities with no registration.
    pub entity_callback: Option<Callback>,
    /// Appended to every callback's extra values.
    pub extra: Rc<Vec<Value>>,
}

impl Registry {
    pub(crate) fn table(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::Tags => &self.tags,
            TableKind::Containers => &self.containers,
            TableKind::Entities => &self.entities,
        }
    }

    pub(crate) fn table_mut(&mut self, kind: TableKind) -> &mut Table {
        let table = match kind {
            TableKind::Tags => &mut self.tags,
            TableKind::Containers => &mut self.containers,
            TableKind::Entities => &mut self.entities,
        };
        Rc::make_mut(table)
    }

    pub(crate) fn quote_tags_mut(&mut self) -> &mut QuoteTagIndex {
        Rc::make_mut(&mut self.quote_tags)
    }

    /// Entities are only scanned for when something would receive them.
    pub(crate) fn entities_active(&self) -> bool {
        !self.entities.is_empty() || self.entity_callback.is_some()
    }

    pub(crate) fn is_known_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name) || self.containers.contains_key(name)
    }

    /// Lowercase tag, container and quote-tag names. Entity names stay
    /// case-sensitive.
    pub(crate) fn fold_tag_names(&mut self) {
        for kind in [TableKind::Tags, TableKind::Containers] {
            if self.table(kind).keys().all(|name| *name == name.to_lowercase()) {
                continue;
            }
            let table = self.table_mut(kind);
            let folded: Table = std::mem::take(table)
                .into_iter()
                .map(|(name, callback)| (name.to_lowercase(), callback))
                .collect();
            *table = folded;
        }
        if !self.quote_tags.is_empty() {
            self.quote_tags_mut().fold_names();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_copies_share_until_written() {
        let mut original = Registry::default();
        original
            .table_mut(TableKind::Tags)
            .insert("br".to_string(), Callback::literal("\n"));
        let mut copy = original.clone();
        assert!(Rc::ptr_eq(&original.tags, &copy.tags));

        copy.table_mut(TableKind::Tags)
            .insert("hr".to_string(), Callback::literal("--"));
        assert!(!Rc::ptr_eq(&original.tags, &copy.tags));
        assert!(!original.tags.contains_key("hr"));
        assert!(copy.tags.contains_key("br"));
    }

    #[test]
    fn entity_activity_follows_registrations() {
        let mut registry = Registry::default();
        assert!(!registry.entities_active());
        registry.entity_callback = Some(Callback::literal("?"));
        assert!(registry.entities_active());
        registry.entity_callback = None;
        registry
            .table_mut(TableKind::Entities)
            .insert("amp".to_string(), Callback::literal("&"));
        assert!(registry.entities_active());
    }

    #[test]
    fn folding_lowercases_tags_but_not_entities() {
        let mut registry = Registry::default();
        registry
            .table_mut(TableKind::Containers)
            .insert("B".to_string(), Callback::literal(""));
        registry
            .table_mut(TableKind::Entities)
            .insert("Auml".to_string(), Callback::literal("Ä"));
        registry.fold_tag_names();
        assert!(registry.is_known_tag("b"));
        assert!(registry.entities.contains_key("Auml"));
    }
}
