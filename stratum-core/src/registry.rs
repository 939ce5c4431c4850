use std::path::Path;

use sqlx::{Database, Executor};

use crate::changeset::Changeset;
use crate::error::{MigrationError, Result};
use crate::id::ChangesetId;
use crate::loader;

/// The known changesets, kept in [`ChangesetId`] order.
///
/// Names are validated on registration, so a misnamed changeset fails here
/// instead of silently landing in the wrong position.
pub struct Registry<DB: Database> {
    entries: Vec<(ChangesetId, Box<dyn Changeset<DB>>)>,
}

impl<DB: Database> Default for Registry<DB> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<DB: Database> Registry<DB> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, changeset: Box<dyn Changeset<DB>>) -> Result<&mut Self> {
        let id = ChangesetId::parse(changeset.name())?;
        match self.entries.binary_search_by(|(existing, _)| existing.cmp(&id)) {
            Ok(_) => Err(MigrationError::Duplicate(id.to_string())),
            Err(position) => {
                self.entries.insert(position, (id, changeset));
                Ok(self)
            }
        }
    }

    /// Builder form of [`Registry::register`].
    pub fn with<C>(mut self, changeset: C) -> Result<Self>
    where
        C: Changeset<DB> + 'static,
    {
        self.register(Box::new(changeset))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Changeset<DB>> {
        self.entries
            .iter()
            .find(|(id, _)| id.name() == name)
            .map(|(_, changeset)| changeset.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Changesets in order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Changeset<DB>> {
        self.entries.iter().map(|(_, changeset)| changeset.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &ChangesetId> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<DB> Registry<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    /// Registers every SQL changeset file found in `dir`.
    pub fn load_directory(&mut self, dir: &Path) -> Result<&mut Self> {
        for changeset in loader::load_directory(dir)? {
            self.register(Box::new(changeset))?;
        }
        Ok(self)
    }

    pub fn from_directory(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        registry.load_directory(dir)?;
        Ok(registry)
    }
}
