//! Capability declarations for record types.
//!
//! A capability belongs to a type, never to an instance. Declaring a type
//! both `Copiable` and `NonCopiable` is a configuration error; re-declaring a
//! `NonCopiable` type as `NonMigratable` narrows it, since `NonMigratable`
//! implies `NonCopiable`.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tetherrpc::Capability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    Conflict { type_name: String, existing: Capability, requested: Capability },
    /// Objects adopted for export must not be `Copiable`.
    CopiableObject(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { type_name, existing, requested } => write!(
                f,
                "type '{}' is declared {:?} and cannot also be {:?}",
                type_name, existing, requested
            ),
            Self::CopiableObject(interface) => {
                write!(f, "object '{}' claims Copiable but lives behind a reference", interface)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Default)]
pub struct TypeCatalog {
    tags: RwLock<HashMap<String, Capability>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, type_name: &str, capability: Capability) -> Result<(), CatalogError> {
        let mut tags = self.tags.write();
        let merged = match tags.get(type_name).copied() {
            None => capability,
            Some(existing) if existing == capability => return Ok(()),
            Some(existing) if existing.is_referenced() && capability.is_referenced() => {
                Capability::NonMigratable
            }
            Some(existing) => {
                return Err(CatalogError::Conflict {
                    type_name: type_name.to_string(),
                    existing,
                    requested: capability,
                });
            }
        };
        tags.insert(type_name.to_string(), merged);
        Ok(())
    }

    pub fn capability_of(&self, type_name: &str) -> Option<Capability> {
        self.tags.read().get(type_name).copied()
    }
}
