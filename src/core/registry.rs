use std::collections::HashMap;

use serde::Serialize;
use tabled::Tabled;
use tracing::debug;

use crate::core::workflow::WorkflowUnit;
use crate::domain::error::{NimareError, NimareResult};

/// Tokens the dispatcher answers itself before command lookup
pub const RESERVED_NAMES: &[&str] = &["help", "-h", "--help", "-V", "--version"];

/// Name and description of a registered command, for help listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Tabled)]
pub struct CommandSummary {
    #[tabled(rename = "Command")]
    pub name: &'static str,
    #[tabled(rename = "Description")]
    pub about: &'static str,
}

/// Startup-time accumulator of workflow units.
///
/// Units are added with [`RegistryBuilder::register`] and frozen into a
/// read-only [`CommandRegistry`] by [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    units: Vec<Box<dyn WorkflowUnit>>,
    index: HashMap<&'static str, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `unit` under its own name.
    ///
    /// # Errors
    /// Returns [`NimareError::DuplicateCommand`] if the name is already taken,
    /// and [`NimareError::ReservedCommand`] for one of [`RESERVED_NAMES`].
    pub fn register<U>(&mut self, unit: U) -> NimareResult<&mut Self>
    where
        U: WorkflowUnit + 'static,
    {
        self.register_boxed(Box::new(unit))
    }

    pub fn register_boxed(&mut self, unit: Box<dyn WorkflowUnit>) -> NimareResult<&mut Self> {
        let name = unit.name();
        if RESERVED_NAMES.contains(&name) {
            return Err(NimareError::ReservedCommand {
                name: name.to_string(),
            });
        }
        if self.index.contains_key(name) {
            return Err(NimareError::DuplicateCommand {
                name: name.to_string(),
            });
        }
        debug!(command = name, position = self.units.len(), "registered workflow");
        self.index.insert(name, self.units.len());
        self.units.push(unit);
        Ok(self)
    }

    /// Freeze the accumulated units.
    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            units: self.units,
            index: self.index,
        }
    }
}

/// Frozen mapping from command name to workflow unit, in registration order
pub struct CommandRegistry {
    units: Vec<Box<dyn WorkflowUnit>>,
    index: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a unit by exact name.
    ///
    /// # Errors
    /// Returns [`NimareError::UnknownCommand`] when no unit has that name.
    pub fn resolve(&self, name: &str) -> NimareResult<&dyn WorkflowUnit> {
        self.index
            .get(name)
            .and_then(|&position| self.units.get(position))
            .map(|unit| unit.as_ref())
            .ok_or_else(|| NimareError::UnknownCommand {
                name: name.to_string(),
            })
    }

    /// Registered commands in registration order. The iterator is lazy and
    /// can be cloned to restart it.
    pub fn list(&self) -> impl Iterator<Item = CommandSummary> + Clone + '_ {
        self.units.iter().map(|unit| CommandSummary {
            name: unit.name(),
            about: unit.about(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.units.iter().map(|unit| unit.name())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ArgumentSchema, BoundArgs};
    use crate::core::workflow::Outcome;

    struct Named(&'static str);

    impl WorkflowUnit for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn about(&self) -> &'static str {
            "test unit"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
        }

        fn invoke(&self, _args: &BoundArgs) -> Outcome {
            Ok(serde_json::Value::String(self.0.to_string()))
        }
    }

    fn registry(names: &[&'static str]) -> CommandRegistry {
        let mut builder = RegistryBuilder::new();
        for name in names {
            builder.register(Named(name)).unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_resolve_exact_name() {
        let registry = registry(&["ale", "scale"]);
        let unit = registry.resolve("scale").unwrap();
        assert_eq!(unit.name(), "scale");
        assert_eq!(
            unit.invoke(&BoundArgs::new()).unwrap(),
            serde_json::Value::String("scale".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_partial_and_case_variants() {
        let registry = registry(&["metacluster"]);
        for candidate in ["meta", "METACLUSTER", "metacluster ", ""] {
            let err = registry.resolve(candidate).err().unwrap();
            assert!(matches!(err, NimareError::UnknownCommand { ref name } if name == candidate));
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = RegistryBuilder::new();
        builder.register(Named("ale")).unwrap();
        builder.register(Named("scale")).unwrap();
        let err = builder.register(Named("ale")).err().unwrap();
        assert!(matches!(err, NimareError::DuplicateCommand { ref name } if name == "ale"));
        assert_eq!(builder.build().len(), 2);
    }

    #[test]
    fn test_reserved_names_are_rejected() {
        let mut builder = RegistryBuilder::new();
        for name in RESERVED_NAMES {
            let err = builder.register(Named(*name)).err().unwrap();
            assert!(matches!(err, NimareError::ReservedCommand { name: ref n } if n == name));
            assert_eq!(err.exit_code(), crate::domain::exit::SOFTWARE);
        }
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_list_preserves_order_and_restarts() {
        let registry = registry(&["scale", "ale", "conperm"]);
        let listing = registry.list();
        let first: Vec<_> = listing.clone().map(|c| c.name).collect();
        let second: Vec<_> = listing.map(|c| c.name).collect();
        assert_eq!(first, vec!["scale", "ale", "conperm"]);
        assert_eq!(first, second);
        assert_eq!(registry.list().count(), registry.len());
    }

    #[test]
    fn test_empty_registry() {
        let registry = RegistryBuilder::new().build();
        assert!(registry.is_empty());
        assert!(registry.resolve("ale").is_err());
        assert_eq!(registry.list().count(), 0);
    }
}
