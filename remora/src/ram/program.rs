//! This module defines [Program], the unit handed to the execution engine.

use hashbrown::HashMap;

use super::{
    relation::{RelationDecl, RelationId},
    statement::Statement,
};

/// A compiled relational-algebra program: the declared relations, the main
/// statement, and the independently invocable subroutines.
#[derive(Debug, Clone)]
pub struct Program {
    relations: Vec<RelationDecl>,
    main: Statement,
    subroutines: HashMap<String, Statement>,
}

impl Program {
    /// Create a program from its relation declarations and main statement.
    pub fn new(relations: Vec<RelationDecl>, main: Statement) -> Self {
        Self {
            relations,
            main,
            subroutines: HashMap::new(),
        }
    }

    /// Register a named subroutine. A subroutine is an independently
    /// compiled statement executed on demand with its own argument and
    /// return slots.
    pub fn add_subroutine(&mut self, name: impl Into<String>, body: Statement) {
        self.subroutines.insert(name.into(), body);
    }

    /// The declared relations, in [RelationId] order.
    pub fn relations(&self) -> &[RelationDecl] {
        &self.relations
    }

    /// The main statement.
    pub fn main(&self) -> &Statement {
        &self.main
    }

    /// Look up a subroutine body by name.
    pub fn subroutine(&self, name: &str) -> Option<&Statement> {
        self.subroutines.get(name)
    }

    /// Resolve a relation name to its id.
    pub fn relation_id(&self, name: &str) -> Option<RelationId> {
        self.relations
            .iter()
            .position(|declaration| declaration.name() == name)
            .map(RelationId::new)
    }
}
