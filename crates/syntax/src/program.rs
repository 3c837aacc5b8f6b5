//! Checked programs and their elaboration

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ore_common::Location;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{Ast, CompositeDecl, CompositeKind, Declaration, FunctionDecl, TransactionDecl};
use crate::checker::Checker;
use crate::error::{Result, SyntaxError};
use crate::parser::parse_program;

/// Time spent producing a program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMetrics {
    pub parse: Duration,
    pub check: Duration,
}

/// Declarations of a program indexed for the interpreter
#[derive(Debug, Clone, Default)]
pub struct Elaboration {
    composites: HashMap<String, Arc<CompositeDecl>>,
    functions: HashMap<String, Arc<FunctionDecl>>,
    entitlements: BTreeSet<String>,
    contract: Option<Arc<CompositeDecl>>,
    transaction: Option<Arc<TransactionDecl>>,
}

impl Elaboration {
    /// Index the declarations of `ast`
    pub fn build(ast: &Ast) -> Self {
        let mut elaboration = Elaboration::default();
        for declaration in &ast.declarations {
            match declaration {
                Declaration::Composite(composite) => {
                    if composite.kind == CompositeKind::Contract && elaboration.contract.is_none() {
                        elaboration.contract = Some(composite.clone());
                    }
                    elaboration.index_composite(String::new(), composite);
                }
                Declaration::Function(function) => {
                    elaboration
                        .functions
                        .entry(function.name.clone())
                        .or_insert_with(|| function.clone());
                }
                Declaration::Transaction(transaction) => {
                    if elaboration.transaction.is_none() {
                        elaboration.transaction = Some(transaction.clone());
                    }
                }
                Declaration::Entitlement(name) => {
                    elaboration.entitlements.insert(name.clone());
                }
            }
        }
        elaboration
    }

    fn index_composite(&mut self, prefix: String, composite: &Arc<CompositeDecl>) {
        let qualified = if prefix.is_empty() {
            composite.name.clone()
        } else {
            format!("{}.{}", prefix, composite.name)
        };
        for nested in &composite.composites {
            self.index_composite(qualified.clone(), nested);
        }
        for entitlement in &composite.entitlements {
            self.entitlements.insert(format!("{}.{}", qualified, entitlement));
        }
        self.composites.entry(qualified).or_insert_with(|| composite.clone());
    }

    /// Composite by qualified identifier, e.g. `Token.Vault`
    pub fn composite(&self, qualified: &str) -> Option<&Arc<CompositeDecl>> {
        self.composites.get(qualified)
    }

    /// All composites with their qualified identifiers
    pub fn composites(&self) -> impl Iterator<Item = (&String, &Arc<CompositeDecl>)> {
        self.composites.iter()
    }

    pub fn function(&self, name: &str) -> Option<&Arc<FunctionDecl>> {
        self.functions.get(name)
    }

    pub fn has_entitlement(&self, qualified: &str) -> bool {
        self.entitlements.contains(qualified)
    }

    /// The contract declared by the program, if any
    pub fn contract(&self) -> Option<&Arc<CompositeDecl>> {
        self.contract.as_ref()
    }

    pub fn transaction(&self) -> Option<&Arc<TransactionDecl>> {
        self.transaction.as_ref()
    }
}

/// A parsed and checked program
#[derive(Debug)]
pub struct Program {
    pub location: Location,
    pub ast: Ast,
    pub elaboration: Elaboration,
    pub metrics: ProgramMetrics,
}

/// Parse and check `source`
pub fn parse_and_check(source: &str, location: Location) -> Result<Arc<Program>> {
    let started = Instant::now();
    let ast = parse_program(source, &location)?;
    let parse = started.elapsed();

    let started = Instant::now();
    let elaboration = Elaboration::build(&ast);
    let errors = Checker::new(&elaboration).check(&ast);
    let check = started.elapsed();
    if !errors.is_empty() {
        debug!(%location, errors = errors.len(), "Program failed checking");
        return Err(SyntaxError::Check { location, errors });
    }

    debug!(%location, ?parse, ?check, "Parsed and checked program");
    Ok(Arc::new(Program {
        location,
        ast,
        elaboration,
        metrics: ProgramMetrics { parse, check },
    }))
}
