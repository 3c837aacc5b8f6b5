//! Structural checks
//!
//! The checker does not infer types. It rejects programs whose shape is
//! wrong regardless of typing: redeclarations, resource annotations that
//! disagree with locally declared composites, copies of freshly created
//! resources, misplaced declarations and stray `break`/`continue`.

use std::collections::HashSet;

use ore_common::Range;

use crate::ast::*;
use crate::error::CheckError;
use crate::program::Elaboration;

pub struct Checker<'e> {
    elaboration: &'e Elaboration,
    errors: Vec<CheckError>,
    loop_depth: usize,
}

impl<'e> Checker<'e> {
    pub fn new(elaboration: &'e Elaboration) -> Self {
        Self {
            elaboration,
            errors: Vec::new(),
            loop_depth: 0,
        }
    }

    fn error<S: Into<String>>(&mut self, message: S, range: Range) {
        self.errors.push(CheckError::new(message, range));
    }

    /// Check `ast`, returning every error found
    pub fn check(mut self, ast: &Ast) -> Vec<CheckError> {
        let mut names = HashSet::new();
        let mut contracts = 0;
        let mut transactions = 0;
        for declaration in &ast.declarations {
            match declaration {
                Declaration::Composite(composite) => {
                    if !names.insert(composite.name.clone()) {
                        self.error(format!("cannot redeclare `{}`", composite.name), composite.range);
                    }
                    if composite.kind == CompositeKind::Contract {
                        contracts += 1;
                        if contracts > 1 {
                            self.error("a program may declare at most one contract", composite.range);
                        }
                    }
                    self.composite(composite, None);
                }
                Declaration::Function(function) => {
                    if !names.insert(function.name.clone()) {
                        self.error(format!("cannot redeclare `{}`", function.name), function.range);
                    }
                    self.function(function);
                }
                Declaration::Transaction(transaction) => {
                    transactions += 1;
                    if transactions > 1 {
                        self.error("a program may declare at most one transaction", transaction.range);
                    }
                    self.transaction(transaction);
                }
                Declaration::Entitlement(_) => {}
            }
        }
        self.errors
    }

    fn composite(&mut self, composite: &CompositeDecl, parent: Option<CompositeKind>) {
        if let Some(parent) = parent {
            if parent != CompositeKind::Contract {
                self.error(
                    format!("`{}` can only be nested in a contract", composite.name),
                    composite.range,
                );
            }
        }
        let mut members = HashSet::new();
        for field in &composite.fields {
            if !members.insert(field.name.clone()) {
                self.error(format!("duplicate member `{}`", field.name), field.range);
            }
            self.annotation(&field.ty, field.range);
            if composite.kind != CompositeKind::Resource
                && composite.kind != CompositeKind::Contract
                && composite.kind != CompositeKind::Event
                && self.is_resource(&field.ty)
            {
                self.error(
                    format!("struct `{}` cannot have resource field `{}`", composite.name, field.name),
                    field.range,
                );
            }
        }
        for function in &composite.functions {
            if !members.insert(function.name.clone()) {
                self.error(format!("duplicate member `{}`", function.name), function.range);
            }
            self.function(function);
        }
        if let Some(initializer) = &composite.initializer {
            self.function(initializer);
        }
        if let Some(destructor) = &composite.destructor {
            if composite.kind != CompositeKind::Resource {
                self.error(
                    format!("only resources can declare a destructor, `{}` is a {}", composite.name, composite.kind.keyword()),
                    destructor.range,
                );
            }
            self.function(destructor);
        }
        for nested in &composite.composites {
            if !members.insert(nested.name.clone()) {
                self.error(format!("duplicate member `{}`", nested.name), nested.range);
            }
            self.composite(nested, Some(composite.kind));
        }
    }

    fn transaction(&mut self, transaction: &TransactionDecl) {
        for parameter in &transaction.parameters {
            self.annotation(&parameter.ty, parameter.range);
        }
        for field in &transaction.fields {
            self.annotation(&field.ty, field.range);
        }
        if let Some(prepare) = &transaction.prepare {
            self.function(prepare);
        }
        for condition in transaction.pre.iter().chain(transaction.post.iter()) {
            self.expression(&condition.test);
        }
        if let Some(execute) = &transaction.execute {
            self.block(execute);
        }
    }

    fn function(&mut self, function: &FunctionDecl) {
        let mut parameters = HashSet::new();
        for parameter in &function.parameters {
            if !parameters.insert(parameter.name.clone()) {
                self.error(format!("duplicate parameter `{}`", parameter.name), parameter.range);
            }
            self.annotation(&parameter.ty, parameter.range);
        }
        if let Some(return_type) = &function.return_type {
            self.annotation(return_type, function.range);
        }
        for condition in function.body.pre.iter().chain(function.body.post.iter()) {
            self.expression(&condition.test);
        }
        let depth = std::mem::replace(&mut self.loop_depth, 0);
        for statement in &function.body.statements {
            self.statement(statement);
        }
        self.loop_depth = depth;
    }

    fn block(&mut self, block: &Block) {
        for statement in &block.statements {
            self.statement(statement);
        }
    }

    fn declaration(&mut self, decl: &VariableDecl) {
        if let Some(ty) = &decl.ty {
            self.annotation(ty, decl.range);
        }
        self.transfer(decl.transfer, &decl.value, decl.range);
        self.expression(&decl.value);
        if let Some((transfer, value)) = &decl.second {
            self.transfer(*transfer, value, decl.range);
            self.expression(value);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Variable(decl) => self.declaration(decl),
            StatementKind::Assignment {
                target,
                transfer,
                value,
            } => {
                self.transfer(*transfer, value, statement.range);
                self.expression(target);
                self.expression(value);
            }
            StatementKind::Swap { left, right } => {
                self.expression(left);
                self.expression(right);
            }
            StatementKind::Expression(expression) | StatementKind::Emit(expression) => self.expression(expression),
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.expression(value);
                }
            }
            StatementKind::Break | StatementKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("`break` and `continue` are only valid inside a loop", statement.range);
                }
            }
            StatementKind::If { test, then, otherwise } => {
                match test {
                    IfTest::Expression(test) => self.expression(test),
                    IfTest::Binding(decl) => self.declaration(decl),
                }
                self.block(then);
                if let Some(otherwise) = otherwise {
                    self.block(otherwise);
                }
            }
            StatementKind::While { test, body } => {
                self.expression(test);
                self.loop_depth += 1;
                self.block(body);
                self.loop_depth -= 1;
            }
            StatementKind::For { iterable, body, .. } => {
                self.expression(iterable);
                self.loop_depth += 1;
                self.block(body);
                self.loop_depth -= 1;
            }
        }
    }

    fn transfer(&mut self, transfer: Transfer, value: &Expression, range: Range) {
        if transfer == Transfer::Copy && value.is_resource_producing() {
            self.error("incorrect transfer operation: resources must be moved with `<-`", range);
        }
    }

    fn expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExprKind::Function(function) => self.function(function),
            ExprKind::Array(elements) => elements.iter().for_each(|e| self.expression(e)),
            ExprKind::Dictionary(entries) => entries.iter().for_each(|(k, v)| {
                self.expression(k);
                self.expression(v);
            }),
            ExprKind::Member { target, .. } | ExprKind::Force(target) => self.expression(target),
            ExprKind::Index { target, index } => {
                self.expression(target);
                self.expression(index);
            }
            ExprKind::Invocation { target, arguments, .. } => {
                self.expression(target);
                arguments.iter().for_each(|a| self.expression(&a.value));
            }
            ExprKind::Cast { value, ty, .. } => {
                self.annotation(ty, expression.range);
                self.expression(value);
            }
            ExprKind::Reference { value, .. }
            | ExprKind::Create(value)
            | ExprKind::Destroy(value)
            | ExprKind::Move(value) => self.expression(value),
            ExprKind::Unary { operand, .. } => self.expression(operand),
            ExprKind::Binary { left, right, .. } => {
                self.expression(left);
                self.expression(right);
            }
            ExprKind::Conditional { test, then, otherwise } => {
                self.expression(test);
                self.expression(then);
                self.expression(otherwise);
            }
            _ => {}
        }
    }

    /// Compare the resource marker of an annotation with what the program
    /// itself declares
    fn annotation(&mut self, ty: &TypeExpr, range: Range) {
        let Some(resource) = self.resourceness(ty) else {
            return;
        };
        let annotated = has_marker(ty);
        if resource && !annotated {
            self.error(format!("missing resource annotation `@` on `{}`", ty), range);
        } else if !resource && annotated {
            self.error(format!("invalid resource annotation `@` on `{}`", ty), range);
        }
    }

    fn is_resource(&self, ty: &TypeExpr) -> bool {
        self.resourceness(ty).unwrap_or_else(|| has_marker(ty))
    }

    /// Whether `ty` is resource-kinded, when that can be decided locally
    fn resourceness(&self, ty: &TypeExpr) -> Option<bool> {
        match ty {
            TypeExpr::Resource(inner) | TypeExpr::Optional(inner) | TypeExpr::VariableArray(inner) => {
                self.resourceness(inner)
            }
            TypeExpr::Dictionary(_, value) => self.resourceness(value),
            TypeExpr::Reference { .. } => Some(false),
            TypeExpr::Nominal { name, .. } => {
                let qualified = name.join(".");
                match qualified.as_str() {
                    "AnyResource" => Some(true),
                    "AnyStruct" | "Int" | "UInt" | "String" | "Bool" | "Address" | "UFix64" | "Fix64" => Some(false),
                    _ => self
                        .elaboration
                        .composite(&qualified)
                        .or_else(|| {
                            self.elaboration
                                .contract()
                                .and_then(|contract| self.elaboration.composite(&format!("{}.{}", contract.name, qualified)))
                        })
                        .map(|composite| composite.kind == CompositeKind::Resource),
                }
            }
        }
    }
}

fn has_marker(ty: &TypeExpr) -> bool {
    match ty {
        TypeExpr::Resource(_) => true,
        TypeExpr::Optional(inner) | TypeExpr::VariableArray(inner) => has_marker(inner),
        TypeExpr::Dictionary(_, value) => has_marker(value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use ore_common::Location;
    use pretty_assertions::assert_eq;

    fn check(source: &str) -> Vec<String> {
        let ast = parse_program(source, &Location::String("test".into())).unwrap();
        let elaboration = Elaboration::build(&ast);
        Checker::new(&elaboration)
            .check(&ast)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_valid_contract() {
        let errors = check(
            r#"
            access(all) contract Bank {
                access(all) resource Vault {
                    access(all) var balance: UFix64
                    init(balance: UFix64) { self.balance = balance }
                    destroy() {}
                }
                access(all) fun createVault(): @Vault { return <- create Vault(balance: 1.0) }
                init() {}
            }
            "#,
        );
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_missing_resource_annotation() {
        let errors = check(
            r#"
            resource R {}
            fun make(): R { return <- create R() }
            "#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing resource annotation"));
    }

    #[test]
    fn test_create_requires_move() {
        let errors = check("resource R {}\nfun main() { let r = create R()\n destroy r }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("incorrect transfer operation"));
    }

    #[test]
    fn test_struct_destructor_and_stray_break() {
        let errors = check("struct S { destroy() {} }\nfun main() { break }");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_redeclaration() {
        let errors = check("fun a() {}\nfun a() {}");
        assert_eq!(errors, vec!["cannot redeclare `a`".to_string()]);
    }
}
