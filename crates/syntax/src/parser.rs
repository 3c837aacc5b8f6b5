//! Parser: pest grammar to AST

use std::iter::Peekable;
use std::sync::Arc;
use std::vec::IntoIter;

use ore_common::{Address, Location, PathDomain, Position, Range};
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::error::{Result, SyntaxError};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct OreParser;

/// Parse `source` into an AST
pub fn parse_program(source: &str, location: &Location) -> Result<Ast> {
    let mut pairs = OreParser::parse(Rule::program, source).map_err(|e| from_pest(location, e))?;
    let builder = Builder::new(location);
    let program = pairs
        .next()
        .ok_or_else(|| builder.malformed(Range::default(), "empty program"))?;
    builder.program(program)
}

fn from_pest(location: &Location, err: pest::error::Error<Rule>) -> SyntaxError {
    let (start, end) = match err.line_col {
        LineColLocation::Pos(pos) => (pos, pos),
        LineColLocation::Span(start, end) => (start, end),
    };
    SyntaxError::Parse {
        location: location.clone(),
        range: Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1)),
        message: err.variant.message().to_string(),
    }
}

fn range_of(pair: &Pair<Rule>) -> Range {
    let span = pair.as_span();
    let (start_line, start_column) = span.start_pos().line_col();
    let (end_line, end_column) = span.end_pos().line_col();
    Range::new(
        Position::new(start_line, start_column),
        Position::new(end_line, end_column),
    )
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::k_fun
            | Rule::k_return
            | Rule::k_if
            | Rule::k_else
            | Rule::k_while
            | Rule::k_for
            | Rule::k_in
            | Rule::k_break
            | Rule::k_continue
            | Rule::k_emit
            | Rule::k_import
            | Rule::k_from
            | Rule::k_transaction
            | Rule::k_prepare
            | Rule::k_execute
            | Rule::k_pre
            | Rule::k_post
            | Rule::k_init
            | Rule::k_destroy
            | Rule::k_event
            | Rule::k_entitlement
            | Rule::k_auth
    )
}

/// Significant children of a pair, keywords removed
struct Children<'i> {
    pairs: Peekable<IntoIter<Pair<'i, Rule>>>,
    rule: Rule,
    range: Range,
}

impl<'i> Children<'i> {
    fn new(pair: Pair<'i, Rule>) -> Self {
        let rule = pair.as_rule();
        let range = range_of(&pair);
        let pairs: Vec<Pair<'i, Rule>> = pair
            .into_inner()
            .filter(|p| !is_keyword(p.as_rule()))
            .collect();
        Self {
            pairs: pairs.into_iter().peekable(),
            rule,
            range,
        }
    }

    fn next_if(&mut self, rule: Rule) -> Option<Pair<'i, Rule>> {
        match self.pairs.peek() {
            Some(pair) if pair.as_rule() == rule => self.pairs.next(),
            _ => None,
        }
    }

    fn expect(&mut self, builder: &Builder, rule: Rule) -> Result<Pair<'i, Rule>> {
        self.next_if(rule).ok_or_else(|| {
            builder.malformed(self.range, format!("expected {:?} in {:?}", rule, self.rule))
        })
    }

    fn required(&mut self, builder: &Builder) -> Result<Pair<'i, Rule>> {
        self.next()
            .ok_or_else(|| builder.malformed(self.range, format!("incomplete {:?}", self.rule)))
    }
}

impl<'i> Iterator for Children<'i> {
    type Item = Pair<'i, Rule>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pairs.next()
    }
}

struct Builder<'l> {
    location: &'l Location,
    pratt: PrattParser<Rule>,
}

impl<'l> Builder<'l> {
    fn new(location: &'l Location) -> Self {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::op_coalesce, Assoc::Right))
            .op(Op::infix(Rule::op_or, Assoc::Left))
            .op(Op::infix(Rule::op_and, Assoc::Left))
            .op(Op::infix(Rule::op_eq, Assoc::Left)
                | Op::infix(Rule::op_ne, Assoc::Left)
                | Op::infix(Rule::op_lt, Assoc::Left)
                | Op::infix(Rule::op_le, Assoc::Left)
                | Op::infix(Rule::op_gt, Assoc::Left)
                | Op::infix(Rule::op_ge, Assoc::Left))
            .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
            .op(Op::infix(Rule::op_mul, Assoc::Left)
                | Op::infix(Rule::op_div, Assoc::Left)
                | Op::infix(Rule::op_mod, Assoc::Left))
            .op(Op::prefix(Rule::op_move)
                | Op::prefix(Rule::op_create)
                | Op::prefix(Rule::op_destroy)
                | Op::prefix(Rule::op_not)
                | Op::prefix(Rule::op_neg)
                | Op::prefix(Rule::op_ref))
            .op(Op::postfix(Rule::cast))
            .op(Op::postfix(Rule::member)
                | Op::postfix(Rule::optional_member)
                | Op::postfix(Rule::index)
                | Op::postfix(Rule::invocation)
                | Op::postfix(Rule::force));
        Self { location, pratt }
    }

    fn malformed<S: Into<String>>(&self, range: Range, message: S) -> SyntaxError {
        SyntaxError::Parse {
            location: self.location.clone(),
            range,
            message: message.into(),
        }
    }

    fn program(&self, pair: Pair<Rule>) -> Result<Ast> {
        let mut ast = Ast::default();
        for child in Children::new(pair) {
            match child.as_rule() {
                Rule::import_decl => ast.imports.push(self.import(child)?),
                Rule::composite_decl => ast
                    .declarations
                    .push(Declaration::Composite(Arc::new(self.composite(child)?))),
                Rule::event_decl => ast
                    .declarations
                    .push(Declaration::Composite(Arc::new(self.event(child)?))),
                Rule::entitlement_decl => ast.declarations.push(Declaration::Entitlement(self.entitlement(child)?)),
                Rule::function_decl => ast
                    .declarations
                    .push(Declaration::Function(Arc::new(self.function(child)?))),
                Rule::transaction_decl => ast
                    .declarations
                    .push(Declaration::Transaction(Arc::new(self.transaction(child)?))),
                _ => {}
            }
        }
        Ok(ast)
    }

    fn import(&self, pair: Pair<Rule>) -> Result<Import> {
        let mut children = Children::new(pair);
        let range = children.range;
        let identifiers = match children.next_if(Rule::import_names) {
            Some(names) => names.into_inner().map(|p| p.as_str().to_string()).collect(),
            None => Vec::new(),
        };
        let source = children.required(self)?;
        let location = match source.as_rule() {
            Rule::address_loc => ImportLocation::Address(
                Address::from_hex(source.as_str())
                    .map_err(|e| self.malformed(range_of(&source), e.to_string()))?,
            ),
            Rule::string_lit => ImportLocation::String(self.string(source)?),
            _ => ImportLocation::Identifier(source.as_str().to_string()),
        };
        Ok(Import {
            identifiers,
            location,
            range,
        })
    }

    fn access(children: &mut Children) -> Option<String> {
        children.next_if(Rule::access_mod).map(|p| p.as_str().to_string())
    }

    fn composite(&self, pair: Pair<Rule>) -> Result<CompositeDecl> {
        let mut children = Children::new(pair);
        let range = children.range;
        let access = Self::access(&mut children);
        let kind = match children.expect(self, Rule::composite_kind)?.as_str() {
            "resource" => CompositeKind::Resource,
            "contract" => CompositeKind::Contract,
            _ => CompositeKind::Struct,
        };
        let name = children.expect(self, Rule::identifier)?.as_str().to_string();
        let conformances = match children.next_if(Rule::conformances) {
            Some(list) => list.into_inner().map(|p| p.as_str().to_string()).collect(),
            None => Vec::new(),
        };
        let mut decl = CompositeDecl {
            access,
            kind,
            name,
            conformances,
            fields: Vec::new(),
            parameters: Vec::new(),
            initializer: None,
            destructor: None,
            functions: Vec::new(),
            composites: Vec::new(),
            entitlements: Vec::new(),
            range,
        };
        for member in children {
            match member.as_rule() {
                Rule::field_decl => decl.fields.push(self.field(member)?),
                Rule::initializer => {
                    let range = range_of(&member);
                    let mut parts = Children::new(member);
                    let access = Self::access(&mut parts);
                    let parameters = self.parameters(parts.expect(self, Rule::parameter_list)?)?;
                    let body = self.function_block(parts.expect(self, Rule::function_block)?)?;
                    decl.initializer = Some(Arc::new(FunctionDecl {
                        access,
                        name: "init".to_string(),
                        parameters,
                        return_type: None,
                        body,
                        range,
                    }));
                }
                Rule::destructor => {
                    let range = range_of(&member);
                    let mut parts = Children::new(member);
                    let body = self.function_block(parts.expect(self, Rule::function_block)?)?;
                    decl.destructor = Some(Arc::new(FunctionDecl {
                        access: None,
                        name: "destroy".to_string(),
                        parameters: Vec::new(),
                        return_type: None,
                        body,
                        range,
                    }));
                }
                Rule::composite_decl => decl.composites.push(Arc::new(self.composite(member)?)),
                Rule::event_decl => decl.composites.push(Arc::new(self.event(member)?)),
                Rule::entitlement_decl => decl.entitlements.push(self.entitlement(member)?),
                Rule::function_decl => decl.functions.push(Arc::new(self.function(member)?)),
                _ => {}
            }
        }
        Ok(decl)
    }

    fn event(&self, pair: Pair<Rule>) -> Result<CompositeDecl> {
        let mut children = Children::new(pair);
        let range = children.range;
        let access = Self::access(&mut children);
        let name = children.expect(self, Rule::identifier)?.as_str().to_string();
        let parameters = self.parameters(children.expect(self, Rule::parameter_list)?)?;
        let fields = parameters
            .iter()
            .map(|p| FieldDecl {
                access: None,
                kind: VariableKind::Let,
                name: p.name.clone(),
                ty: p.ty.clone(),
                range: p.range,
            })
            .collect();
        Ok(CompositeDecl {
            access,
            kind: CompositeKind::Event,
            name,
            conformances: Vec::new(),
            fields,
            parameters,
            initializer: None,
            destructor: None,
            functions: Vec::new(),
            composites: Vec::new(),
            entitlements: Vec::new(),
            range,
        })
    }

    fn entitlement(&self, pair: Pair<Rule>) -> Result<String> {
        let mut children = Children::new(pair);
        Self::access(&mut children);
        Ok(children.expect(self, Rule::identifier)?.as_str().to_string())
    }

    fn field(&self, pair: Pair<Rule>) -> Result<FieldDecl> {
        let mut children = Children::new(pair);
        let range = children.range;
        let access = Self::access(&mut children);
        let kind = self.variable_kind(children.expect(self, Rule::decl_kind)?);
        let name = children.expect(self, Rule::identifier)?.as_str().to_string();
        let ty = self.ty(children.expect(self, Rule::ty)?)?;
        Ok(FieldDecl {
            access,
            kind,
            name,
            ty,
            range,
        })
    }

    fn function(&self, pair: Pair<Rule>) -> Result<FunctionDecl> {
        let mut children = Children::new(pair);
        let range = children.range;
        let access = Self::access(&mut children);
        let name = match children.next_if(Rule::identifier) {
            Some(name) => name.as_str().to_string(),
            None => String::new(),
        };
        let parameters = self.parameters(children.expect(self, Rule::parameter_list)?)?;
        let return_type = match children.next_if(Rule::return_type) {
            Some(ret) => Some(self.ty(Children::new(ret).expect(self, Rule::ty)?)?),
            None => None,
        };
        let body = self.function_block(children.expect(self, Rule::function_block)?)?;
        Ok(FunctionDecl {
            access,
            name,
            parameters,
            return_type,
            body,
            range,
        })
    }

    fn parameters(&self, pair: Pair<Rule>) -> Result<Vec<Parameter>> {
        Children::new(pair)
            .map(|parameter| {
                let range = range_of(&parameter);
                let mut names = Vec::new();
                let mut ty = None;
                for part in Children::new(parameter) {
                    match part.as_rule() {
                        Rule::identifier => names.push(part.as_str().to_string()),
                        Rule::ty => ty = Some(self.ty(part)?),
                        _ => {}
                    }
                }
                let ty = ty.ok_or_else(|| self.malformed(range, "parameter without type"))?;
                let (label, name) = match names.len() {
                    2 => {
                        let name = names.pop().unwrap_or_default();
                        let label = names.pop().filter(|l| l != "_");
                        (label, name)
                    }
                    _ => {
                        let name = names.pop().unwrap_or_default();
                        (Some(name.clone()), name)
                    }
                };
                Ok(Parameter {
                    label,
                    name,
                    ty,
                    range,
                })
            })
            .collect()
    }

    fn function_block(&self, pair: Pair<Rule>) -> Result<FunctionBlock> {
        let mut block = FunctionBlock::default();
        for child in Children::new(pair) {
            match child.as_rule() {
                Rule::pre_conditions => block.pre = self.conditions(child)?,
                Rule::post_conditions => block.post = self.conditions(child)?,
                _ => block.statements.push(self.statement(child)?),
            }
        }
        Ok(block)
    }

    fn conditions(&self, pair: Pair<Rule>) -> Result<Vec<Condition>> {
        Children::new(pair)
            .map(|condition| {
                let range = range_of(&condition);
                let mut parts = Children::new(condition);
                let test = self.expression(parts.expect(self, Rule::expression)?)?;
                let message = match parts.next_if(Rule::expression) {
                    Some(message) => Some(self.expression(message)?),
                    None => None,
                };
                Ok(Condition { test, message, range })
            })
            .collect()
    }

    fn transaction(&self, pair: Pair<Rule>) -> Result<TransactionDecl> {
        let range = range_of(&pair);
        let mut decl = TransactionDecl {
            parameters: Vec::new(),
            fields: Vec::new(),
            prepare: None,
            pre: Vec::new(),
            execute: None,
            post: Vec::new(),
            range,
        };
        for child in Children::new(pair) {
            match child.as_rule() {
                Rule::parameter_list => decl.parameters = self.parameters(child)?,
                Rule::field_decl => decl.fields.push(self.field(child)?),
                Rule::prepare_block => {
                    let range = range_of(&child);
                    let mut parts = Children::new(child);
                    let parameters = self.parameters(parts.expect(self, Rule::parameter_list)?)?;
                    let body = self.function_block(parts.expect(self, Rule::function_block)?)?;
                    decl.prepare = Some(Arc::new(FunctionDecl {
                        access: None,
                        name: "prepare".to_string(),
                        parameters,
                        return_type: None,
                        body,
                        range,
                    }));
                }
                Rule::pre_conditions => decl.pre = self.conditions(child)?,
                Rule::execute_block => {
                    let mut parts = Children::new(child);
                    decl.execute = Some(self.block(parts.expect(self, Rule::block)?)?);
                }
                Rule::post_conditions => decl.post = self.conditions(child)?,
                _ => {}
            }
        }
        Ok(decl)
    }

    // Types

    fn ty(&self, pair: Pair<Rule>) -> Result<TypeExpr> {
        let mut resource = false;
        let mut optionals = 0;
        let mut base = None;
        let range = range_of(&pair);
        for part in Children::new(pair) {
            match part.as_rule() {
                Rule::resource_marker => resource = true,
                Rule::optional_marker => optionals += 1,
                _ => base = Some(self.base_type(part)?),
            }
        }
        let mut ty = base.ok_or_else(|| self.malformed(range, "missing type"))?;
        for _ in 0..optionals {
            ty = TypeExpr::Optional(Box::new(ty));
        }
        if resource {
            ty = TypeExpr::Resource(Box::new(ty));
        }
        Ok(ty)
    }

    fn base_type(&self, pair: Pair<Rule>) -> Result<TypeExpr> {
        let range = range_of(&pair);
        match pair.as_rule() {
            Rule::reference_type => {
                let mut authorization = Vec::new();
                let mut referenced = None;
                for part in Children::new(pair) {
                    match part.as_rule() {
                        Rule::authorization => {
                            authorization = Children::new(part).map(|p| p.as_str().to_string()).collect();
                        }
                        _ => referenced = Some(self.ty(part)?),
                    }
                }
                let referenced = referenced.ok_or_else(|| self.malformed(range, "missing referenced type"))?;
                Ok(TypeExpr::Reference {
                    authorization,
                    referenced: Box::new(referenced),
                })
            }
            Rule::array_type => {
                let element = self.ty(Children::new(pair).expect(self, Rule::ty)?)?;
                Ok(TypeExpr::VariableArray(Box::new(element)))
            }
            Rule::dictionary_type => {
                let mut parts = Children::new(pair);
                let key = self.ty(parts.expect(self, Rule::ty)?)?;
                let value = self.ty(parts.expect(self, Rule::ty)?)?;
                Ok(TypeExpr::Dictionary(Box::new(key), Box::new(value)))
            }
            Rule::nominal_type => {
                let mut parts = Children::new(pair);
                let name = parts
                    .expect(self, Rule::qualified_name)?
                    .into_inner()
                    .map(|p| p.as_str().to_string())
                    .collect();
                let arguments = match parts.next_if(Rule::type_arguments) {
                    Some(arguments) => self.type_arguments(arguments)?,
                    None => Vec::new(),
                };
                Ok(TypeExpr::Nominal { name, arguments })
            }
            other => Err(self.malformed(range, format!("unexpected {:?} in type", other))),
        }
    }

    fn type_arguments(&self, pair: Pair<Rule>) -> Result<Vec<TypeExpr>> {
        Children::new(pair).map(|ty| self.ty(ty)).collect()
    }

    // Statements

    fn block(&self, pair: Pair<Rule>) -> Result<Block> {
        let range = range_of(&pair);
        let statements = Children::new(pair)
            .map(|statement| self.statement(statement))
            .collect::<Result<Vec<_>>>()?;
        Ok(Block { statements, range })
    }

    fn variable_kind(&self, pair: Pair<Rule>) -> VariableKind {
        match pair.as_str() {
            "var" => VariableKind::Var,
            _ => VariableKind::Let,
        }
    }

    fn transfer(&self, pair: &Pair<Rule>) -> Transfer {
        match pair.as_str() {
            "<-!" => Transfer::ForceMove,
            "<-" => Transfer::Move,
            _ => Transfer::Copy,
        }
    }

    fn variable_decl(&self, pair: Pair<Rule>) -> Result<VariableDecl> {
        let mut children = Children::new(pair);
        let range = children.range;
        let kind = self.variable_kind(children.expect(self, Rule::decl_kind)?);
        let name = children.expect(self, Rule::identifier)?.as_str().to_string();
        let ty = match children.next_if(Rule::ty) {
            Some(ty) => Some(self.ty(ty)?),
            None => None,
        };
        let transfer = self.transfer(&children.expect(self, Rule::transfer_op)?);
        let value = self.expression(children.expect(self, Rule::expression)?)?;
        let second = match children.next_if(Rule::transfer_op) {
            Some(op) => {
                let transfer = self.transfer(&op);
                Some((transfer, self.expression(children.expect(self, Rule::expression)?)?))
            }
            None => None,
        };
        Ok(VariableDecl {
            kind,
            name,
            ty,
            transfer,
            value,
            second,
            range,
        })
    }

    fn statement(&self, pair: Pair<Rule>) -> Result<Statement> {
        let range = range_of(&pair);
        let kind = match pair.as_rule() {
            Rule::variable_decl => StatementKind::Variable(self.variable_decl(pair)?),
            Rule::return_stmt => {
                let value = match Children::new(pair).next_if(Rule::expression) {
                    Some(value) => Some(self.expression(value)?),
                    None => None,
                };
                StatementKind::Return(value)
            }
            Rule::break_stmt => StatementKind::Break,
            Rule::continue_stmt => StatementKind::Continue,
            Rule::if_stmt => {
                let mut children = Children::new(pair);
                let test = children.required(self)?;
                let test = match test.as_rule() {
                    Rule::if_binding => {
                        let range = range_of(&test);
                        let mut parts = Children::new(test);
                        let kind = self.variable_kind(parts.expect(self, Rule::decl_kind)?);
                        let name = parts.expect(self, Rule::identifier)?.as_str().to_string();
                        let ty = match parts.next_if(Rule::ty) {
                            Some(ty) => Some(self.ty(ty)?),
                            None => None,
                        };
                        let transfer = self.transfer(&parts.expect(self, Rule::transfer_op)?);
                        let value = self.expression(parts.expect(self, Rule::expression)?)?;
                        IfTest::Binding(VariableDecl {
                            kind,
                            name,
                            ty,
                            transfer,
                            value,
                            second: None,
                            range,
                        })
                    }
                    _ => IfTest::Expression(self.expression(test)?),
                };
                let then = self.block(children.expect(self, Rule::block)?)?;
                let otherwise = match children.next() {
                    Some(branch) if branch.as_rule() == Rule::if_stmt => {
                        let range = range_of(&branch);
                        Some(Block {
                            statements: vec![self.statement(branch)?],
                            range,
                        })
                    }
                    Some(branch) => Some(self.block(branch)?),
                    None => None,
                };
                StatementKind::If { test, then, otherwise }
            }
            Rule::while_stmt => {
                let mut children = Children::new(pair);
                let test = self.expression(children.expect(self, Rule::expression)?)?;
                let body = self.block(children.expect(self, Rule::block)?)?;
                StatementKind::While { test, body }
            }
            Rule::for_stmt => {
                let mut children = Children::new(pair);
                let variable = children.expect(self, Rule::identifier)?.as_str().to_string();
                let iterable = self.expression(children.expect(self, Rule::expression)?)?;
                let body = self.block(children.expect(self, Rule::block)?)?;
                StatementKind::For {
                    variable,
                    iterable,
                    body,
                }
            }
            Rule::emit_stmt => {
                let mut children = Children::new(pair);
                StatementKind::Emit(self.expression(children.expect(self, Rule::expression)?)?)
            }
            Rule::expr_stmt => {
                let mut children = Children::new(pair);
                let first = self.expression(children.expect(self, Rule::expression)?)?;
                if children.next_if(Rule::swap_op).is_some() {
                    let right = self.expression(children.expect(self, Rule::expression)?)?;
                    StatementKind::Swap { left: first, right }
                } else if let Some(op) = children.next_if(Rule::transfer_op) {
                    let transfer = self.transfer(&op);
                    let value = self.expression(children.expect(self, Rule::expression)?)?;
                    StatementKind::Assignment {
                        target: first,
                        transfer,
                        value,
                    }
                } else {
                    StatementKind::Expression(first)
                }
            }
            other => return Err(self.malformed(range, format!("unexpected {:?} in block", other))),
        };
        Ok(Statement { kind, range })
    }

    // Expressions

    fn expression(&self, pair: Pair<Rule>) -> Result<Expression> {
        let range = range_of(&pair);
        let mut children = Children::new(pair);
        let test = self.pratt_expression(children.expect(self, Rule::pratt)?)?;
        match children.next_if(Rule::expression) {
            Some(then) => {
                let then = self.expression(then)?;
                let otherwise = self.expression(children.expect(self, Rule::expression)?)?;
                Ok(Expression {
                    kind: ExprKind::Conditional {
                        test: Box::new(test),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    range,
                })
            }
            None => Ok(test),
        }
    }

    fn pratt_expression(&self, pair: Pair<Rule>) -> Result<Expression> {
        self.pratt
            .map_primary(|primary| self.primary(primary))
            .map_prefix(|op, operand| self.prefix(op, operand?))
            .map_postfix(|target, op| self.postfix(target?, op))
            .map_infix(|left, op, right| self.infix(left?, op, right?))
            .parse(pair.into_inner())
    }

    fn primary(&self, pair: Pair<Rule>) -> Result<Expression> {
        let range = range_of(&pair);
        let kind = match pair.as_rule() {
            Rule::nil_lit => ExprKind::Nil,
            Rule::bool_lit => ExprKind::Bool(pair.as_str() == "true"),
            Rule::fixed_lit => ExprKind::Fixed(pair.as_str().replace('_', "")),
            Rule::integer_lit => {
                let text = pair.as_str().replace('_', "");
                let (digits, radix) = if let Some(hex) = text.strip_prefix("0x") {
                    (hex.to_string(), 16)
                } else if let Some(binary) = text.strip_prefix("0b") {
                    (binary.to_string(), 2)
                } else if let Some(octal) = text.strip_prefix("0o") {
                    (octal.to_string(), 8)
                } else {
                    (text.clone(), 10)
                };
                ExprKind::Integer { digits, radix }
            }
            Rule::string_lit => ExprKind::String(self.string(pair)?),
            Rule::path_lit => {
                let mut parts = pair.into_inner();
                let domain = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                let identifier = parts.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                let domain = PathDomain::from_identifier(&domain).map_err(|e| self.malformed(range, e.to_string()))?;
                ExprKind::Path { domain, identifier }
            }
            Rule::array_literal => ExprKind::Array(
                Children::new(pair)
                    .map(|element| self.expression(element))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Rule::dictionary_literal => ExprKind::Dictionary(
                Children::new(pair)
                    .map(|entry| {
                        let mut parts = Children::new(entry);
                        let key = self.expression(parts.expect(self, Rule::expression)?)?;
                        let value = self.expression(parts.expect(self, Rule::expression)?)?;
                        Ok((key, value))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Rule::paren => {
                let mut inner = self.expression(Children::new(pair).expect(self, Rule::expression)?)?;
                inner.range = range;
                return Ok(inner);
            }
            Rule::function_expr => ExprKind::Function(Arc::new(self.function(pair)?)),
            Rule::identifier => ExprKind::Identifier(pair.as_str().to_string()),
            other => return Err(self.malformed(range, format!("unexpected {:?} in expression", other))),
        };
        Ok(Expression { kind, range })
    }

    fn prefix(&self, op: Pair<Rule>, operand: Expression) -> Result<Expression> {
        let start = range_of(&op).start;
        let range = Range::new(start, operand.range.end);
        let boxed = Box::new(operand);
        let kind = match op.as_rule() {
            Rule::op_move => ExprKind::Move(boxed),
            Rule::op_create => ExprKind::Create(boxed),
            Rule::op_destroy => ExprKind::Destroy(boxed),
            Rule::op_not => ExprKind::Unary {
                op: UnaryOp::Not,
                operand: boxed,
            },
            Rule::op_neg => ExprKind::Unary {
                op: UnaryOp::Negate,
                operand: boxed,
            },
            Rule::op_ref => match boxed.kind {
                ExprKind::Cast {
                    value,
                    kind: CastKind::Static,
                    ty,
                } => ExprKind::Reference { value, ty: Some(ty) },
                _ => ExprKind::Reference { value: boxed, ty: None },
            },
            other => return Err(self.malformed(range, format!("unexpected prefix {:?}", other))),
        };
        Ok(Expression { kind, range })
    }

    fn postfix(&self, target: Expression, op: Pair<Rule>) -> Result<Expression> {
        let range = Range::new(target.range.start, range_of(&op).end);
        let target = Box::new(target);
        let kind = match op.as_rule() {
            Rule::cast => {
                let mut parts = Children::new(op);
                let kind = match parts.expect(self, Rule::cast_kind)?.as_str() {
                    "as?" => CastKind::Failable,
                    "as!" => CastKind::Force,
                    _ => CastKind::Static,
                };
                let ty = self.ty(parts.expect(self, Rule::ty)?)?;
                ExprKind::Cast {
                    value: target,
                    kind,
                    ty,
                }
            }
            Rule::force => ExprKind::Force(target),
            Rule::member | Rule::optional_member => {
                let optional = op.as_rule() == Rule::optional_member;
                let name = Children::new(op).expect(self, Rule::identifier)?.as_str().to_string();
                ExprKind::Member { target, name, optional }
            }
            Rule::index => {
                let index = self.expression(Children::new(op).expect(self, Rule::expression)?)?;
                ExprKind::Index {
                    target,
                    index: Box::new(index),
                }
            }
            Rule::invocation => {
                let mut type_arguments = Vec::new();
                let mut arguments = Vec::new();
                for part in Children::new(op) {
                    match part.as_rule() {
                        Rule::type_arguments => type_arguments = self.type_arguments(part)?,
                        _ => arguments.push(self.argument(part)?),
                    }
                }
                ExprKind::Invocation {
                    target,
                    type_arguments,
                    arguments,
                }
            }
            other => return Err(self.malformed(range, format!("unexpected postfix {:?}", other))),
        };
        Ok(Expression { kind, range })
    }

    fn argument(&self, pair: Pair<Rule>) -> Result<Argument> {
        let mut parts = Children::new(pair);
        let label = parts.next_if(Rule::identifier).map(|p| p.as_str().to_string());
        let value = self.expression(parts.expect(self, Rule::expression)?)?;
        Ok(Argument { label, value })
    }

    fn infix(&self, left: Expression, op: Pair<Rule>, right: Expression) -> Result<Expression> {
        let range = Range::new(left.range.start, right.range.end);
        let op = match op.as_rule() {
            Rule::op_coalesce => BinaryOp::Coalesce,
            Rule::op_or => BinaryOp::Or,
            Rule::op_and => BinaryOp::And,
            Rule::op_eq => BinaryOp::Equal,
            Rule::op_ne => BinaryOp::NotEqual,
            Rule::op_lt => BinaryOp::Less,
            Rule::op_le => BinaryOp::LessEqual,
            Rule::op_gt => BinaryOp::Greater,
            Rule::op_ge => BinaryOp::GreaterEqual,
            Rule::op_add => BinaryOp::Add,
            Rule::op_sub => BinaryOp::Subtract,
            Rule::op_mul => BinaryOp::Multiply,
            Rule::op_div => BinaryOp::Divide,
            Rule::op_mod => BinaryOp::Modulo,
            other => return Err(self.malformed(range, format!("unexpected operator {:?}", other))),
        };
        Ok(Expression {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            range,
        })
    }

    fn string(&self, pair: Pair<Rule>) -> Result<String> {
        let range = range_of(&pair);
        let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
        unescape(raw).ok_or_else(|| self.malformed(range, "invalid escape sequence"))
    }
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }
                let mut hex = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    hex.push(c);
                }
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Ast {
        parse_program(source, &Location::String("test".into())).unwrap()
    }

    fn main_statements(ast: &Ast) -> &[Statement] {
        match &ast.declarations[0] {
            Declaration::Function(f) => &f.body.statements,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r#"a\n\"b\"\u{41}"#).as_deref(), Some("a\n\"b\"A"));
        assert_eq!(unescape(r"\q"), None);
    }

    #[test]
    fn test_operator_precedence() {
        let ast = parse("fun main(): Int { return 1 + 2 * 3 }");
        let StatementKind::Return(Some(value)) = &main_statements(&ast)[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Multiply, .. }));
    }

    #[test]
    fn test_reference_expression() {
        let ast = parse("fun main() { let r = &self.vaults[0] as auth(Withdraw) &Vault }");
        let StatementKind::Variable(decl) = &main_statements(&ast)[0].kind else {
            panic!("expected declaration");
        };
        let ExprKind::Reference { value, ty: Some(ty) } = &decl.value.kind else {
            panic!("expected reference, got {:?}", decl.value.kind);
        };
        assert!(matches!(value.kind, ExprKind::Index { .. }));
        assert_eq!(ty.to_string(), "auth(Withdraw) &Vault");
    }

    #[test]
    fn test_transfers_and_swap() {
        let ast = parse(
            r#"
            fun main() {
                var t <- self.vaults[0] <- self.vaults
                a <-> b
                x <-! y
                self.count = self.count - 1
            }
            "#,
        );
        let statements = main_statements(&ast);
        let StatementKind::Variable(decl) = &statements[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(decl.transfer, Transfer::Move);
        assert!(matches!(decl.second, Some((Transfer::Move, _))));
        assert!(matches!(statements[1].kind, StatementKind::Swap { .. }));
        assert!(matches!(
            statements[2].kind,
            StatementKind::Assignment {
                transfer: Transfer::ForceMove,
                ..
            }
        ));
        assert!(matches!(
            statements[3].kind,
            StatementKind::Assignment {
                transfer: Transfer::Copy,
                ..
            }
        ));
    }

    #[test]
    fn test_type_arguments_and_labels() {
        let ast = parse("fun main() { let r <- signer.storage.load<@R>(from: /storage/r) ?? panic(\"none\") }");
        let StatementKind::Variable(decl) = &main_statements(&ast)[0].kind else {
            panic!("expected declaration");
        };
        let ExprKind::Binary {
            op: BinaryOp::Coalesce,
            left,
            ..
        } = &decl.value.kind
        else {
            panic!("expected coalescing");
        };
        let ExprKind::Invocation {
            type_arguments,
            arguments,
            ..
        } = &left.kind
        else {
            panic!("expected invocation");
        };
        assert_eq!(type_arguments[0].to_string(), "@R");
        assert_eq!(arguments[0].label.as_deref(), Some("from"));
        assert!(matches!(
            arguments[0].value.kind,
            ExprKind::Path {
                domain: PathDomain::Storage,
                ..
            }
        ));
    }

    #[test]
    fn test_comparison_is_not_type_arguments() {
        let ast = parse("fun main() { while i < 10 { i = i + 1 } }");
        let StatementKind::While { test, .. } = &main_statements(&ast)[0].kind else {
            panic!("expected while");
        };
        assert!(matches!(test.kind, ExprKind::Binary { op: BinaryOp::Less, .. }));
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let ast = parse("fun main() { let format = 1\n returnValue(format) \n letters.append(1) }");
        let statements = main_statements(&ast);
        assert_eq!(statements.len(), 3);
        assert!(matches!(statements[1].kind, StatementKind::Expression(_)));
    }

    #[test]
    fn test_parse_error_has_position() {
        let err = parse_program("fun main() { let = }", &Location::String("bad".into())).unwrap_err();
        let range = err.range().unwrap();
        assert_eq!(range.start.line, 1);
    }
}
