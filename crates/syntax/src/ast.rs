//! Abstract syntax tree
//!
//! Declarations are shared through `Arc` so interpreted functions and
//! composite values can keep pointing into a cached program.

use std::fmt;
use std::sync::Arc;

use ore_common::{Address, PathDomain, Range};
use serde::{Deserialize, Serialize};

/// Root of a parsed program
#[derive(Debug, Clone, Default)]
pub struct Ast {
    pub imports: Vec<Import>,
    pub declarations: Vec<Declaration>,
}

/// Source of an import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportLocation {
    Address(Address),
    String(String),
    Identifier(String),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub identifiers: Vec<String>,
    pub location: ImportLocation,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Composite(Arc<CompositeDecl>),
    Function(Arc<FunctionDecl>),
    Transaction(Arc<TransactionDecl>),
    Entitlement(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeKind {
    Struct,
    Resource,
    Contract,
    Event,
}

impl CompositeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            CompositeKind::Struct => "struct",
            CompositeKind::Resource => "resource",
            CompositeKind::Contract => "contract",
            CompositeKind::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Let,
    Var,
}

#[derive(Debug, Clone)]
pub struct CompositeDecl {
    pub access: Option<String>,
    pub kind: CompositeKind,
    pub name: String,
    pub conformances: Vec<String>,
    pub fields: Vec<FieldDecl>,
    /// Parameters of an event declaration
    pub parameters: Vec<Parameter>,
    pub initializer: Option<Arc<FunctionDecl>>,
    pub destructor: Option<Arc<FunctionDecl>>,
    pub functions: Vec<Arc<FunctionDecl>>,
    pub composites: Vec<Arc<CompositeDecl>>,
    pub entitlements: Vec<String>,
    pub range: Range,
}

impl CompositeDecl {
    pub fn function(&self, name: &str) -> Option<&Arc<FunctionDecl>> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn nested(&self, name: &str) -> Option<&Arc<CompositeDecl>> {
        self.composites.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub access: Option<String>,
    pub kind: VariableKind,
    pub name: String,
    pub ty: TypeExpr,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    /// Argument label; `None` for `_`
    pub label: Option<String>,
    pub name: String,
    pub ty: TypeExpr,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub access: Option<String>,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeExpr>,
    pub body: FunctionBlock,
    pub range: Range,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionBlock {
    pub pre: Vec<Condition>,
    pub post: Vec<Condition>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub test: Expression,
    pub message: Option<Expression>,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct TransactionDecl {
    pub parameters: Vec<Parameter>,
    pub fields: Vec<FieldDecl>,
    pub prepare: Option<Arc<FunctionDecl>>,
    pub pre: Vec<Condition>,
    pub execute: Option<Block>,
    pub post: Vec<Condition>,
    pub range: Range,
}

/// Type annotation as written
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    Nominal {
        name: Vec<String>,
        arguments: Vec<TypeExpr>,
    },
    Optional(Box<TypeExpr>),
    VariableArray(Box<TypeExpr>),
    Dictionary(Box<TypeExpr>, Box<TypeExpr>),
    Reference {
        authorization: Vec<String>,
        referenced: Box<TypeExpr>,
    },
    /// `@T`
    Resource(Box<TypeExpr>),
}

impl TypeExpr {
    pub fn nominal<S: Into<String>>(name: S) -> Self {
        TypeExpr::Nominal {
            name: vec![name.into()],
            arguments: Vec::new(),
        }
    }

    /// Whether the annotation carries a resource marker at its outer level
    pub fn is_resource_annotated(&self) -> bool {
        match self {
            TypeExpr::Resource(_) => true,
            TypeExpr::Optional(inner) => inner.is_resource_annotated(),
            _ => false,
        }
    }

    /// The annotation without resource markers and optionals
    pub fn strip(&self) -> &TypeExpr {
        match self {
            TypeExpr::Resource(inner) | TypeExpr::Optional(inner) => inner.strip(),
            other => other,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Nominal { name, arguments } => {
                write!(f, "{}", name.join("."))?;
                if !arguments.is_empty() {
                    let args: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            TypeExpr::Optional(inner) => write!(f, "{}?", inner),
            TypeExpr::VariableArray(inner) => write!(f, "[{}]", inner),
            TypeExpr::Dictionary(key, value) => write!(f, "{{{}: {}}}", key, value),
            TypeExpr::Reference {
                authorization,
                referenced,
            } => {
                if !authorization.is_empty() {
                    write!(f, "auth({}) ", authorization.join(", "))?;
                }
                write!(f, "&{}", referenced)
            }
            TypeExpr::Resource(inner) => write!(f, "@{}", inner),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub range: Range,
}

/// Transfer operation of a declaration or assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `=`
    Copy,
    /// `<-`
    Move,
    /// `<-!`
    ForceMove,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub kind: VariableKind,
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub transfer: Transfer,
    pub value: Expression,
    /// `let a <- b <- c` moves `c` into the slot `b` after `b` was moved into `a`
    pub second: Option<(Transfer, Expression)>,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Variable(VariableDecl),
    Assignment {
        target: Expression,
        transfer: Transfer,
        value: Expression,
    },
    Swap {
        left: Expression,
        right: Expression,
    },
    Expression(Expression),
    Return(Option<Expression>),
    Break,
    Continue,
    If {
        test: IfTest,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        test: Expression,
        body: Block,
    },
    For {
        variable: String,
        iterable: Expression,
        body: Block,
    },
    Emit(Expression),
}

#[derive(Debug, Clone)]
pub enum IfTest {
    Expression(Expression),
    Binding(VariableDecl),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub label: Option<String>,
    pub value: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// `as`
    Static,
    /// `as?`
    Failable,
    /// `as!`
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Coalesce,
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Coalesce => "??",
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Nil,
    Bool(bool),
    /// Digits without separators, in the given radix
    Integer { digits: String, radix: u32 },
    /// Decimal fixed-point literal as written, without separators
    Fixed(String),
    String(String),
    Path { domain: PathDomain, identifier: String },
    Identifier(String),
    Array(Vec<Expression>),
    Dictionary(Vec<(Expression, Expression)>),
    Member {
        target: Box<Expression>,
        name: String,
        optional: bool,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Invocation {
        target: Box<Expression>,
        type_arguments: Vec<TypeExpr>,
        arguments: Vec<Argument>,
    },
    Force(Box<Expression>),
    Cast {
        value: Box<Expression>,
        kind: CastKind,
        ty: TypeExpr,
    },
    Reference {
        value: Box<Expression>,
        ty: Option<TypeExpr>,
    },
    Create(Box<Expression>),
    Destroy(Box<Expression>),
    Move(Box<Expression>),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    Function(Arc<FunctionDecl>),
}

impl Expression {
    /// Whether this expression is a literal, possibly negated
    pub fn is_literal(&self) -> bool {
        match &self.kind {
            ExprKind::Integer { .. } | ExprKind::Fixed(_) => true,
            ExprKind::Unary {
                op: UnaryOp::Negate,
                operand,
            } => operand.is_literal(),
            _ => false,
        }
    }

    /// Whether the expression syntactically produces a resource: `create`
    /// or a move
    pub fn is_resource_producing(&self) -> bool {
        matches!(self.kind, ExprKind::Create(_) | ExprKind::Move(_))
    }
}
