//! Program tree for Tilde
//!
//! The parser produces one `CompilationUnit` per source file; the include
//! resolver merges them into a `Program`. Nodes are plain owned data with no
//! parent back-edges: analysis and code generation thread the enclosing unit
//! and function through context structs instead, so cloning a subtree (the
//! monomorphizer does) never needs a fixup pass.

use crate::lexer::Token;
use std::path::PathBuf;

/// A type expression as written in source. Two structurally equal nodes
/// denote the same type regardless of where they appear.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    /// A bare or qualified name: `int`, `Point`, `gfx::Color`
    Simple(Token),
    /// One level of pointer indirection around an inner type
    Pointer(Box<TypeNode>),
    /// A generic instantiation: `List<int>`, `Map<char*, Entry>`
    Generic { base: Token, args: Vec<TypeNode> },
}

impl TypeNode {
    /// Representative token for diagnostics
    pub fn token(&self) -> &Token {
        match self {
            TypeNode::Simple(t) => t,
            TypeNode::Pointer(inner) => inner.token(),
            TypeNode::Generic { base, .. } => base,
        }
    }

    /// True if this is a pointer at the outermost level
    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeNode::Pointer(_))
    }
}

/// The whole parsed program: all compilation units plus the `#import`ed
/// user libraries in first-seen order (the first is the primary library
/// for unclassified externals).
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub imports: Vec<String>,
    pub units: Vec<CompilationUnit>,
}

#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub file_path: PathBuf,
    pub usings: Vec<UsingDirective>,
    pub structs: Vec<StructDefinition>,
    pub functions: Vec<FunctionDeclaration>,
    pub enums: Vec<EnumDefinition>,
}

impl CompilationUnit {
    pub fn new(file_path: PathBuf) -> Self {
        CompilationUnit {
            file_path,
            usings: Vec::new(),
            structs: Vec::new(),
            functions: Vec::new(),
            enums: Vec::new(),
        }
    }
}

/// `using NS;` or `using Alias = NS;`
#[derive(Debug, Clone, PartialEq)]
pub struct UsingDirective {
    pub namespace: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnumDefinition {
    pub name: String,
    pub name_token: Token,
    pub namespace: Option<String>,
    pub members: Vec<EnumMember>,
}

#[derive(Debug, Clone)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

impl EnumDefinition {
    pub fn fqn(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    pub fn find_member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Member access level. Private members are reachable only from methods
/// whose owner FQN equals the defining struct's FQN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub struct MemberVariable {
    pub is_const: bool,
    pub ty: TypeNode,
    pub name: String,
    pub name_token: Token,
    pub access: Access,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub ty: TypeNode,
    pub name: String,
    pub name_token: Token,
}

/// A free function, external declaration, or method. A `None` body denotes
/// an external (imported) function resolved through the PE import table.
#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    pub return_type: TypeNode,
    pub name: String,
    pub name_token: Token,
    pub parameters: Vec<Parameter>,
    pub body: Option<Vec<Statement>>,
    /// FQN of the owning struct for methods, `None` for free functions
    pub owner: Option<String>,
    pub access: Access,
    pub is_virtual: bool,
    pub is_override: bool,
    pub namespace: Option<String>,
}

impl FunctionDeclaration {
    pub fn is_external(&self) -> bool {
        self.body.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ConstructorDeclaration {
    /// FQN of the owning struct
    pub owner: String,
    pub namespace: Option<String>,
    pub access: Access,
    pub parameters: Vec<Parameter>,
    pub base_initializer: Option<Vec<Expression>>,
    pub body: Vec<Statement>,
    pub token: Token,
}

#[derive(Debug, Clone)]
pub struct DestructorDeclaration {
    /// FQN of the owning struct
    pub owner: String,
    pub namespace: Option<String>,
    pub access: Access,
    pub is_virtual: bool,
    pub body: Vec<Statement>,
    pub token: Token,
}

#[derive(Debug, Clone)]
pub struct StructDefinition {
    pub name: String,
    pub name_token: Token,
    /// Single-letter type parameter names; non-empty marks a template,
    /// which is never analyzed and never emitted
    pub generic_parameters: Vec<String>,
    /// Base struct name as written (possibly qualified), resolved through
    /// the TypeResolver at each inheritance step
    pub base_name: Option<Token>,
    pub namespace: Option<String>,
    pub members: Vec<MemberVariable>,
    pub methods: Vec<FunctionDeclaration>,
    pub constructors: Vec<ConstructorDeclaration>,
    pub destructors: Vec<DestructorDeclaration>,
}

impl StructDefinition {
    pub fn fqn(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    pub fn is_template(&self) -> bool {
        !self.generic_parameters.is_empty()
    }

    pub fn find_member(&self, name: &str) -> Option<&MemberVariable> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn find_method(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// The single destructor considered by destructor lookup, if any
    pub fn destructor(&self) -> Option<&DestructorDeclaration> {
        self.destructors.first()
    }
}

/// Join an optional namespace and a name into an FQN
pub fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}::{}", ns, name),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Vec<Statement>),
    Return {
        value: Option<Expression>,
        token: Token,
    },
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    Declaration {
        is_const: bool,
        ty: TypeNode,
        name: String,
        name_token: Token,
        initializer: Option<Expression>,
        /// Arguments of the direct-construction form `T x(a, b);`
        constructor_args: Option<Vec<Expression>>,
    },
    Expression(Expression),
    Delete {
        value: Expression,
        token: Token,
    },
}

#[derive(Debug, Clone)]
pub enum Expression {
    IntLiteral {
        value: i64,
        token: Token,
    },
    StringLiteral {
        value: String,
        /// Unique data label of the form `strN`, assigned at parse time
        label: String,
        token: Token,
    },
    Variable {
        name: Token,
    },
    Unary {
        op: Token,
        operand: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: Token,
        right: Box<Expression>,
    },
    Assignment {
        target: Box<Expression>,
        value: Box<Expression>,
        op: Token,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
        token: Token,
    },
    MemberAccess {
        object: Box<Expression>,
        /// True for `->`, false for `.`
        arrow: bool,
        member: Token,
    },
    QualifiedAccess {
        /// Left of the final `::`, e.g. `Color` or `gfx::Color`
        qualifier: String,
        qualifier_token: Token,
        member: Token,
    },
    New {
        ty: TypeNode,
        args: Vec<Expression>,
        token: Token,
    },
    Sizeof {
        ty: TypeNode,
        token: Token,
    },
    InitializerList {
        values: Vec<Expression>,
        token: Token,
    },
}

impl Expression {
    /// Representative token for diagnostics
    pub fn token(&self) -> &Token {
        match self {
            Expression::IntLiteral { token, .. } => token,
            Expression::StringLiteral { token, .. } => token,
            Expression::Variable { name } => name,
            Expression::Unary { op, .. } => op,
            Expression::Binary { op, .. } => op,
            Expression::Assignment { op, .. } => op,
            Expression::Call { token, .. } => token,
            Expression::MemberAccess { member, .. } => member,
            Expression::QualifiedAccess { member, .. } => member,
            Expression::New { token, .. } => token,
            Expression::Sizeof { token, .. } => token,
            Expression::InitializerList { token, .. } => token,
        }
    }
}

// ============================================================================
//                          Tree walking helpers
// ============================================================================
//
// The node set is closed, so child traversal is spelled out here once and
// shared by the passes that need a full walk (string-literal collection,
// constant folding, monomorphic type substitution).

/// Visit every expression under a statement, including nested statements,
/// in source order.
pub fn visit_statement_expressions<'a>(stmt: &'a Statement, f: &mut impl FnMut(&'a Expression)) {
    match stmt {
        Statement::Block(stmts) => {
            for s in stmts {
                visit_statement_expressions(s, f);
            }
        }
        Statement::Return { value, .. } => {
            if let Some(e) = value {
                visit_expression(e, f);
            }
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visit_expression(condition, f);
            visit_statement_expressions(then_branch, f);
            if let Some(e) = else_branch {
                visit_statement_expressions(e, f);
            }
        }
        Statement::While { condition, body } => {
            visit_expression(condition, f);
            visit_statement_expressions(body, f);
        }
        Statement::Declaration {
            initializer,
            constructor_args,
            ..
        } => {
            if let Some(e) = initializer {
                visit_expression(e, f);
            }
            if let Some(args) = constructor_args {
                for a in args {
                    visit_expression(a, f);
                }
            }
        }
        Statement::Expression(e) => visit_expression(e, f),
        Statement::Delete { value, .. } => visit_expression(value, f),
    }
}

/// Visit an expression and all of its subexpressions in source order.
pub fn visit_expression<'a>(expr: &'a Expression, f: &mut impl FnMut(&'a Expression)) {
    f(expr);
    match expr {
        Expression::IntLiteral { .. }
        | Expression::StringLiteral { .. }
        | Expression::Variable { .. }
        | Expression::QualifiedAccess { .. }
        | Expression::Sizeof { .. } => {}
        Expression::Unary { operand, .. } => visit_expression(operand, f),
        Expression::Binary { left, right, .. } => {
            visit_expression(left, f);
            visit_expression(right, f);
        }
        Expression::Assignment { target, value, .. } => {
            visit_expression(target, f);
            visit_expression(value, f);
        }
        Expression::Call { callee, args, .. } => {
            visit_expression(callee, f);
            for a in args {
                visit_expression(a, f);
            }
        }
        Expression::MemberAccess { object, .. } => visit_expression(object, f),
        Expression::New { args, .. } => {
            for a in args {
                visit_expression(a, f);
            }
        }
        Expression::InitializerList { values, .. } => {
            for v in values {
                visit_expression(v, f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Token, TokenKind};

    fn tok(text: &str) -> Token {
        Token::new(TokenKind::Identifier, text, 1, 1)
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(Some("gfx"), "Color"), "gfx::Color");
        assert_eq!(qualify(None, "Color"), "Color");
        assert_eq!(qualify(Some(""), "Color"), "Color");
    }

    #[test]
    fn test_type_node_equality_is_structural() {
        let a = TypeNode::Pointer(Box::new(TypeNode::Simple(tok("int"))));
        let b = TypeNode::Pointer(Box::new(TypeNode::Simple(tok("int"))));
        assert_eq!(a, b);
    }

    #[test]
    fn test_visit_collects_nested_expressions() {
        let expr = Expression::Binary {
            left: Box::new(Expression::IntLiteral {
                value: 1,
                token: tok("1"),
            }),
            op: Token::new(TokenKind::Operator, "+", 1, 2),
            right: Box::new(Expression::IntLiteral {
                value: 2,
                token: tok("2"),
            }),
        };
        let stmt = Statement::Return {
            value: Some(expr),
            token: tok("return"),
        };
        let mut count = 0;
        visit_statement_expressions(&stmt, &mut |_| count += 1);
        assert_eq!(count, 3);
    }
}
