//! Recursive-descent parser for Tilde
//!
//! Consumes the token stream of one source file and produces a
//! `CompilationUnit`. String literals are assigned program-wide unique
//! labels (`str0`, `str1`, ...) as they are parsed; the driver threads the
//! counter across units so labels never collide.

use crate::ast::{
    Access, CompilationUnit, ConstructorDeclaration, DestructorDeclaration, EnumDefinition,
    EnumMember, Expression, FunctionDeclaration, MemberVariable, Parameter, Statement,
    StructDefinition, TypeNode, UsingDirective, qualify,
};
use crate::lexer::{Token, TokenKind, tokenize};
use std::path::PathBuf;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file_path: PathBuf,
    next_string_label: usize,
}

impl Parser {
    pub fn new(source: &str, file_path: impl Into<PathBuf>) -> Result<Self, String> {
        Self::with_string_start(source, file_path, 0)
    }

    /// Create a parser whose string-literal labels start at `strN` for the
    /// given N. Used by the driver to keep labels unique across units.
    pub fn with_string_start(
        source: &str,
        file_path: impl Into<PathBuf>,
        next_string_label: usize,
    ) -> Result<Self, String> {
        let file_path = file_path.into();
        let tokens = tokenize(source, &file_path.display().to_string())?;
        Ok(Parser {
            tokens,
            pos: 0,
            file_path,
            next_string_label,
        })
    }

    /// The label counter after parsing, for threading into the next unit
    pub fn string_label_counter(&self) -> usize {
        self.next_string_label
    }

    /// Parse the whole unit
    pub fn parse_unit(&mut self) -> Result<CompilationUnit, String> {
        let mut unit = CompilationUnit::new(self.file_path.clone());
        self.parse_declarations(&mut unit, None, true)?;
        Ok(unit)
    }

    /// Parse declarations until end of input (top level) or a closing brace
    /// (inside a namespace block).
    fn parse_declarations(
        &mut self,
        unit: &mut CompilationUnit,
        namespace: Option<&str>,
        top_level: bool,
    ) -> Result<(), String> {
        loop {
            if self.is_at_end() {
                if top_level {
                    return Ok(());
                }
                return Err(self.err_here("unexpected end of file inside namespace block"));
            }
            if !top_level && self.check("}") {
                return Ok(());
            }

            if self.check("using") {
                let using = self.parse_using()?;
                unit.usings.push(using);
            } else if self.check("namespace") {
                self.parse_namespace(unit, namespace)?;
            } else if self.check("enum") {
                let def = self.parse_enum(namespace)?;
                unit.enums.push(def);
            } else if self.check("struct") {
                let def = self.parse_struct(namespace)?;
                unit.structs.push(def);
            } else {
                let func = self.parse_function(namespace)?;
                unit.functions.push(func);
            }
        }
    }

    /// `using NS;` or `using Alias = NS;`
    fn parse_using(&mut self) -> Result<UsingDirective, String> {
        self.consume("using")?;
        let first = self.expect_identifier("namespace or alias name")?;

        if self.check("=") {
            self.advance();
            let namespace = self.parse_qualified_name()?;
            self.consume(";")?;
            return Ok(UsingDirective {
                namespace,
                alias: Some(first.text),
            });
        }

        let mut namespace = first.text;
        while self.check("::") {
            self.advance();
            let segment = self.expect_identifier("namespace segment")?;
            namespace.push_str("::");
            namespace.push_str(&segment.text);
        }
        self.consume(";")?;
        Ok(UsingDirective {
            namespace,
            alias: None,
        })
    }

    /// `namespace A::B { declarations }`
    fn parse_namespace(
        &mut self,
        unit: &mut CompilationUnit,
        outer: Option<&str>,
    ) -> Result<(), String> {
        self.consume("namespace")?;
        let path = self.parse_qualified_name()?;
        let full = match outer {
            Some(ns) => format!("{}::{}", ns, path),
            None => path,
        };
        self.consume("{")?;
        self.parse_declarations(unit, Some(&full), false)?;
        self.consume("}")?;
        Ok(())
    }

    /// `enum Name { A, B = 3, C };`
    fn parse_enum(&mut self, namespace: Option<&str>) -> Result<EnumDefinition, String> {
        self.consume("enum")?;
        let name_token = self.expect_identifier("enum name")?;
        self.consume("{")?;

        let mut members = Vec::new();
        let mut next_value: i64 = 0;
        while !self.check("}") {
            let member_name = self.expect_identifier("enum member name")?;
            if self.check("=") {
                self.advance();
                let value_token = self.advance_or_err("integer value")?;
                next_value = value_token.int_value()?;
            }
            members.push(EnumMember {
                name: member_name.text,
                value: next_value,
            });
            next_value += 1;
            if self.check(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.consume("}")?;
        if self.check(";") {
            self.advance();
        }

        Ok(EnumDefinition {
            name: name_token.text.clone(),
            name_token,
            namespace: namespace.map(str::to_string),
            members,
        })
    }

    /// `struct Name<T> : Base { ... };`
    fn parse_struct(&mut self, namespace: Option<&str>) -> Result<StructDefinition, String> {
        self.consume("struct")?;
        let name_token = self.expect_identifier("struct name")?;
        let name = name_token.text.clone();
        let fqn = qualify(namespace, &name);

        let mut generic_parameters = Vec::new();
        if self.check("<") {
            self.advance();
            loop {
                let param = self.expect_identifier("generic parameter")?;
                generic_parameters.push(param.text);
                if self.check(",") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.consume(">")?;
        }

        let mut base_name = None;
        if self.check(":") {
            self.advance();
            let base_token = self.current_cloned_or_err("base struct name")?;
            let base_path = self.parse_qualified_name()?;
            base_name = Some(Token::new(
                TokenKind::Identifier,
                base_path,
                base_token.line,
                base_token.column,
            ));
        }

        self.consume("{")?;

        let mut def = StructDefinition {
            name,
            name_token,
            generic_parameters,
            base_name,
            namespace: namespace.map(str::to_string),
            members: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            destructors: Vec::new(),
        };

        let mut access = Access::Public;
        while !self.check("}") {
            if self.is_at_end() {
                return Err(self.err_here("unexpected end of file inside struct body"));
            }
            if self.check("public") || self.check("private") {
                access = if self.check("private") {
                    Access::Private
                } else {
                    Access::Public
                };
                self.advance();
                self.consume(":")?;
                continue;
            }
            self.parse_struct_item(&mut def, &fqn, namespace, access)?;
        }
        self.consume("}")?;
        if self.check(";") {
            self.advance();
        }

        Ok(def)
    }

    /// One item of a struct body: member variable, method, constructor,
    /// or destructor.
    fn parse_struct_item(
        &mut self,
        def: &mut StructDefinition,
        owner_fqn: &str,
        namespace: Option<&str>,
        access: Access,
    ) -> Result<(), String> {
        // Destructor: `~Name() { ... }`, optionally `virtual`
        let is_virtual_dtor = self.check("virtual") && self.peek_text(1) == Some("~");
        if self.check("~") || is_virtual_dtor {
            let is_virtual = is_virtual_dtor;
            if is_virtual {
                self.advance();
            }
            let token = self.consume("~")?;
            let dtor_name = self.expect_identifier("destructor name")?;
            if dtor_name.text != def.name {
                return Err(format!(
                    "{}:{}:{}: destructor '~{}' does not match struct '{}'",
                    self.file_path.display(),
                    dtor_name.line,
                    dtor_name.column,
                    dtor_name.text,
                    def.name
                ));
            }
            self.consume("(")?;
            self.consume(")")?;
            let body = self.parse_block()?;
            def.destructors.push(DestructorDeclaration {
                owner: owner_fqn.to_string(),
                namespace: namespace.map(str::to_string),
                access,
                is_virtual,
                body,
                token,
            });
            return Ok(());
        }

        // Constructor: `Name(...)` possibly with a base initializer
        if self.check(&def.name) && self.peek_text(1) == Some("(") {
            let token = self.advance().unwrap();
            let parameters = self.parse_parameters()?;
            let mut base_initializer = None;
            if self.check(":") {
                self.advance();
                self.expect_identifier("base initializer name")?;
                self.consume("(")?;
                let args = self.parse_arguments()?;
                base_initializer = Some(args);
            }
            let body = self.parse_block()?;
            def.constructors.push(ConstructorDeclaration {
                owner: owner_fqn.to_string(),
                namespace: namespace.map(str::to_string),
                access,
                parameters,
                base_initializer,
                body,
                token,
            });
            return Ok(());
        }

        // Method modifiers
        let mut is_virtual = false;
        let mut is_override = false;
        if self.check("virtual") {
            is_virtual = true;
            self.advance();
        } else if self.check("override") {
            is_override = true;
            self.advance();
        }

        let is_const = if self.check("const") {
            self.advance();
            true
        } else {
            false
        };

        let ty = self.parse_type()?;

        // Operator method: stored under the mangled name `operator_plus`
        if self.check("operator") {
            let op_keyword = self.advance().unwrap();
            let op = self.advance_or_err("operator symbol")?;
            if op.text != "+" {
                return Err(format!(
                    "{}:{}:{}: overloading of operator '{}' is not supported",
                    self.file_path.display(),
                    op.line,
                    op.column,
                    op.text
                ));
            }
            let parameters = self.parse_parameters()?;
            let body = self.parse_block()?;
            def.methods.push(FunctionDeclaration {
                return_type: ty,
                name: "operator_plus".to_string(),
                name_token: op_keyword,
                parameters,
                body: Some(body),
                owner: Some(owner_fqn.to_string()),
                access,
                is_virtual,
                is_override,
                namespace: namespace.map(str::to_string),
            });
            return Ok(());
        }

        let name_token = self.expect_identifier("member or method name")?;

        if self.check("(") {
            let parameters = self.parse_parameters()?;
            let body = self.parse_block()?;
            def.methods.push(FunctionDeclaration {
                return_type: ty,
                name: name_token.text.clone(),
                name_token,
                parameters,
                body: Some(body),
                owner: Some(owner_fqn.to_string()),
                access,
                is_virtual,
                is_override,
                namespace: namespace.map(str::to_string),
            });
            return Ok(());
        }

        if is_virtual || is_override {
            return Err(format!(
                "{}:{}:{}: 'virtual'/'override' is only valid on methods",
                self.file_path.display(),
                name_token.line,
                name_token.column
            ));
        }

        self.consume(";")?;
        def.members.push(MemberVariable {
            is_const,
            ty,
            name: name_token.text.clone(),
            name_token,
            access,
        });
        Ok(())
    }

    /// A free function or external declaration at file or namespace scope
    fn parse_function(
        &mut self,
        namespace: Option<&str>,
    ) -> Result<FunctionDeclaration, String> {
        let return_type = self.parse_type()?;
        let name_token = self.expect_identifier("function name")?;
        let parameters = self.parse_parameters()?;

        let body = if self.check(";") {
            self.advance();
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(FunctionDeclaration {
            return_type,
            name: name_token.text.clone(),
            name_token,
            parameters,
            body,
            owner: None,
            access: Access::Public,
            is_virtual: false,
            is_override: false,
            namespace: namespace.map(str::to_string),
        })
    }

    /// `( type name, type name, ... )`
    fn parse_parameters(&mut self) -> Result<Vec<Parameter>, String> {
        self.consume("(")?;
        let mut parameters = Vec::new();
        while !self.check(")") {
            let ty = self.parse_type()?;
            let name_token = self.expect_identifier("parameter name")?;
            parameters.push(Parameter {
                ty,
                name: name_token.text.clone(),
                name_token,
            });
            if self.check(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.consume(")")?;
        Ok(parameters)
    }

    // ========================================================================
    //                                Types
    // ========================================================================

    /// A type expression: qualified name, optional generic arguments,
    /// optional pointer suffixes.
    fn parse_type(&mut self) -> Result<TypeNode, String> {
        let first = self.current_cloned_or_err("type name")?;
        if first.kind != TokenKind::Identifier && first.kind != TokenKind::Keyword {
            return Err(format!(
                "{}:{}:{}: expected type name, got '{}'",
                self.file_path.display(),
                first.line,
                first.column,
                first.text
            ));
        }
        let path = self.parse_qualified_name()?;
        let base = Token::new(TokenKind::Identifier, path, first.line, first.column);

        let mut node = if self.check("<") {
            self.advance();
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if self.check(",") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.consume(">")?;
            TypeNode::Generic { base, args }
        } else {
            TypeNode::Simple(base)
        };

        while self.check("*") {
            self.advance();
            node = TypeNode::Pointer(Box::new(node));
        }
        Ok(node)
    }

    /// `A` or `A::B::C`, joined into one string
    fn parse_qualified_name(&mut self) -> Result<String, String> {
        let first = self.advance_or_err("name")?;
        let mut path = first.text;
        while self.check("::") {
            self.advance();
            let segment = self.expect_identifier("name segment")?;
            path.push_str("::");
            path.push_str(&segment.text);
        }
        Ok(path)
    }

    // ========================================================================
    //                              Statements
    // ========================================================================

    /// `{ statements }` returned as the inner statement list
    fn parse_block(&mut self) -> Result<Vec<Statement>, String> {
        self.consume("{")?;
        let mut statements = Vec::new();
        while !self.check("}") {
            if self.is_at_end() {
                return Err(self.err_here("unexpected end of file inside block"));
            }
            statements.push(self.parse_statement()?);
        }
        self.consume("}")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, String> {
        if self.check("{") {
            return Ok(Statement::Block(self.parse_block()?));
        }
        if self.check("return") {
            let token = self.advance().unwrap();
            let value = if self.check(";") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.consume(";")?;
            return Ok(Statement::Return { value, token });
        }
        if self.check("if") {
            self.advance();
            self.consume("(")?;
            let condition = self.parse_expression()?;
            self.consume(")")?;
            let then_branch = Box::new(self.parse_statement()?);
            let else_branch = if self.check("else") {
                self.advance();
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(Statement::If {
                condition,
                then_branch,
                else_branch,
            });
        }
        if self.check("while") {
            self.advance();
            self.consume("(")?;
            let condition = self.parse_expression()?;
            self.consume(")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::While { condition, body });
        }
        if self.check("delete") {
            let token = self.advance().unwrap();
            let value = self.parse_expression()?;
            self.consume(";")?;
            return Ok(Statement::Delete { value, token });
        }

        // Declaration vs expression statement: try to parse `type name`
        // and fall back to an expression on failure.
        if let Some(stmt) = self.try_parse_declaration()? {
            return Ok(stmt);
        }

        let expr = self.parse_expression()?;
        self.consume(";")?;
        Ok(Statement::Expression(expr))
    }

    /// Attempt `const? type name (= init | (args))? ;`, rolling back if the
    /// lookahead does not shape up as a declaration.
    fn try_parse_declaration(&mut self) -> Result<Option<Statement>, String> {
        let start = self.pos;

        let is_const = if self.check("const") {
            self.advance();
            true
        } else {
            false
        };

        let type_start = self.current_cloned();
        let looks_like_type = matches!(
            type_start.as_ref().map(|t| t.kind),
            Some(TokenKind::Identifier) | Some(TokenKind::Keyword)
        ) && !matches!(
            type_start.as_ref().map(|t| t.text.as_str()),
            Some("new") | Some("sizeof") | Some("this") | Some("null")
        );
        if !looks_like_type {
            self.pos = start;
            return Ok(None);
        }

        let ty = match self.parse_type() {
            Ok(ty) => ty,
            Err(_) => {
                self.pos = start;
                return Ok(None);
            }
        };
        let name_token = match self.current_cloned() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                t
            }
            _ => {
                self.pos = start;
                return Ok(None);
            }
        };

        // `T x(a, b);` direct construction
        if self.check("(") {
            self.advance();
            let args = self.parse_arguments()?;
            self.consume(";")?;
            return Ok(Some(Statement::Declaration {
                is_const,
                ty,
                name: name_token.text.clone(),
                name_token,
                initializer: None,
                constructor_args: Some(args),
            }));
        }

        let initializer = if self.check("=") {
            self.advance();
            if self.check("{") {
                let token = self.advance().unwrap();
                let mut values = Vec::new();
                while !self.check("}") {
                    values.push(self.parse_expression()?);
                    if self.check(",") {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.consume("}")?;
                Some(Expression::InitializerList { values, token })
            } else {
                Some(self.parse_expression()?)
            }
        } else {
            None
        };

        self.consume(";")?;
        Ok(Some(Statement::Declaration {
            is_const,
            ty,
            name: name_token.text.clone(),
            name_token,
            initializer,
            constructor_args: None,
        }))
    }

    // ========================================================================
    //                              Expressions
    // ========================================================================

    pub fn parse_expression(&mut self) -> Result<Expression, String> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expression, String> {
        let target = self.parse_or()?;
        if self.check("=") {
            let op = self.advance().unwrap();
            let value = self.parse_assignment()?;
            return Ok(Expression::Assignment {
                target: Box::new(target),
                value: Box::new(value),
                op,
            });
        }
        Ok(target)
    }

    fn parse_or(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["||"], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["&&"], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["==", "!="], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["<", ">", "<=", ">="], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, String> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Expression, String>,
    ) -> Result<Expression, String> {
        let mut left = next(self)?;
        while let Some(token) = self.current_cloned() {
            if token.kind != TokenKind::Operator || !ops.contains(&token.text.as_str()) {
                break;
            }
            self.advance();
            let right = next(self)?;
            left = Expression::Binary {
                left: Box::new(left),
                op: token,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, String> {
        if let Some(token) = self.current_cloned() {
            if token.kind == TokenKind::Operator
                && matches!(token.text.as_str(), "!" | "-" | "*" | "&")
            {
                self.advance();
                let operand = self.parse_unary()?;
                return Ok(Expression::Unary {
                    op: token,
                    operand: Box::new(operand),
                });
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check("(") {
                let token = self.advance().unwrap();
                let args = self.parse_arguments()?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                    token,
                };
            } else if self.check(".") || self.check("->") {
                let arrow = self.check("->");
                self.advance();
                let member = self.expect_identifier("member name")?;
                expr = Expression::MemberAccess {
                    object: Box::new(expr),
                    arrow,
                    member,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after the opening parenthesis, consuming the closing one
    fn parse_arguments(&mut self) -> Result<Vec<Expression>, String> {
        let mut args = Vec::new();
        while !self.check(")") {
            args.push(self.parse_expression()?);
            if self.check(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.consume(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expression, String> {
        let token = self.current_cloned_or_err("expression")?;

        match token.kind {
            TokenKind::IntLiteral | TokenKind::HexLiteral => {
                self.advance();
                let value = token.int_value()?;
                return Ok(Expression::IntLiteral { value, token });
            }
            TokenKind::StringLiteral => {
                self.advance();
                let label = format!("str{}", self.next_string_label);
                self.next_string_label += 1;
                return Ok(Expression::StringLiteral {
                    value: token.text.clone(),
                    label,
                    token,
                });
            }
            _ => {}
        }

        if token.text == "(" {
            self.advance();
            let expr = self.parse_expression()?;
            self.consume(")")?;
            return Ok(expr);
        }
        if token.text == "new" {
            self.advance();
            let ty = self.parse_type()?;
            let args = if self.check("(") {
                self.advance();
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            return Ok(Expression::New { ty, args, token });
        }
        if token.text == "sizeof" {
            self.advance();
            self.consume("(")?;
            let ty = self.parse_type()?;
            self.consume(")")?;
            return Ok(Expression::Sizeof { ty, token });
        }
        if token.text == "this" {
            self.advance();
            return Ok(Expression::Variable { name: token });
        }
        if token.text == "null" {
            self.advance();
            return Ok(Expression::IntLiteral { value: 0, token });
        }

        if token.kind == TokenKind::Identifier {
            self.advance();
            // `A::B` or `A::B::C` is a qualified access; the last segment is
            // the member, everything before it the qualifier.
            if self.check("::") {
                let mut segments = vec![token.clone()];
                while self.check("::") {
                    self.advance();
                    segments.push(self.expect_identifier("qualified name segment")?);
                }
                let member = segments.pop().expect("at least two segments");
                let qualifier = segments
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join("::");
                return Ok(Expression::QualifiedAccess {
                    qualifier,
                    qualifier_token: token,
                    member,
                });
            }
            return Ok(Expression::Variable { name: token });
        }

        Err(format!(
            "{}:{}:{}: expected expression, got '{}'",
            self.file_path.display(),
            token.line,
            token.column,
            token.text
        ))
    }

    // ========================================================================
    //                               Helpers
    // ========================================================================

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, text: &str) -> bool {
        self.tokens.get(self.pos).is_some_and(|t| t.text == text)
    }

    fn peek_text(&self, offset: usize) -> Option<&str> {
        self.tokens.get(self.pos + offset).map(|t| t.text.as_str())
    }

    fn current_cloned(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn current_cloned_or_err(&self, what: &str) -> Result<Token, String> {
        self.current_cloned()
            .ok_or_else(|| self.err_here(&format!("expected {}, found end of file", what)))
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn advance_or_err(&mut self, what: &str) -> Result<Token, String> {
        self.advance()
            .ok_or_else(|| self.err_here(&format!("expected {}, found end of file", what)))
    }

    fn expect_identifier(&mut self, what: &str) -> Result<Token, String> {
        match self.current_cloned() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                Ok(t)
            }
            Some(t) => Err(format!(
                "{}:{}:{}: expected {}, got '{}'",
                self.file_path.display(),
                t.line,
                t.column,
                what,
                t.text
            )),
            None => Err(self.err_here(&format!("expected {}, found end of file", what))),
        }
    }

    fn consume(&mut self, text: &str) -> Result<Token, String> {
        match self.current_cloned() {
            Some(t) if t.text == text => {
                self.advance();
                Ok(t)
            }
            Some(t) => Err(format!(
                "{}:{}:{}: expected '{}', got '{}'",
                self.file_path.display(),
                t.line,
                t.column,
                text,
                t.text
            )),
            None => Err(self.err_here(&format!("expected '{}', found end of file", text))),
        }
    }

    fn err_here(&self, message: &str) -> String {
        let (line, column) = self
            .tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        format!(
            "{}:{}:{}: {}",
            self.file_path.display(),
            line,
            column,
            message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> CompilationUnit {
        let mut parser = Parser::new(source, "test.td").unwrap();
        parser.parse_unit().unwrap()
    }

    #[test]
    fn test_parse_simple_function() {
        let unit = parse("int main() { return 2 + 3; }");
        assert_eq!(unit.functions.len(), 1);
        let main = &unit.functions[0];
        assert_eq!(main.name, "main");
        assert!(main.owner.is_none());
        let body = main.body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
        match &body[0] {
            Statement::Return { value: Some(Expression::Binary { op, .. }), .. } => {
                assert_eq!(op.text, "+");
            }
            other => panic!("expected return of binary expression, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_external_declaration() {
        let unit = parse("int printf(char* fmt);");
        assert!(unit.functions[0].is_external());
        assert!(unit.functions[0].parameters[0].ty.is_pointer());
    }

    #[test]
    fn test_parse_struct_with_members_and_access() {
        let unit = parse(
            "struct Point {\n\
             int x;\n\
             int y;\n\
             private:\n\
             const int id;\n\
             };",
        );
        let def = &unit.structs[0];
        assert_eq!(def.name, "Point");
        assert_eq!(def.members.len(), 3);
        assert_eq!(def.members[0].access, Access::Public);
        assert_eq!(def.members[2].access, Access::Private);
        assert!(def.members[2].is_const);
    }

    #[test]
    fn test_parse_struct_full() {
        let unit = parse(
            "struct Handle : Base {\n\
             int fd;\n\
             Handle(int fd) : Base(fd) { }\n\
             virtual ~Handle() { }\n\
             virtual int close() { return 0; }\n\
             override int read() { return 1; }\n\
             };",
        );
        let def = &unit.structs[0];
        assert_eq!(def.base_name.as_ref().unwrap().text, "Base");
        assert_eq!(def.constructors.len(), 1);
        assert!(def.constructors[0].base_initializer.is_some());
        assert_eq!(def.destructors.len(), 1);
        assert!(def.destructors[0].is_virtual);
        assert!(def.methods[0].is_virtual);
        assert!(def.methods[1].is_override);
    }

    #[test]
    fn test_parse_generic_struct() {
        let unit = parse("struct List<T> { T* buf; int len; };");
        let def = &unit.structs[0];
        assert_eq!(def.generic_parameters, vec!["T"]);
        assert!(def.is_template());
    }

    #[test]
    fn test_parse_generic_declaration() {
        let unit = parse("int main() { List<int> xs; return sizeof(List<int>); }");
        let body = unit.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Statement::Declaration { ty: TypeNode::Generic { base, args }, .. } => {
                assert_eq!(base.text, "List");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected generic declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_namespace_and_using() {
        let unit = parse(
            "using gfx;\n\
             using g = gfx::core;\n\
             namespace app { int run() { return 0; } }",
        );
        assert_eq!(unit.usings.len(), 2);
        assert_eq!(unit.usings[1].alias.as_deref(), Some("g"));
        assert_eq!(unit.usings[1].namespace, "gfx::core");
        assert_eq!(unit.functions[0].namespace.as_deref(), Some("app"));
    }

    #[test]
    fn test_parse_enum_values() {
        let unit = parse("enum Color { Red, Green = 5, Blue };");
        let def = &unit.enums[0];
        assert_eq!(def.members[0].value, 0);
        assert_eq!(def.members[1].value, 5);
        assert_eq!(def.members[2].value, 6);
    }

    #[test]
    fn test_parse_declaration_forms() {
        let unit = parse(
            "int main() {\n\
             int a = 1;\n\
             Point p = {1, 2};\n\
             File f(1, 2);\n\
             const int c = 3;\n\
             return 0;\n\
             }",
        );
        let body = unit.functions[0].body.as_ref().unwrap();
        assert!(matches!(
            &body[1],
            Statement::Declaration {
                initializer: Some(Expression::InitializerList { .. }),
                ..
            }
        ));
        assert!(matches!(
            &body[2],
            Statement::Declaration {
                constructor_args: Some(args),
                ..
            } if args.len() == 2
        ));
        assert!(matches!(&body[3], Statement::Declaration { is_const: true, .. }));
    }

    #[test]
    fn test_parse_new_delete() {
        let unit = parse("int main() { Point* p = new Point(1, 2); delete p; return 0; }");
        let body = unit.functions[0].body.as_ref().unwrap();
        assert!(matches!(
            &body[0],
            Statement::Declaration {
                initializer: Some(Expression::New { .. }),
                ..
            }
        ));
        assert!(matches!(&body[1], Statement::Delete { .. }));
    }

    #[test]
    fn test_parse_member_access_chain() {
        let unit = parse("int main() { return a.b->c; }");
        let body = unit.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Statement::Return {
                value: Some(Expression::MemberAccess { arrow, member, object }),
                ..
            } => {
                assert!(*arrow);
                assert_eq!(member.text, "c");
                assert!(matches!(**object, Expression::MemberAccess { arrow: false, .. }));
            }
            other => panic!("expected member access chain, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_qualified_access_and_call() {
        let unit = parse("int main() { int c = Color::Red; return app::run(); }");
        let body = unit.functions[0].body.as_ref().unwrap();
        assert!(matches!(
            &body[0],
            Statement::Declaration {
                initializer: Some(Expression::QualifiedAccess { qualifier, .. }),
                ..
            } if qualifier == "Color"
        ));
        match &body[1] {
            Statement::Return {
                value: Some(Expression::Call { callee, .. }),
                ..
            } => {
                assert!(matches!(&**callee, Expression::QualifiedAccess { qualifier, .. } if qualifier == "app"));
            }
            other => panic!("expected qualified call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_operator_plus() {
        let unit = parse("struct Vec { int x; Vec operator + (Vec* o) { Vec r; return r; } };");
        let def = &unit.structs[0];
        assert_eq!(def.methods[0].name, "operator_plus");
    }

    #[test]
    fn test_parse_rejects_other_operators() {
        let mut parser = Parser::new(
            "struct Vec { Vec operator - (Vec* o) { Vec r; return r; } };",
            "test.td",
        )
        .unwrap();
        let err = parser.parse_unit().unwrap_err();
        assert!(err.contains("operator '-'"));
    }

    #[test]
    fn test_string_labels_are_threaded() {
        let mut parser = Parser::with_string_start(
            "int main() { printf(\"a\"); printf(\"b\"); return 0; }",
            "test.td",
            3,
        )
        .unwrap();
        let unit = parser.parse_unit().unwrap();
        assert_eq!(parser.string_label_counter(), 5);
        let mut labels = Vec::new();
        for stmt in unit.functions[0].body.as_ref().unwrap() {
            crate::ast::visit_statement_expressions(stmt, &mut |e| {
                if let Expression::StringLiteral { label, .. } = e {
                    labels.push(label.clone());
                }
            });
        }
        assert_eq!(labels, vec!["str3", "str4"]);
    }

    #[test]
    fn test_operator_precedence() {
        let unit = parse("int main() { return 1 + 2 * 3; }");
        let body = unit.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Statement::Return {
                value: Some(Expression::Binary { op, right, .. }),
                ..
            } => {
                assert_eq!(op.text, "+");
                assert!(matches!(&**right, Expression::Binary { op, .. } if op.text == "*"));
            }
            other => panic!("expected precedence tree, got {:?}", other),
        }
    }
}
