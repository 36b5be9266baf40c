//! Tree-level constant folding
//!
//! The only optimization the compiler performs: integer expressions with
//! literal operands collapse bottom-up into literals before code
//! generation. Division and modulo by a literal zero are left alone so the
//! analyzer's view of the tree stays truthful.

use crate::ast::{Expression, Program, Statement};

/// Fold every function, method, constructor, and destructor body in place
pub fn fold_program(program: &mut Program) {
    for unit in &mut program.units {
        for func in &mut unit.functions {
            if let Some(body) = &mut func.body {
                fold_statements(body);
            }
        }
        for def in &mut unit.structs {
            for method in &mut def.methods {
                if let Some(body) = &mut method.body {
                    fold_statements(body);
                }
            }
            for ctor in &mut def.constructors {
                if let Some(args) = &mut ctor.base_initializer {
                    for arg in args {
                        fold_expression(arg);
                    }
                }
                fold_statements(&mut ctor.body);
            }
            for dtor in &mut def.destructors {
                fold_statements(&mut dtor.body);
            }
        }
    }
}

fn fold_statements(statements: &mut [Statement]) {
    for stmt in statements {
        fold_statement(stmt);
    }
}

fn fold_statement(stmt: &mut Statement) {
    match stmt {
        Statement::Block(stmts) => fold_statements(stmts),
        Statement::Return { value, .. } => {
            if let Some(e) = value {
                fold_expression(e);
            }
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            fold_expression(condition);
            fold_statement(then_branch);
            if let Some(e) = else_branch {
                fold_statement(e);
            }
        }
        Statement::While { condition, body } => {
            fold_expression(condition);
            fold_statement(body);
        }
        Statement::Declaration {
            initializer,
            constructor_args,
            ..
        } => {
            if let Some(e) = initializer {
                fold_expression(e);
            }
            if let Some(args) = constructor_args {
                for a in args {
                    fold_expression(a);
                }
            }
        }
        Statement::Expression(e) => fold_expression(e),
        Statement::Delete { value, .. } => fold_expression(value),
    }
}

fn fold_expression(expr: &mut Expression) {
    match expr {
        Expression::Unary { op, operand } => {
            fold_expression(operand);
            if let Expression::IntLiteral { value, token } = operand.as_ref() {
                let folded = match op.text.as_str() {
                    "-" => Some(value.wrapping_neg()),
                    "!" => Some(i64::from(*value == 0)),
                    _ => None,
                };
                if let Some(value) = folded {
                    *expr = Expression::IntLiteral {
                        value,
                        token: token.clone(),
                    };
                }
            }
        }
        Expression::Binary { left, op, right } => {
            fold_expression(left);
            fold_expression(right);
            if let (
                Expression::IntLiteral { value: a, token },
                Expression::IntLiteral { value: b, .. },
            ) = (left.as_ref(), right.as_ref())
            {
                if let Some(value) = fold_binary(*a, &op.text, *b) {
                    *expr = Expression::IntLiteral {
                        value,
                        token: token.clone(),
                    };
                }
            }
        }
        Expression::Assignment { target, value, .. } => {
            fold_expression(target);
            fold_expression(value);
        }
        Expression::Call { callee, args, .. } => {
            fold_expression(callee);
            for a in args {
                fold_expression(a);
            }
        }
        Expression::MemberAccess { object, .. } => fold_expression(object),
        Expression::New { args, .. } => {
            for a in args {
                fold_expression(a);
            }
        }
        Expression::InitializerList { values, .. } => {
            for v in values {
                fold_expression(v);
            }
        }
        Expression::IntLiteral { .. }
        | Expression::StringLiteral { .. }
        | Expression::Variable { .. }
        | Expression::QualifiedAccess { .. }
        | Expression::Sizeof { .. } => {}
    }
}

fn fold_binary(a: i64, op: &str, b: i64) -> Option<i64> {
    match op {
        "+" => Some(a.wrapping_add(b)),
        "-" => Some(a.wrapping_sub(b)),
        "*" => Some(a.wrapping_mul(b)),
        "/" if b != 0 => Some(a.wrapping_div(b)),
        "%" if b != 0 => Some(a.wrapping_rem(b)),
        "==" => Some(i64::from(a == b)),
        "!=" => Some(i64::from(a != b)),
        "<" => Some(i64::from(a < b)),
        ">" => Some(i64::from(a > b)),
        "<=" => Some(i64::from(a <= b)),
        ">=" => Some(i64::from(a >= b)),
        "&&" => Some(i64::from(a != 0 && b != 0)),
        "||" => Some(i64::from(a != 0 || b != 0)),
        _ => None,
    }
}
