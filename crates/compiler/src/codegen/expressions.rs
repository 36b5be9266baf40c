//! Expression lowering
//!
//! Every expression lowers in one of two modes. An R-value leaves the
//! value in EAX, except struct-typed expressions, which leave the struct's
//! address (structs are not register-resident). An L-value leaves the
//! address in EAX and is valid for variables, member accesses, and
//! pointer dereferences. A struct-by-value call reserves the result buffer
//! on the stack, passes its address through the hidden trailing parameter,
//! and leaves the buffer on the stack top with EAX pointing at it; the
//! statement layer destroys and pops such temporaries.

use super::state::{ctor_label, dtor_label, ebp, function_label, method_label, vtable_label};
use super::{CodeGen, CodeGenError, Frame};
use crate::ast::{Expression, TypeNode};
use crate::context::Scope;
use crate::functions;
use crate::resolver;
use crate::types;
use std::fmt::Write as _;

/// Where a constructor call's `this` comes from
pub(super) enum ThisArg<'a> {
    /// A register already holding the object address
    Register(&'a str),
    /// The address of a frame slot (`lea eax, [ebp+off]`)
    FrameAddress(i32),
    /// A pointer stored in a frame slot (`mov eax, [ebp+off]`)
    FrameValue(i32),
}

impl<'c, 'p> CodeGen<'c, 'p> {
    /// Resolve a type node under a scope, mapping resolution failures to
    /// generator bugs (the analyzer already vetted the program).
    pub(super) fn resolve_in(&self, ty: &TypeNode, scope: &Scope) -> Result<String, CodeGenError> {
        resolver::resolve_type(self.ctx, ty, scope)
            .map_err(|e| CodeGenError::Logic(format!("codegen: {}", e)))
    }

    pub(super) fn size_of(&self, fqn: &str) -> Result<u32, CodeGenError> {
        self.ctx
            .layouts
            .size_of(self.ctx, fqn)
            .map_err(|e| CodeGenError::Logic(format!("codegen: {}", e)))
    }

    // ========================================================================
    //                              Static typing
    // ========================================================================

    /// The FQN an expression evaluates to, without emitting code. Mirrors
    /// the analyzer's rules; any failure here is a compiler bug.
    pub(super) fn expr_type(&self, frame: &Frame, expr: &Expression) -> Result<String, CodeGenError> {
        match expr {
            Expression::IntLiteral { .. } => Ok(types::INT.to_string()),
            Expression::StringLiteral { .. } => Ok("char*".to_string()),
            Expression::Sizeof { .. } => Ok(types::INT.to_string()),
            Expression::InitializerList { .. } => Err(CodeGenError::Logic(
                "codegen: initializer list outside a declaration".to_string(),
            )),
            Expression::Variable { name } => {
                if let Some(symbol) = frame.symbols.try_get(&name.text) {
                    return Ok(symbol.type_fqn.clone());
                }
                if functions::find_enum_value(self.ctx, None, &name.text, &frame.scope).is_some() {
                    return Ok(types::INT.to_string());
                }
                if let Some(owner) = &frame.owner_fqn {
                    if let Some((defining, member)) =
                        functions::find_member(self.ctx, owner, &name.text)
                            .map_err(CodeGenError::Logic)?
                    {
                        let scope = resolver::scope_for_struct(self.ctx, defining)
                            .map_err(CodeGenError::Logic)?;
                        return self.resolve_in(&member.ty, &scope);
                    }
                }
                Err(CodeGenError::Logic(format!(
                    "codegen: unresolved variable '{}'",
                    name.text
                )))
            }
            Expression::Unary { op, operand } => {
                let inner = self.expr_type(frame, operand)?;
                match op.text.as_str() {
                    "&" => Ok(types::pointer_to(&inner)),
                    "*" => types::pointee(&inner).map(str::to_string).ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: dereference of non-pointer '{}'",
                            inner
                        ))
                    }),
                    _ => Ok(inner),
                }
            }
            Expression::Binary { left, op, right } => {
                let lt = self.expr_type(frame, left)?;
                let rt = self.expr_type(frame, right)?;
                if types::is_struct_value(&lt) {
                    let hit = functions::find_method(self.ctx, &lt, "operator_plus")
                        .map_err(CodeGenError::Logic)?
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!(
                                "codegen: no operator '+' on '{}'",
                                lt
                            ))
                        })?;
                    let scope = resolver::scope_for_struct(self.ctx, hit.defining)
                        .map_err(CodeGenError::Logic)?;
                    return self.resolve_in(&hit.func.return_type, &scope);
                }
                let l_ptr = types::is_pointer(&lt);
                let r_ptr = types::is_pointer(&rt);
                Ok(match op.text.as_str() {
                    "+" if l_ptr => lt,
                    "+" if r_ptr => rt,
                    "-" if l_ptr && r_ptr => types::INT.to_string(),
                    "-" if l_ptr => lt,
                    _ => types::INT.to_string(),
                })
            }
            Expression::Assignment { target, .. } => self.expr_type(frame, target),
            Expression::Call { callee, .. } => match callee.as_ref() {
                Expression::MemberAccess { object, member, .. } => {
                    let object_fqn = self.expr_type(frame, object)?;
                    let base = types::strip_pointers(&object_fqn);
                    let hit = functions::find_method(self.ctx, base, &member.text)
                        .map_err(CodeGenError::Logic)?
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!(
                                "codegen: no method '{}' on '{}'",
                                member.text, base
                            ))
                        })?;
                    let scope = resolver::scope_for_struct(self.ctx, hit.defining)
                        .map_err(CodeGenError::Logic)?;
                    self.resolve_in(&hit.func.return_type, &scope)
                }
                Expression::Variable { name } => {
                    let hit = functions::find_free_function(self.ctx, &name.text, &frame.scope)
                        .map_err(CodeGenError::Logic)?
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!(
                                "codegen: unresolved function '{}'",
                                name.text
                            ))
                        })?;
                    self.resolve_in(&hit.func.return_type, &hit.scope())
                }
                Expression::QualifiedAccess {
                    qualifier, member, ..
                } => {
                    let hit = functions::find_free_function_qualified(
                        self.ctx,
                        qualifier,
                        &member.text,
                        &frame.scope,
                    )
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: unresolved function '{}::{}'",
                            qualifier, member.text
                        ))
                    })?;
                    self.resolve_in(&hit.func.return_type, &hit.scope())
                }
                other => Err(CodeGenError::Logic(format!(
                    "codegen: uncallable callee {:?}",
                    other.token().text
                ))),
            },
            Expression::MemberAccess { object, member, .. } => {
                let object_fqn = self.expr_type(frame, object)?;
                let base = types::strip_pointers(&object_fqn);
                let (defining, member_var) = functions::find_member(self.ctx, base, &member.text)
                    .map_err(CodeGenError::Logic)?
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: no member '{}' on '{}'",
                            member.text, base
                        ))
                    })?;
                let scope = resolver::scope_for_struct(self.ctx, defining)
                    .map_err(CodeGenError::Logic)?;
                self.resolve_in(&member_var.ty, &scope)
            }
            Expression::QualifiedAccess {
                qualifier, member, ..
            } => {
                if functions::find_enum_value(self.ctx, Some(qualifier), &member.text, &frame.scope)
                    .is_some()
                {
                    Ok(types::INT.to_string())
                } else {
                    Ok("void*".to_string())
                }
            }
            Expression::New { ty, .. } => {
                let fqn = self.resolve_in(ty, &frame.scope)?;
                Ok(types::pointer_to(&fqn))
            }
        }
    }

    /// Size of the stack temporary an expression leaves behind, if it is a
    /// struct-valued call or operator expression.
    pub(super) fn stack_temporary(
        &self,
        frame: &Frame,
        expr: &Expression,
    ) -> Result<Option<u32>, CodeGenError> {
        if !matches!(expr, Expression::Call { .. } | Expression::Binary { .. }) {
            return Ok(None);
        }
        let fqn = self.expr_type(frame, expr)?;
        if types::is_struct_value(&fqn) {
            Ok(Some(self.size_of(&fqn)?))
        } else {
            Ok(None)
        }
    }

    // ========================================================================
    //                             L-value lowering
    // ========================================================================

    /// Lower an expression to an address in EAX. Returns the type FQN of
    /// the addressed storage.
    pub(super) fn lvalue(&mut self, frame: &Frame, expr: &Expression) -> Result<String, CodeGenError> {
        match expr {
            Expression::Variable { name } => {
                if let Some(symbol) = frame.symbols.try_get(&name.text) {
                    writeln!(self.text, "    lea eax, {}", ebp(symbol.offset))?;
                    return Ok(symbol.type_fqn.clone());
                }
                // Inside a method an unqualified name reaches this->member
                let owner = frame.owner_fqn.clone().ok_or_else(|| {
                    CodeGenError::Logic(format!("codegen: unresolved l-value '{}'", name.text))
                })?;
                let this = frame.symbols.try_get("this").ok_or_else(|| {
                    CodeGenError::Logic("codegen: method frame without 'this'".to_string())
                })?;
                let info = self
                    .ctx
                    .layouts
                    .member_info(self.ctx, &owner, &name.text)
                    .map_err(CodeGenError::Logic)?
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: no member '{}' on '{}'",
                            name.text, owner
                        ))
                    })?;
                writeln!(self.text, "    mov eax, {}", ebp(this.offset))?;
                if info.offset != 0 {
                    writeln!(self.text, "    add eax, {}", info.offset)?;
                }
                Ok(info.type_fqn)
            }
            Expression::MemberAccess {
                object,
                arrow,
                member,
            } => {
                let object_fqn = if *arrow {
                    self.rvalue(frame, object)?
                } else {
                    self.lvalue(frame, object)?
                };
                let base = types::strip_pointers(&object_fqn).to_string();
                let info = self
                    .ctx
                    .layouts
                    .member_info(self.ctx, &base, &member.text)
                    .map_err(CodeGenError::Logic)?
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: no member '{}' on '{}'",
                            member.text, base
                        ))
                    })?;
                if info.offset != 0 {
                    writeln!(self.text, "    add eax, {}", info.offset)?;
                }
                Ok(info.type_fqn)
            }
            Expression::Unary { op, operand } if op.text == "*" => {
                let pointer_fqn = self.rvalue(frame, operand)?;
                types::pointee(&pointer_fqn).map(str::to_string).ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "codegen: dereference of non-pointer '{}'",
                        pointer_fqn
                    ))
                })
            }
            other => Err(CodeGenError::Logic(format!(
                "codegen: expression at {}:{} is not an l-value",
                other.token().line,
                other.token().column
            ))),
        }
    }

    // ========================================================================
    //                             R-value lowering
    // ========================================================================

    /// Lower an expression to a value in EAX (struct values lower to their
    /// address). Returns the type FQN.
    pub(super) fn rvalue(&mut self, frame: &Frame, expr: &Expression) -> Result<String, CodeGenError> {
        match expr {
            Expression::IntLiteral { value, .. } => {
                writeln!(self.text, "    mov eax, {}", *value as i32)?;
                Ok(types::INT.to_string())
            }
            Expression::StringLiteral { label, .. } => {
                writeln!(self.text, "    mov eax, {}", label)?;
                Ok("char*".to_string())
            }
            Expression::Sizeof { ty, .. } => {
                let fqn = self.resolve_in(ty, &frame.scope)?;
                let size = self.size_of(&fqn)?;
                writeln!(self.text, "    mov eax, {}", size)?;
                Ok(types::INT.to_string())
            }
            Expression::Variable { name } => {
                if let Some(symbol) = frame.symbols.try_get(&name.text) {
                    let fqn = symbol.type_fqn.clone();
                    let offset = symbol.offset;
                    if types::is_struct_value(&fqn) {
                        writeln!(self.text, "    lea eax, {}", ebp(offset))?;
                    } else if self.size_of(&fqn)? == 1 {
                        writeln!(self.text, "    movzx eax, byte {}", ebp(offset))?;
                    } else {
                        writeln!(self.text, "    mov eax, {}", ebp(offset))?;
                    }
                    return Ok(fqn);
                }
                if let Some(value) =
                    functions::find_enum_value(self.ctx, None, &name.text, &frame.scope)
                {
                    writeln!(self.text, "    mov eax, {}", value as i32)?;
                    return Ok(types::INT.to_string());
                }
                // this->member read
                let fqn = self.lvalue(frame, expr)?;
                self.load_from_eax_address(&fqn)?;
                Ok(fqn)
            }
            Expression::Unary { op, operand } => match op.text.as_str() {
                "&" => {
                    let fqn = self.lvalue(frame, operand)?;
                    Ok(types::pointer_to(&fqn))
                }
                "*" => {
                    let pointer_fqn = self.rvalue(frame, operand)?;
                    let inner = types::pointee(&pointer_fqn)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!(
                                "codegen: dereference of non-pointer '{}'",
                                pointer_fqn
                            ))
                        })?;
                    self.load_from_eax_address(&inner)?;
                    Ok(inner)
                }
                "-" => {
                    let fqn = self.rvalue(frame, operand)?;
                    writeln!(self.text, "    neg eax")?;
                    Ok(fqn)
                }
                "!" => {
                    self.rvalue(frame, operand)?;
                    writeln!(self.text, "    cmp eax, 0")?;
                    writeln!(self.text, "    sete al")?;
                    writeln!(self.text, "    movzx eax, al")?;
                    Ok(types::INT.to_string())
                }
                other => Err(CodeGenError::Logic(format!(
                    "codegen: unknown unary operator '{}'",
                    other
                ))),
            },
            Expression::Binary { left, op, right } => self.binary(frame, left, op, right),
            Expression::Assignment { target, value, .. } => self.assignment(frame, target, value),
            Expression::Call { callee, args, .. } => self.call(frame, callee, args),
            Expression::MemberAccess { .. } => {
                let fqn = self.lvalue(frame, expr)?;
                self.load_from_eax_address(&fqn)?;
                Ok(fqn)
            }
            Expression::QualifiedAccess {
                qualifier,
                member,
                ..
            } => {
                if let Some(value) =
                    functions::find_enum_value(self.ctx, Some(qualifier), &member.text, &frame.scope)
                {
                    writeln!(self.text, "    mov eax, {}", value as i32)?;
                    return Ok(types::INT.to_string());
                }
                let hit = functions::find_free_function_qualified(
                    self.ctx,
                    qualifier,
                    &member.text,
                    &frame.scope,
                )
                .ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "codegen: unresolved name '{}::{}'",
                        qualifier, member.text
                    ))
                })?;
                if hit.func.is_external() {
                    self.mark_external(&hit.func.name);
                    writeln!(self.text, "    mov eax, [{}]", hit.func.name)?;
                } else {
                    writeln!(self.text, "    mov eax, {}", function_label(hit.func))?;
                }
                Ok("void*".to_string())
            }
            Expression::New { ty, args, .. } => self.new_expression(frame, ty, args),
            Expression::InitializerList { token, .. } => Err(CodeGenError::Logic(format!(
                "codegen: initializer list at {}:{} outside a declaration",
                token.line, token.column
            ))),
        }
    }

    /// Replace the address in EAX with the value it points at, honoring
    /// the storage width. Struct values stay as their address.
    fn load_from_eax_address(&mut self, fqn: &str) -> Result<(), CodeGenError> {
        if types::is_struct_value(fqn) {
            return Ok(());
        }
        if self.size_of(fqn)? == 1 {
            writeln!(self.text, "    movzx eax, byte [eax]")?;
        } else {
            writeln!(self.text, "    mov eax, [eax]")?;
        }
        Ok(())
    }

    // ========================================================================
    //                            Binary operators
    // ========================================================================

    fn binary(
        &mut self,
        frame: &Frame,
        left: &Expression,
        op: &crate::lexer::Token,
        right: &Expression,
    ) -> Result<String, CodeGenError> {
        let lt = self.expr_type(frame, left)?;

        // Struct operands lower as a call to the mangled operator method
        if types::is_struct_value(&lt) {
            if op.text != "+" {
                return Err(CodeGenError::Logic(format!(
                    "codegen: operator '{}' on struct '{}'",
                    op.text, lt
                )));
            }
            return self.method_call(frame, left, "operator_plus", std::slice::from_ref(right));
        }

        // Right first, pushed; left into EAX; right popped into ECX
        let rt = self.rvalue(frame, right)?;
        writeln!(self.text, "    push eax")?;
        let lt = self.rvalue(frame, left)?;
        writeln!(self.text, "    pop ecx")?;

        let l_ptr = types::is_pointer(&lt);
        let r_ptr = types::is_pointer(&rt);

        match op.text.as_str() {
            "+" => {
                if l_ptr && !r_ptr {
                    self.scale_register("ecx", &lt)?;
                    writeln!(self.text, "    add eax, ecx")?;
                    Ok(lt)
                } else if !l_ptr && r_ptr {
                    self.scale_register("eax", &rt)?;
                    writeln!(self.text, "    add eax, ecx")?;
                    Ok(rt)
                } else {
                    writeln!(self.text, "    add eax, ecx")?;
                    Ok(types::INT.to_string())
                }
            }
            "-" => {
                if l_ptr && r_ptr {
                    writeln!(self.text, "    sub eax, ecx")?;
                    let elem = self.element_size(&lt)?;
                    if elem > 1 {
                        writeln!(self.text, "    mov ecx, {}", elem)?;
                        writeln!(self.text, "    cdq")?;
                        writeln!(self.text, "    idiv ecx")?;
                    }
                    Ok(types::INT.to_string())
                } else if l_ptr {
                    self.scale_register("ecx", &lt)?;
                    writeln!(self.text, "    sub eax, ecx")?;
                    Ok(lt)
                } else {
                    writeln!(self.text, "    sub eax, ecx")?;
                    Ok(types::INT.to_string())
                }
            }
            "*" => {
                writeln!(self.text, "    imul eax, ecx")?;
                Ok(types::INT.to_string())
            }
            "/" => {
                writeln!(self.text, "    cdq")?;
                writeln!(self.text, "    idiv ecx")?;
                Ok(types::INT.to_string())
            }
            "%" => {
                writeln!(self.text, "    cdq")?;
                writeln!(self.text, "    idiv ecx")?;
                writeln!(self.text, "    mov eax, edx")?;
                Ok(types::INT.to_string())
            }
            "==" | "!=" | "<" | ">" | "<=" | ">=" => {
                let set = match op.text.as_str() {
                    "==" => "sete",
                    "!=" => "setne",
                    "<" => "setl",
                    ">" => "setg",
                    "<=" => "setle",
                    _ => "setge",
                };
                writeln!(self.text, "    cmp eax, ecx")?;
                writeln!(self.text, "    {} al", set)?;
                writeln!(self.text, "    movzx eax, al")?;
                Ok(types::INT.to_string())
            }
            "&&" => {
                writeln!(self.text, "    cmp eax, 0")?;
                writeln!(self.text, "    setne al")?;
                writeln!(self.text, "    movzx eax, al")?;
                writeln!(self.text, "    cmp ecx, 0")?;
                writeln!(self.text, "    setne cl")?;
                writeln!(self.text, "    movzx ecx, cl")?;
                writeln!(self.text, "    and eax, ecx")?;
                Ok(types::INT.to_string())
            }
            "||" => {
                writeln!(self.text, "    or eax, ecx")?;
                writeln!(self.text, "    cmp eax, 0")?;
                writeln!(self.text, "    setne al")?;
                writeln!(self.text, "    movzx eax, al")?;
                Ok(types::INT.to_string())
            }
            other => Err(CodeGenError::Logic(format!(
                "codegen: unknown binary operator '{}'",
                other
            ))),
        }
    }

    fn element_size(&self, pointer_fqn: &str) -> Result<u32, CodeGenError> {
        let inner = types::pointee(pointer_fqn).ok_or_else(|| {
            CodeGenError::Logic(format!("codegen: '{}' is not a pointer", pointer_fqn))
        })?;
        Ok(self.size_of(inner)?.max(1))
    }

    /// Pre-scale the integer side of pointer arithmetic by element size
    fn scale_register(&mut self, register: &str, pointer_fqn: &str) -> Result<(), CodeGenError> {
        let elem = self.element_size(pointer_fqn)?;
        if elem > 1 {
            writeln!(self.text, "    imul {}, {}, {}", register, register, elem)?;
        }
        Ok(())
    }

    // ========================================================================
    //                               Assignment
    // ========================================================================

    fn assignment(
        &mut self,
        frame: &Frame,
        target: &Expression,
        value: &Expression,
    ) -> Result<String, CodeGenError> {
        self.rvalue(frame, value)?;
        writeln!(self.text, "    push eax")?;
        let target_fqn = self.lvalue(frame, target)?;
        writeln!(self.text, "    pop ecx")?;

        if types::is_struct_value(&target_fqn) {
            // Memberwise copy through memcpy(dst, src, size)
            let size = self.size_of(&target_fqn)?;
            self.mark_external("memcpy");
            writeln!(self.text, "    push {}", size)?;
            writeln!(self.text, "    push ecx")?;
            writeln!(self.text, "    push eax")?;
            writeln!(self.text, "    call [memcpy]")?;
            writeln!(self.text, "    add esp, 12")?;
        } else if self.size_of(&target_fqn)? == 1 {
            writeln!(self.text, "    mov [eax], cl")?;
        } else {
            writeln!(self.text, "    mov [eax], ecx")?;
        }
        writeln!(self.text, "    mov eax, ecx")?;
        Ok(target_fqn)
    }

    // ========================================================================
    //                                 Calls
    // ========================================================================

    fn call(
        &mut self,
        frame: &Frame,
        callee: &Expression,
        args: &[Expression],
    ) -> Result<String, CodeGenError> {
        match callee {
            Expression::MemberAccess { object, member, .. } => {
                self.method_call(frame, object, &member.text, args)
            }
            Expression::Variable { name } => {
                let hit = functions::find_free_function(self.ctx, &name.text, &frame.scope)
                    .map_err(CodeGenError::Logic)?
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "codegen: unresolved function '{}'",
                            name.text
                        ))
                    })?;
                self.free_call(frame, hit, args)
            }
            Expression::QualifiedAccess {
                qualifier, member, ..
            } => {
                let hit = functions::find_free_function_qualified(
                    self.ctx,
                    qualifier,
                    &member.text,
                    &frame.scope,
                )
                .ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "codegen: unresolved function '{}::{}'",
                        qualifier, member.text
                    ))
                })?;
                self.free_call(frame, hit, args)
            }
            other => Err(CodeGenError::Logic(format!(
                "codegen: uncallable expression at {}:{}",
                other.token().line,
                other.token().column
            ))),
        }
    }

    /// Push call arguments right to left. Struct-by-value arguments are
    /// pushed as a block of dwords from high to low address; a struct
    /// argument bound to a pointer parameter passes its address. Returns
    /// the pushed byte count.
    pub(super) fn push_call_arguments(
        &mut self,
        frame: &Frame,
        args: &[Expression],
        param_fqns: &[String],
    ) -> Result<u32, CodeGenError> {
        let mut bytes = 0;
        for (index, arg) in args.iter().enumerate().rev() {
            let arg_fqn = self.expr_type(frame, arg)?;
            let param_fqn = param_fqns.get(index);
            let struct_arg = types::is_struct_value(&arg_fqn);
            if struct_arg && param_fqn.is_some_and(|p| types::is_pointer(p)) {
                self.rvalue(frame, arg)?;
                writeln!(self.text, "    push eax")?;
                bytes += 4;
            } else if struct_arg {
                self.rvalue(frame, arg)?;
                let size = self.size_of(&arg_fqn)?;
                let rounded = size.div_ceil(4) * 4;
                let mut offset = rounded;
                while offset > 0 {
                    offset -= 4;
                    writeln!(self.text, "    push dword [eax+{}]", offset)?;
                }
                bytes += rounded;
            } else {
                self.rvalue(frame, arg)?;
                writeln!(self.text, "    push eax")?;
                bytes += 4;
            }
        }
        Ok(bytes)
    }

    fn free_call(
        &mut self,
        frame: &Frame,
        hit: functions::FunctionHit<'p>,
        args: &[Expression],
    ) -> Result<String, CodeGenError> {
        let callee_scope = hit.scope();
        let return_fqn = self.resolve_in(&hit.func.return_type, &callee_scope)?;
        let mut param_fqns = Vec::with_capacity(hit.func.parameters.len());
        for param in &hit.func.parameters {
            param_fqns.push(self.resolve_in(&param.ty, &callee_scope)?);
        }

        let struct_return = types::is_struct_value(&return_fqn);
        let mut hidden = 0;
        if struct_return {
            let size = self.size_of(&return_fqn)?;
            writeln!(self.text, "    sub esp, {}", size)?;
            writeln!(self.text, "    mov eax, esp")?;
            writeln!(self.text, "    push eax")?;
            hidden = 4;
        }

        let arg_bytes = self.push_call_arguments(frame, args, &param_fqns)?;

        if hit.func.is_external() {
            self.mark_external(&hit.func.name);
            writeln!(self.text, "    call [{}]", hit.func.name)?;
        } else {
            writeln!(self.text, "    call {}", function_label(hit.func))?;
        }
        let cleanup = arg_bytes + hidden;
        if cleanup > 0 {
            writeln!(self.text, "    add esp, {}", cleanup)?;
        }
        if struct_return {
            writeln!(self.text, "    mov eax, esp")?;
        }
        Ok(return_fqn)
    }

    /// Lower a method call: arguments, then `this` pushed last, then a
    /// direct call or an indirect call through the vtable slot.
    pub(super) fn method_call(
        &mut self,
        frame: &Frame,
        object: &Expression,
        method: &str,
        args: &[Expression],
    ) -> Result<String, CodeGenError> {
        let object_fqn = self.expr_type(frame, object)?;
        let base = types::strip_pointers(&object_fqn).to_string();

        if self.stack_temporary(frame, object)?.is_some() {
            return Err(CodeGenError::Logic(
                "codegen: method call on a temporary struct value is not supported".to_string(),
            ));
        }

        let hit = functions::find_method(self.ctx, &base, method)
            .map_err(CodeGenError::Logic)?
            .ok_or_else(|| {
                CodeGenError::Logic(format!("codegen: no method '{}' on '{}'", method, base))
            })?;
        let defining_scope =
            resolver::scope_for_struct(self.ctx, hit.defining).map_err(CodeGenError::Logic)?;
        let return_fqn = self.resolve_in(&hit.func.return_type, &defining_scope)?;
        let mut param_fqns = Vec::with_capacity(hit.func.parameters.len());
        for param in &hit.func.parameters {
            param_fqns.push(self.resolve_in(&param.ty, &defining_scope)?);
        }

        let struct_return = types::is_struct_value(&return_fqn);
        let mut hidden = 0;
        if struct_return {
            let size = self.size_of(&return_fqn)?;
            writeln!(self.text, "    sub esp, {}", size)?;
            writeln!(self.text, "    mov eax, esp")?;
            writeln!(self.text, "    push eax")?;
            hidden = 4;
        }

        let arg_bytes = self.push_call_arguments(frame, args, &param_fqns)?;

        // this: the object's address for `.`, its value for `->`
        if types::is_pointer(&object_fqn) {
            self.rvalue(frame, object)?;
        } else {
            self.lvalue(frame, object)?;
        }
        writeln!(self.text, "    push eax")?;

        let slot = self
            .ctx
            .vtables
            .slot_index(self.ctx, &base, method)
            .map_err(CodeGenError::Logic)?;
        match slot {
            Some(index) => {
                writeln!(self.text, "    mov eax, [esp]")?;
                writeln!(self.text, "    mov eax, [eax]")?;
                writeln!(self.text, "    call dword [eax+{}]", index * 4)?;
            }
            None => {
                writeln!(
                    self.text,
                    "    call {}",
                    method_label(&hit.defining.fqn(), &hit.func.name)
                )?;
            }
        }
        writeln!(self.text, "    add esp, {}", arg_bytes + hidden + 4)?;
        if struct_return {
            writeln!(self.text, "    mov eax, esp")?;
        }
        Ok(return_fqn)
    }

    // ========================================================================
    //                                  new
    // ========================================================================

    fn new_expression(
        &mut self,
        frame: &Frame,
        ty: &TypeNode,
        args: &[Expression],
    ) -> Result<String, CodeGenError> {
        let fqn = self.resolve_in(ty, &frame.scope)?;
        let size = self.size_of(&fqn)?;

        self.mark_external("malloc");
        writeln!(self.text, "    push {}", size)?;
        writeln!(self.text, "    call [malloc]")?;
        writeln!(self.text, "    add esp, 4")?;
        writeln!(self.text, "    mov edi, eax")?;

        if self
            .ctx
            .vtables
            .has_vtable(self.ctx, &fqn)
            .map_err(CodeGenError::Logic)?
        {
            writeln!(self.text, "    mov dword [edi], {}", vtable_label(&fqn))?;
        }

        let mut arg_fqns = Vec::with_capacity(args.len());
        for arg in args {
            arg_fqns.push(self.expr_type(frame, arg)?);
        }
        let ctor = functions::find_constructor(self.ctx, &fqn, &arg_fqns)
            .map_err(CodeGenError::Logic)?;
        match ctor {
            Some(ctor) => {
                self.emit_constructor_call(frame, &fqn, ctor, args, ThisArg::Register("edi"))?;
            }
            None if args.is_empty() => {}
            None => {
                return Err(CodeGenError::Logic(format!(
                    "codegen: no matching constructor for '{}'",
                    fqn
                )));
            }
        }

        writeln!(self.text, "    mov eax, edi")?;
        Ok(types::pointer_to(&fqn))
    }

    /// Push arguments and `this` and call the selected constructor. The
    /// `this` operand is computed after the arguments so their evaluation
    /// cannot clobber it.
    pub(super) fn emit_constructor_call(
        &mut self,
        frame: &Frame,
        owner_fqn: &str,
        ctor: &crate::ast::ConstructorDeclaration,
        args: &[Expression],
        this_arg: ThisArg,
    ) -> Result<(), CodeGenError> {
        let def = self
            .ctx
            .repository
            .find_struct(owner_fqn)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("codegen: unknown struct '{}'", owner_fqn))
            })?;
        let scope = resolver::scope_for_struct(self.ctx, def).map_err(CodeGenError::Logic)?;
        let mut param_fqns = Vec::with_capacity(ctor.parameters.len());
        for param in &ctor.parameters {
            param_fqns.push(self.resolve_in(&param.ty, &scope)?);
        }

        let arg_bytes = self.push_call_arguments(frame, args, &param_fqns)?;
        match this_arg {
            ThisArg::Register(register) => {
                writeln!(self.text, "    push {}", register)?;
            }
            ThisArg::FrameAddress(offset) => {
                writeln!(self.text, "    lea eax, {}", ebp(offset))?;
                writeln!(self.text, "    push eax")?;
            }
            ThisArg::FrameValue(offset) => {
                writeln!(self.text, "    mov eax, {}", ebp(offset))?;
                writeln!(self.text, "    push eax")?;
            }
        }
        writeln!(self.text, "    call {}", ctor_label(owner_fqn, &param_fqns))?;
        writeln!(self.text, "    add esp, {}", arg_bytes + 4)?;
        Ok(())
    }

    /// Destroy the object whose address is in EAX, dispatching through
    /// vtable slot 0 when the type has one, then leave EAX untouched.
    pub(super) fn emit_destructor_call(&mut self, fqn: &str) -> Result<(), CodeGenError> {
        let has_vtable = self
            .ctx
            .vtables
            .has_vtable(self.ctx, fqn)
            .map_err(CodeGenError::Logic)?;
        let virtual_dtor = has_vtable
            && self
                .ctx
                .vtables
                .vtable(self.ctx, fqn)
                .map_err(CodeGenError::Logic)?
                .first()
                .is_some_and(|s| s.is_destructor);
        if virtual_dtor {
            writeln!(self.text, "    mov ecx, [eax]")?;
            writeln!(self.text, "    push eax")?;
            writeln!(self.text, "    call dword [ecx]")?;
            writeln!(self.text, "    add esp, 4")?;
            return Ok(());
        }
        if functions::find_destructor(self.ctx, fqn).is_some() {
            writeln!(self.text, "    push eax")?;
            writeln!(self.text, "    call {}", dtor_label(fqn))?;
            writeln!(self.text, "    add esp, 4")?;
        }
        Ok(())
    }
}
