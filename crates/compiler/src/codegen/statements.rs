//! Statement lowering
//!
//! Control flow uses the canonical `_if_else_N`/`_if_end_N` and
//! `_while_start_N`/`_while_end_N` label pairs with a `cmp eax, 0` on the
//! lowered condition. Declarations orchestrate vptr initialization,
//! constructor selection, brace-list stores, and copy construction.
//! Struct temporaries produced by calls and operator expressions are
//! destroyed and popped at statement boundaries. `return` leaves its value
//! in EAX (or copies through the hidden pointer) and jumps to the
//! epilogue so local destructors still run.

use super::expressions::ThisArg;
use super::state::{ctor_label, ebp, vtable_label};
use super::{CodeGen, CodeGenError, Frame};
use crate::ast::{Expression, Statement};
use crate::functions;
use crate::symbols::RET_PTR_NAME;
use crate::types;
use std::fmt::Write as _;

impl<'c, 'p> CodeGen<'c, 'p> {
    /// Lower a block's statements in its own lexical scope, mirroring the
    /// analyzer's walk so name bindings resolve to the same slots.
    pub(super) fn gen_statements(
        &mut self,
        frame: &mut Frame,
        statements: &[Statement],
    ) -> Result<(), CodeGenError> {
        frame.symbols.enter_block();
        for stmt in statements {
            self.gen_statement(frame, stmt)?;
        }
        frame.symbols.exit_block();
        Ok(())
    }

    pub(super) fn gen_statement(
        &mut self,
        frame: &mut Frame,
        stmt: &Statement,
    ) -> Result<(), CodeGenError> {
        match stmt {
            Statement::Block(stmts) => self.gen_statements(frame, stmts),
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => self.gen_if(frame, condition, then_branch, else_branch.as_deref()),
            Statement::While { condition, body } => self.gen_while(frame, condition, body),
            Statement::Return { value, .. } => self.gen_return(frame, value.as_ref()),
            Statement::Declaration {
                name,
                initializer,
                constructor_args,
                ..
            } => self.gen_declaration(frame, name, initializer.as_ref(), constructor_args.as_deref()),
            Statement::Expression(expr) => self.gen_expression_statement(frame, expr),
            Statement::Delete { value, .. } => self.gen_delete(frame, value),
        }
    }

    fn gen_if(
        &mut self,
        frame: &mut Frame,
        condition: &Expression,
        then_branch: &Statement,
        else_branch: Option<&Statement>,
    ) -> Result<(), CodeGenError> {
        let n = self.fresh_label();
        self.rvalue(frame, condition)?;
        writeln!(self.text, "    cmp eax, 0")?;
        match else_branch {
            Some(else_branch) => {
                writeln!(self.text, "    je _if_else_{}", n)?;
                frame.symbols.enter_block();
                self.gen_statement(frame, then_branch)?;
                frame.symbols.exit_block();
                writeln!(self.text, "    jmp _if_end_{}", n)?;
                writeln!(self.text, "_if_else_{}:", n)?;
                frame.symbols.enter_block();
                self.gen_statement(frame, else_branch)?;
                frame.symbols.exit_block();
            }
            None => {
                writeln!(self.text, "    je _if_end_{}", n)?;
                frame.symbols.enter_block();
                self.gen_statement(frame, then_branch)?;
                frame.symbols.exit_block();
            }
        }
        writeln!(self.text, "_if_end_{}:", n)?;
        Ok(())
    }

    fn gen_while(
        &mut self,
        frame: &mut Frame,
        condition: &Expression,
        body: &Statement,
    ) -> Result<(), CodeGenError> {
        let n = self.fresh_label();
        writeln!(self.text, "_while_start_{}:", n)?;
        self.rvalue(frame, condition)?;
        writeln!(self.text, "    cmp eax, 0")?;
        writeln!(self.text, "    je _while_end_{}", n)?;
        frame.symbols.enter_block();
        self.gen_statement(frame, body)?;
        frame.symbols.exit_block();
        writeln!(self.text, "    jmp _while_start_{}", n)?;
        writeln!(self.text, "_while_end_{}:", n)?;
        Ok(())
    }

    fn gen_return(&mut self, frame: &Frame, value: Option<&Expression>) -> Result<(), CodeGenError> {
        let return_fqn = frame.symbols.return_fqn().to_string();

        if types::is_struct_value(&return_fqn) {
            let value = value.ok_or_else(|| {
                CodeGenError::Logic("codegen: struct return without a value".to_string())
            })?;
            // Source address into ESI, hidden result pointer into EDI
            self.rvalue(frame, value)?;
            writeln!(self.text, "    mov esi, eax")?;
            let ret_ptr = frame.symbols.try_get(RET_PTR_NAME).ok_or_else(|| {
                CodeGenError::Logic("codegen: struct return without hidden pointer".to_string())
            })?;
            writeln!(self.text, "    mov edi, {}", ebp(ret_ptr.offset))?;

            let copy_sig = [types::pointer_to(&return_fqn)];
            let copy_ctor = functions::find_constructor(self.ctx, &return_fqn, &copy_sig)
                .map_err(CodeGenError::Logic)?;
            if copy_ctor.is_some() {
                writeln!(self.text, "    push esi")?;
                writeln!(self.text, "    push edi")?;
                writeln!(self.text, "    call {}", ctor_label(&return_fqn, &copy_sig))?;
                writeln!(self.text, "    add esp, 8")?;
            } else {
                let size = self.size_of(&return_fqn)?;
                self.mark_external("memcpy");
                writeln!(self.text, "    push {}", size)?;
                writeln!(self.text, "    push esi")?;
                writeln!(self.text, "    push edi")?;
                writeln!(self.text, "    call [memcpy]")?;
                writeln!(self.text, "    add esp, 12")?;
            }
        } else if let Some(value) = value {
            self.rvalue(frame, value)?;
        }

        // The epilogue owns the actual ret so destructors run first
        writeln!(self.text, "    jmp {}", frame.end_label)?;
        Ok(())
    }

    fn gen_declaration(
        &mut self,
        frame: &mut Frame,
        name: &str,
        initializer: Option<&Expression>,
        constructor_args: Option<&[Expression]>,
    ) -> Result<(), CodeGenError> {
        frame.symbols.declare_local(name);
        let symbol = frame.symbols.try_get(name).ok_or_else(|| {
            CodeGenError::Logic(format!("codegen: local '{}' missing from frame", name))
        })?;
        let offset = symbol.offset;
        let fqn = symbol.type_fqn.clone();

        if !types::is_struct_value(&fqn) {
            if let Some(init) = initializer {
                self.rvalue(frame, init)?;
                self.store_to_frame(offset, &fqn)?;
                self.drop_temporary(frame, init)?;
            }
            return Ok(());
        }

        // Struct local: vptr first, then construction or initialization
        if self
            .ctx
            .vtables
            .has_vtable(self.ctx, &fqn)
            .map_err(CodeGenError::Logic)?
        {
            writeln!(self.text, "    lea eax, {}", ebp(offset))?;
            writeln!(self.text, "    mov dword [eax], {}", vtable_label(&fqn))?;
        }

        if let Some(args) = constructor_args {
            let mut arg_fqns = Vec::with_capacity(args.len());
            for arg in args {
                arg_fqns.push(self.expr_type(frame, arg)?);
            }
            let ctor = functions::find_constructor(self.ctx, &fqn, &arg_fqns)
                .map_err(CodeGenError::Logic)?;
            match ctor {
                Some(ctor) => {
                    self.emit_constructor_call(frame, &fqn, ctor, args, ThisArg::FrameAddress(offset))?;
                }
                None if args.is_empty() => {}
                None => {
                    return Err(CodeGenError::Logic(format!(
                        "codegen: no matching constructor for '{}'",
                        fqn
                    )));
                }
            }
            return Ok(());
        }

        match initializer {
            Some(Expression::InitializerList { values, .. }) => {
                let members = self
                    .ctx
                    .layouts
                    .members_of(self.ctx, &fqn)
                    .map_err(CodeGenError::Logic)?;
                for (value, member) in values.iter().zip(&members) {
                    self.rvalue(frame, value)?;
                    self.store_to_frame(offset + member.offset as i32, &member.type_fqn)?;
                }
                Ok(())
            }
            Some(init) => self.gen_struct_initializer(frame, &fqn, offset, init),
            None => {
                // Zero-argument constructor, if one exists
                let ctor = functions::find_constructor(self.ctx, &fqn, &[])
                    .map_err(CodeGenError::Logic)?;
                if let Some(ctor) = ctor {
                    self.emit_constructor_call(frame, &fqn, ctor, &[], ThisArg::FrameAddress(offset))?;
                }
                Ok(())
            }
        }
    }

    /// Initialize a struct local from an expression: same-type copy via
    /// the copy constructor (memcpy fallback), or a converting
    /// constructor `T(S)` / `T(S*)`. A temporary produced by the
    /// initializer is destroyed and popped afterwards.
    fn gen_struct_initializer(
        &mut self,
        frame: &Frame,
        fqn: &str,
        offset: i32,
        init: &Expression,
    ) -> Result<(), CodeGenError> {
        let init_fqn = self.expr_type(frame, init)?;

        if init_fqn == fqn {
            let copy_sig = [types::pointer_to(fqn)];
            let copy_ctor = functions::find_constructor(self.ctx, fqn, &copy_sig)
                .map_err(CodeGenError::Logic)?;
            self.rvalue(frame, init)?;
            if copy_ctor.is_some() {
                writeln!(self.text, "    push eax")?;
                writeln!(self.text, "    lea eax, {}", ebp(offset))?;
                writeln!(self.text, "    push eax")?;
                writeln!(self.text, "    call {}", ctor_label(fqn, &copy_sig))?;
                writeln!(self.text, "    add esp, 8")?;
            } else {
                let size = self.size_of(fqn)?;
                self.mark_external("memcpy");
                writeln!(self.text, "    mov ecx, eax")?;
                writeln!(self.text, "    lea eax, {}", ebp(offset))?;
                writeln!(self.text, "    push {}", size)?;
                writeln!(self.text, "    push ecx")?;
                writeln!(self.text, "    push eax")?;
                writeln!(self.text, "    call [memcpy]")?;
                writeln!(self.text, "    add esp, 12")?;
            }
            return self.drop_buried_temporary(frame, init);
        }

        let value_sig = [init_fqn.clone()];
        let pointer_sig = [types::pointer_to(&init_fqn)];
        let by_value = functions::find_constructor(self.ctx, fqn, &value_sig)
            .map_err(CodeGenError::Logic)?;
        let by_pointer = functions::find_constructor(self.ctx, fqn, &pointer_sig)
            .map_err(CodeGenError::Logic)?;
        let ctor = by_value.or(by_pointer).ok_or_else(|| {
            CodeGenError::Logic(format!(
                "codegen: no matching constructor for '{}' from '{}'",
                fqn, init_fqn
            ))
        })?;
        self.emit_constructor_call(
            frame,
            fqn,
            ctor,
            std::slice::from_ref(init),
            ThisArg::FrameAddress(offset),
        )?;
        self.drop_buried_temporary(frame, init)
    }

    fn gen_expression_statement(&mut self, frame: &Frame, expr: &Expression) -> Result<(), CodeGenError> {
        match self.stack_temporary(frame, expr)? {
            Some(size) => {
                let fqn = self.rvalue(frame, expr)?;
                // EAX points at the temporary on the stack top
                self.emit_destructor_call(&fqn)?;
                writeln!(self.text, "    add esp, {}", size)?;
                Ok(())
            }
            None => {
                self.rvalue(frame, expr)?;
                Ok(())
            }
        }
    }

    fn gen_delete(&mut self, frame: &Frame, value: &Expression) -> Result<(), CodeGenError> {
        let pointer_fqn = self.rvalue(frame, value)?;
        let target = types::pointee(&pointer_fqn).ok_or_else(|| {
            CodeGenError::Logic(format!("codegen: delete of non-pointer '{}'", pointer_fqn))
        })?;
        writeln!(self.text, "    mov edi, eax")?;

        if self.ctx.repository.find_struct(target).is_some() {
            writeln!(self.text, "    mov eax, edi")?;
            self.emit_destructor_call(target)?;
        }

        self.mark_external("free");
        writeln!(self.text, "    push edi")?;
        writeln!(self.text, "    call [free]")?;
        writeln!(self.text, "    add esp, 4")?;
        Ok(())
    }

    // ========================================================================
    //                               Helpers
    // ========================================================================

    /// Store EAX to a frame slot with the type's width
    fn store_to_frame(&mut self, offset: i32, fqn: &str) -> Result<(), CodeGenError> {
        if self.size_of(fqn)? == 1 {
            writeln!(self.text, "    mov byte {}, al", ebp(offset))?;
        } else {
            writeln!(self.text, "    mov {}, eax", ebp(offset))?;
        }
        Ok(())
    }

    /// Destroy and pop a stack temporary sitting on the stack top (the
    /// value in EAX is its address).
    fn drop_temporary(&mut self, frame: &Frame, expr: &Expression) -> Result<(), CodeGenError> {
        if let Some(size) = self.stack_temporary(frame, expr)? {
            let fqn = self.expr_type(frame, expr)?;
            writeln!(self.text, "    mov eax, esp")?;
            self.emit_destructor_call(&fqn)?;
            writeln!(self.text, "    add esp, {}", size)?;
        }
        Ok(())
    }

    /// Same as `drop_temporary`, for temporaries that ended up back on the
    /// stack top after a balanced constructor call.
    fn drop_buried_temporary(&mut self, frame: &Frame, expr: &Expression) -> Result<(), CodeGenError> {
        self.drop_temporary(frame, expr)
    }
}
