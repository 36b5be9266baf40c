//! Function, method, constructor, and destructor emission
//!
//! Each declaration gets its label, a prologue that reserves locals below
//! EBP and saves the callee-preserved registers under them, its lowered
//! body, and an epilogue that runs local destructors in reverse
//! declaration order before restoring registers and returning. Return
//! statements jump to the epilogue label so cleanup always runs.

use super::state::{ctor_label, dtor_label, ebp, function_label};
use super::{CodeGen, CodeGenError, Frame};
use crate::ast::{ConstructorDeclaration, DestructorDeclaration, FunctionDeclaration, StructDefinition};
use crate::context::Scope;
use crate::functions;
use crate::resolver;
use crate::symbols::SymbolTable;
use std::fmt::Write as _;

impl<'c, 'p> CodeGen<'c, 'p> {
    pub(super) fn gen_function(
        &mut self,
        func: &FunctionDeclaration,
        scope: Scope,
    ) -> Result<(), CodeGenError> {
        let Some(body) = &func.body else {
            return Ok(());
        };
        let label = function_label(func);
        let symbols = SymbolTable::for_function(self.ctx, func, &scope);
        let mut frame = Frame {
            symbols,
            scope,
            owner_fqn: func.owner.clone(),
            end_label: format!("{}_ret", label),
        };

        writeln!(self.text, "{}:", label)?;
        self.prologue(&frame)?;
        self.gen_statements(&mut frame, body)?;
        self.epilogue(&frame)?;
        Ok(())
    }

    pub(super) fn gen_constructor(
        &mut self,
        def: &StructDefinition,
        ctor: &ConstructorDeclaration,
        scope: Scope,
    ) -> Result<(), CodeGenError> {
        let mut param_fqns = Vec::with_capacity(ctor.parameters.len());
        for param in &ctor.parameters {
            param_fqns.push(self.resolve_in(&param.ty, &scope)?);
        }
        let label = ctor_label(&ctor.owner, &param_fqns);
        let symbols = SymbolTable::for_constructor(self.ctx, ctor, &scope);
        let mut frame = Frame {
            symbols,
            scope,
            owner_fqn: Some(ctor.owner.clone()),
            end_label: format!("{}_ret", label),
        };

        writeln!(self.text, "{}:", label)?;
        self.prologue(&frame)?;

        if let Some(args) = &ctor.base_initializer {
            let base_fqn = resolver::resolve_base(self.ctx, def)
                .map_err(CodeGenError::Logic)?
                .ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "codegen: base initializer in '{}' without a base class",
                        ctor.owner
                    ))
                })?;
            let mut arg_fqns = Vec::with_capacity(args.len());
            for arg in args {
                arg_fqns.push(self.expr_type(&frame, arg)?);
            }
            let base_ctor = functions::find_constructor(self.ctx, &base_fqn, &arg_fqns)
                .map_err(CodeGenError::Logic)?
                .ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "codegen: no matching constructor for base '{}'",
                        base_fqn
                    ))
                })?;
            // this forwards unchanged: the base subobject sits at offset 0
            self.emit_constructor_call(
                &frame,
                &base_fqn,
                base_ctor,
                args,
                super::expressions::ThisArg::FrameValue(8),
            )?;
        }

        self.gen_statements(&mut frame, &ctor.body)?;
        self.epilogue(&frame)?;
        Ok(())
    }

    pub(super) fn gen_destructor(
        &mut self,
        dtor: &DestructorDeclaration,
        scope: Scope,
    ) -> Result<(), CodeGenError> {
        let label = dtor_label(&dtor.owner);
        let symbols = SymbolTable::for_destructor(self.ctx, dtor, &scope);
        let mut frame = Frame {
            symbols,
            scope,
            owner_fqn: Some(dtor.owner.clone()),
            end_label: format!("{}_ret", label),
        };

        writeln!(self.text, "{}:", label)?;
        self.prologue(&frame)?;
        self.gen_statements(&mut frame, &dtor.body)?;
        self.epilogue(&frame)?;
        Ok(())
    }

    /// Locals live at `[ebp-total, ebp)`; the saved registers sit below
    /// them so the epilogue pops line up.
    fn prologue(&mut self, frame: &Frame) -> Result<(), CodeGenError> {
        writeln!(self.text, "    push ebp")?;
        writeln!(self.text, "    mov ebp, esp")?;
        let locals = frame.symbols.total_local_size();
        if locals > 0 {
            writeln!(self.text, "    sub esp, {}", locals)?;
        }
        writeln!(self.text, "    push ebx")?;
        writeln!(self.text, "    push esi")?;
        writeln!(self.text, "    push edi")?;
        Ok(())
    }

    /// Run destructible locals in reverse declaration order, preserving
    /// the return value in EAX around the calls, then restore registers
    /// and return.
    fn epilogue(&mut self, frame: &Frame) -> Result<(), CodeGenError> {
        writeln!(self.text, "{}:", frame.end_label)?;

        let destructible: Vec<(i32, String)> = frame
            .symbols
            .destructible_locals(self.ctx)
            .into_iter()
            .map(|s| (s.offset, s.type_fqn.clone()))
            .collect();
        if !destructible.is_empty() {
            writeln!(self.text, "    push eax")?;
            for (offset, fqn) in destructible.iter().rev() {
                writeln!(self.text, "    lea eax, {}", ebp(*offset))?;
                self.emit_destructor_call(fqn)?;
            }
            writeln!(self.text, "    pop eax")?;
        }

        writeln!(self.text, "    pop edi")?;
        writeln!(self.text, "    pop esi")?;
        writeln!(self.text, "    pop ebx")?;
        writeln!(self.text, "    mov esp, ebp")?;
        writeln!(self.text, "    pop ebp")?;
        writeln!(self.text, "    ret")?;
        Ok(())
    }
}
