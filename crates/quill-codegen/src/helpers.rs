//! Synthesized runtime functions.
//!
//! String helpers and the per-type stringify converters are linked only
//! if used; a program that never concatenates or interpolates carries
//! none of them. Field accessors, slot adapters, and itable machinery
//! are emitted per class as layouts demand.

use crate::layout::SlotImpl;
use crate::lower::FuncCtx;
use crate::{CodegenError, Generator, Result, ref_null};
use quill_types::TypeSubstitution;
use wasm_encoder::{BlockType, HeapType, Instruction, RefType, ValType};

impl<'a> Generator<'a> {
    // =========================================================================
    // Helper registry
    // =========================================================================

    fn helper(&mut self, name: &str, params: Vec<ValType>, results: Vec<ValType>) -> (u32, bool) {
        if let Some(&idx) = self.helpers.get(name) {
            return (idx, false);
        }
        let fty = self.types.func_type(params, results);
        let idx = self.funcs.declare(name.to_string(), fty);
        self.helpers.insert(name.to_string(), idx);
        (idx, true)
    }

    fn str_val(&self) -> ValType {
        ref_null(self.base.str_)
    }

    // =========================================================================
    // String helpers
    // =========================================================================

    pub(crate) fn helper_str_concat(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("str_concat", vec![sv, sv], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        let chars = self.base.chars;
        let str_ = self.base.str_;
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 2, None);
        let ba = ctx.new_local(ref_null(chars));
        let bb = ctx.new_local(ref_null(chars));
        let la = ctx.new_local(ValType::I32);
        let lb = ctx.new_local(ValType::I32);
        let out = ctx.new_local(ref_null(chars));

        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::StructGet {
            struct_type_index: str_,
            field_index: 0,
        });
        ctx.emit(Instruction::LocalTee(ba));
        ctx.emit(Instruction::ArrayLen);
        ctx.emit(Instruction::LocalSet(la));
        ctx.emit(Instruction::LocalGet(1));
        ctx.emit(Instruction::StructGet {
            struct_type_index: str_,
            field_index: 0,
        });
        ctx.emit(Instruction::LocalTee(bb));
        ctx.emit(Instruction::ArrayLen);
        ctx.emit(Instruction::LocalSet(lb));

        ctx.emit(Instruction::LocalGet(la));
        ctx.emit(Instruction::LocalGet(lb));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArrayNewDefault(chars));
        ctx.emit(Instruction::LocalSet(out));

        // copy a into out[0..la]
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::LocalGet(ba));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::LocalGet(la));
        ctx.emit(Instruction::ArrayCopy {
            array_type_index_dst: chars,
            array_type_index_src: chars,
        });
        // copy b into out[la..]
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::LocalGet(la));
        ctx.emit(Instruction::LocalGet(bb));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::LocalGet(lb));
        ctx.emit(Instruction::ArrayCopy {
            array_type_index_dst: chars,
            array_type_index_src: chars,
        });

        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::RefAsNonNull);
        ctx.emit(Instruction::StructNew(str_));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    pub(crate) fn helper_str_eq(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("str_eq", vec![sv, sv], vec![ValType::I32]);
        if !fresh {
            return Ok(idx);
        }
        let chars = self.base.chars;
        let str_ = self.base.str_;
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 2, None);
        let ba = ctx.new_local(ref_null(chars));
        let bb = ctx.new_local(ref_null(chars));
        let la = ctx.new_local(ValType::I32);
        let i = ctx.new_local(ValType::I32);

        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::StructGet {
            struct_type_index: str_,
            field_index: 0,
        });
        ctx.emit(Instruction::LocalTee(ba));
        ctx.emit(Instruction::ArrayLen);
        ctx.emit(Instruction::LocalSet(la));
        ctx.emit(Instruction::LocalGet(1));
        ctx.emit(Instruction::StructGet {
            struct_type_index: str_,
            field_index: 0,
        });
        ctx.emit(Instruction::LocalTee(bb));
        ctx.emit(Instruction::ArrayLen);
        ctx.emit(Instruction::LocalGet(la));
        ctx.emit(Instruction::I32Ne);
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::Return);
        ctx.close_block();

        let done = ctx.open_labelled(Instruction::Block(BlockType::Empty));
        let l = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::LocalGet(la));
        ctx.emit(Instruction::I32GeS);
        let rel = ctx.rel_level(done);
        ctx.emit(Instruction::BrIf(rel));
        ctx.emit(Instruction::LocalGet(ba));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::ArrayGetU(chars));
        ctx.emit(Instruction::LocalGet(bb));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::ArrayGetU(chars));
        ctx.emit(Instruction::I32Ne);
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::Return);
        ctx.close_block();
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::LocalSet(i));
        let rel = ctx.rel_level(l);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();
        ctx.emit(Instruction::I32Const(1));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    pub(crate) fn helper_bool_to_str(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("bool_to_str", vec![ValType::I32], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        let t = self.string_literal("true");
        let f = self.string_literal("false");
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.open_if(BlockType::Result(self.str_val()));
        ctx.emit(Instruction::GlobalGet(t));
        ctx.emit(Instruction::Else);
        ctx.emit(Instruction::GlobalGet(f));
        ctx.close_block();
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    pub(crate) fn helper_i32_to_str(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("i32_to_str", vec![ValType::I32], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        let chars = self.base.chars;
        let str_ = self.base.str_;
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        let neg = ctx.new_local(ValType::I32);
        let n = ctx.new_local(ValType::I32);
        let count = ctx.new_local(ValType::I32);
        let t = ctx.new_local(ValType::I32);
        let out = ctx.new_local(ref_null(chars));
        let pos = ctx.new_local(ValType::I32);

        // neg = v < 0; n = magnitude (two's complement safe).
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::I32LtS);
        ctx.emit(Instruction::LocalTee(neg));
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I32Sub);
        ctx.emit(Instruction::LocalSet(n));
        ctx.emit(Instruction::Else);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::LocalSet(n));
        ctx.close_block();

        // count digits
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::LocalSet(count));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I32Const(10));
        ctx.emit(Instruction::I32DivU);
        ctx.emit(Instruction::LocalSet(t));
        let done = ctx.open_labelled(Instruction::Block(BlockType::Empty));
        let l = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(t));
        ctx.emit(Instruction::I32Eqz);
        let rel = ctx.rel_level(done);
        ctx.emit(Instruction::BrIf(rel));
        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::LocalSet(count));
        ctx.emit(Instruction::LocalGet(t));
        ctx.emit(Instruction::I32Const(10));
        ctx.emit(Instruction::I32DivU);
        ctx.emit(Instruction::LocalSet(t));
        let rel = ctx.rel_level(l);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();

        // allocate count + sign
        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::LocalGet(neg));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArrayNewDefault(chars));
        ctx.emit(Instruction::LocalSet(out));

        // fill digits from the end
        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::LocalGet(neg));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Sub);
        ctx.emit(Instruction::LocalSet(pos));
        let fill = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::LocalGet(pos));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I32Const(10));
        ctx.emit(Instruction::I32RemU);
        ctx.emit(Instruction::I32Const(48));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArraySet(chars));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I32Const(10));
        ctx.emit(Instruction::I32DivU);
        ctx.emit(Instruction::LocalTee(n));
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::LocalGet(pos));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Sub);
        ctx.emit(Instruction::LocalSet(pos));
        let rel = ctx.rel_level(fill);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();

        // sign
        ctx.emit(Instruction::LocalGet(neg));
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::I32Const(45));
        ctx.emit(Instruction::ArraySet(chars));
        ctx.close_block();

        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::RefAsNonNull);
        ctx.emit(Instruction::StructNew(str_));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    pub(crate) fn helper_u32_to_str(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("u32_to_str", vec![ValType::I32], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        // Widen to i64 and reuse the i64 digits path; u32 values are
        // non-negative there.
        let i64s = self.helper_i64_to_str()?;
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I64ExtendI32U);
        ctx.emit(Instruction::Call(i64s));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    pub(crate) fn helper_i64_to_str(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("i64_to_str", vec![ValType::I64], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        let chars = self.base.chars;
        let str_ = self.base.str_;
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        let neg = ctx.new_local(ValType::I32);
        let n = ctx.new_local(ValType::I64);
        let count = ctx.new_local(ValType::I32);
        let t = ctx.new_local(ValType::I64);
        let out = ctx.new_local(ref_null(chars));
        let pos = ctx.new_local(ValType::I32);

        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I64Const(0));
        ctx.emit(Instruction::I64LtS);
        ctx.emit(Instruction::LocalTee(neg));
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::I64Const(0));
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I64Sub);
        ctx.emit(Instruction::LocalSet(n));
        ctx.emit(Instruction::Else);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::LocalSet(n));
        ctx.close_block();

        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::LocalSet(count));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I64Const(10));
        ctx.emit(Instruction::I64DivU);
        ctx.emit(Instruction::LocalSet(t));
        let done = ctx.open_labelled(Instruction::Block(BlockType::Empty));
        let l = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(t));
        ctx.emit(Instruction::I64Eqz);
        let rel = ctx.rel_level(done);
        ctx.emit(Instruction::BrIf(rel));
        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::LocalSet(count));
        ctx.emit(Instruction::LocalGet(t));
        ctx.emit(Instruction::I64Const(10));
        ctx.emit(Instruction::I64DivU);
        ctx.emit(Instruction::LocalSet(t));
        let rel = ctx.rel_level(l);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();

        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::LocalGet(neg));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArrayNewDefault(chars));
        ctx.emit(Instruction::LocalSet(out));

        ctx.emit(Instruction::LocalGet(count));
        ctx.emit(Instruction::LocalGet(neg));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Sub);
        ctx.emit(Instruction::LocalSet(pos));
        let fill = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::LocalGet(pos));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I64Const(10));
        ctx.emit(Instruction::I64RemU);
        ctx.emit(Instruction::I32WrapI64);
        ctx.emit(Instruction::I32Const(48));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArraySet(chars));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I64Const(10));
        ctx.emit(Instruction::I64DivU);
        ctx.emit(Instruction::LocalTee(n));
        ctx.emit(Instruction::I64Eqz);
        ctx.emit(Instruction::I32Eqz);
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::LocalGet(pos));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Sub);
        ctx.emit(Instruction::LocalSet(pos));
        let rel = ctx.rel_level(fill);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();

        ctx.emit(Instruction::LocalGet(neg));
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::I32Const(0));
        ctx.emit(Instruction::I32Const(45));
        ctx.emit(Instruction::ArraySet(chars));
        ctx.close_block();

        ctx.emit(Instruction::LocalGet(out));
        ctx.emit(Instruction::RefAsNonNull);
        ctx.emit(Instruction::StructNew(str_));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    /// Fixed-point rendering with six fractional digits; enough for the
    /// diagnostic-grade formatting the language promises.
    pub(crate) fn helper_f64_to_str(&mut self) -> Result<u32> {
        let sv = self.str_val();
        let (idx, fresh) = self.helper("f64_to_str", vec![ValType::F64], vec![sv]);
        if !fresh {
            return Ok(idx);
        }
        let chars = self.base.chars;
        let i64s = self.helper_i64_to_str()?;
        let concat = self.helper_str_concat()?;
        let dot = self.string_literal(".");
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        let ip = ctx.new_local(ValType::I64);
        let frac = ctx.new_local(ValType::F64);
        let digits = ctx.new_local(ref_null(chars));
        let i = ctx.new_local(ValType::I32);
        let d = ctx.new_local(ValType::I64);

        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::I64TruncSatF64S);
        ctx.emit(Instruction::LocalSet(ip));
        // frac = |v - ip|
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::LocalGet(ip));
        ctx.emit(Instruction::F64ConvertI64S);
        ctx.emit(Instruction::F64Sub);
        ctx.emit(Instruction::F64Abs);
        ctx.emit(Instruction::LocalSet(frac));

        // integer part + "."
        ctx.emit(Instruction::LocalGet(ip));
        ctx.emit(Instruction::Call(i64s));
        ctx.emit(Instruction::GlobalGet(dot));
        ctx.emit(Instruction::Call(concat));

        // six fractional digits
        ctx.emit(Instruction::I32Const(6));
        ctx.emit(Instruction::ArrayNewDefault(chars));
        ctx.emit(Instruction::LocalSet(digits));
        let fill = ctx.open_labelled(Instruction::Block(BlockType::Empty));
        let l = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::I32Const(6));
        ctx.emit(Instruction::I32GeS);
        let rel = ctx.rel_level(fill);
        ctx.emit(Instruction::BrIf(rel));
        ctx.emit(Instruction::LocalGet(frac));
        ctx.emit(Instruction::F64Const(10.0.into()));
        ctx.emit(Instruction::F64Mul);
        ctx.emit(Instruction::LocalTee(frac));
        ctx.emit(Instruction::I64TruncSatF64S);
        ctx.emit(Instruction::LocalSet(d));
        ctx.emit(Instruction::LocalGet(digits));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::LocalGet(d));
        ctx.emit(Instruction::I32WrapI64);
        ctx.emit(Instruction::I32Const(48));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::ArraySet(chars));
        ctx.emit(Instruction::LocalGet(frac));
        ctx.emit(Instruction::LocalGet(d));
        ctx.emit(Instruction::F64ConvertI64S);
        ctx.emit(Instruction::F64Sub);
        ctx.emit(Instruction::LocalSet(frac));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::LocalSet(i));
        let rel = ctx.rel_level(l);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.close_block();

        ctx.emit(Instruction::LocalGet(digits));
        ctx.emit(Instruction::RefAsNonNull);
        ctx.emit(Instruction::StructNew(self.base.str_));
        ctx.emit(Instruction::Call(concat));
        self.funcs.define(idx, ctx.into_function());
        Ok(idx)
    }

    // =========================================================================
    // Field accessors, adapters, finders
    // =========================================================================

    pub(crate) fn lower_field_get(&mut self, index: u32, class: usize, field: usize) -> Result<()> {
        let (struct_ty, pos) = {
            let layout = self.layouts[class].as_ref().expect("layout");
            (layout.struct_ty, layout.field_pos(field))
        };
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::StructGet {
            struct_type_index: struct_ty,
            field_index: pos,
        });
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    pub(crate) fn lower_field_set(&mut self, index: u32, class: usize, field: usize) -> Result<()> {
        let (struct_ty, pos) = {
            let layout = self.layouts[class].as_ref().expect("layout");
            (layout.struct_ty, layout.field_pos(field))
        };
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 2, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::LocalGet(1));
        ctx.emit(Instruction::StructSet {
            struct_type_index: struct_ty,
            field_index: pos,
        });
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    /// Bridge from a slot's introduced receiver type to the overriding
    /// class: one cast, then the real method.
    pub(crate) fn lower_slot_adapter(
        &mut self,
        index: u32,
        class: usize,
        slot: usize,
        target: u32,
    ) -> Result<()> {
        let (own_struct, param_count) = {
            let layout = self.layouts[class].as_ref().expect("layout");
            (layout.struct_ty, layout.slots[slot].params.len() as u32)
        };
        let mut ctx = FuncCtx::new(TypeSubstitution::new(), param_count + 1, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(own_struct)));
        for i in 0..param_count {
            ctx.emit(Instruction::LocalGet(1 + i));
        }
        ctx.emit(Instruction::Call(target));
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    /// Interface-method adapter: object root in, concrete dispatch out.
    pub(crate) fn lower_iface_adapter(
        &mut self,
        index: u32,
        class: usize,
        iface: usize,
        method: u32,
    ) -> Result<()> {
        let sigs = self.iface_method_sigs(iface)?;
        let (params, _ret) = sigs
            .get(method as usize)
            .cloned()
            .ok_or(CodegenError::ErroneousInput)?;
        let method_name = {
            let decl = self.bundle.ifaces[iface].decl;
            self.program
                .decls
                .interface_info(decl)
                .and_then(|i| i.members.get(method as usize))
                .map(|m| m.name.clone())
                .ok_or(CodegenError::ErroneousInput)?
        };

        let (own_struct, impl_func) = {
            let layout = self.layouts[class].as_ref().expect("layout");
            let impl_func = match layout.slot_named(&method_name) {
                Some(pos) => match layout.slots[pos].impl_ {
                    SlotImpl::Func(f) => Some(f),
                    SlotImpl::Abstract => None,
                },
                None => None,
            };
            (layout.struct_ty, impl_func)
        };
        let impl_func = match impl_func {
            Some(f) => f,
            None => {
                // Non-virtual implementation: resolve along the chain.
                self.find_direct_method(class, &method_name)?
            }
        };

        let mut ctx = FuncCtx::new(TypeSubstitution::new(), params.len() as u32 + 1, None);
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::RefCastNullable(HeapType::Concrete(own_struct)));
        for i in 0..params.len() as u32 {
            ctx.emit(Instruction::LocalGet(1 + i));
        }
        ctx.emit(Instruction::Call(impl_func));
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    fn find_direct_method(&self, class: usize, name: &str) -> Result<u32> {
        let mut current = class;
        loop {
            let decl = self.bundle.classes[current].decl;
            let layout = self.layouts[current].as_ref().expect("layout");
            if let Some(info) = self.program.decls.class_info(decl) {
                if let Some((idx, _)) = info
                    .members
                    .iter()
                    .enumerate()
                    .find(|(_, m)| m.name == name && m.is_method())
                {
                    if let Some(&f) = layout.method_funcs.get(&(idx as u32)) {
                        return Ok(f);
                    }
                }
            }
            match layout.super_instance {
                Some(sup) => current = sup,
                None => {
                    return Err(CodegenError::MissingSpecialization(format!(
                        "implementation of '{name}'"
                    )));
                }
            }
        }
    }

    /// Linear search of an itable for this interface's id.
    pub(crate) fn lower_iface_finder(&mut self, index: u32, iface: usize) -> Result<()> {
        let id = self.bundle.ifaces[iface].id;
        let ivt = self.iface_vtable_type(iface)?;
        let itab = self.base.itab;
        let ientry = self.base.ientry;

        let mut ctx = FuncCtx::new(TypeSubstitution::new(), 1, None);
        let i = ctx.new_local(ValType::I32);
        let n = ctx.new_local(ValType::I32);
        let entry = ctx.new_local(ref_null(ientry));

        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::ArrayLen);
        ctx.emit(Instruction::LocalSet(n));
        let l = ctx.open_labelled(Instruction::Loop(BlockType::Empty));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::LocalGet(n));
        ctx.emit(Instruction::I32GeS);
        ctx.open_if(BlockType::Empty);
        // A missing interface entry is a generator invariant violation.
        ctx.emit(Instruction::Unreachable);
        ctx.close_block();
        ctx.emit(Instruction::LocalGet(0));
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::ArrayGet(itab));
        ctx.emit(Instruction::LocalTee(entry));
        ctx.emit(Instruction::StructGet {
            struct_type_index: ientry,
            field_index: 0,
        });
        ctx.emit(Instruction::I32Const(id));
        ctx.emit(Instruction::I32Eq);
        ctx.open_if(BlockType::Empty);
        ctx.emit(Instruction::LocalGet(entry));
        ctx.emit(Instruction::StructGet {
            struct_type_index: ientry,
            field_index: 1,
        });
        ctx.emit(Instruction::RefCastNonNull(HeapType::Concrete(ivt)));
        ctx.emit(Instruction::Return);
        ctx.close_block();
        ctx.emit(Instruction::LocalGet(i));
        ctx.emit(Instruction::I32Const(1));
        ctx.emit(Instruction::I32Add);
        ctx.emit(Instruction::LocalSet(i));
        let rel = ctx.rel_level(l);
        ctx.emit(Instruction::Br(rel));
        ctx.close_block();
        ctx.emit(Instruction::Unreachable);
        self.funcs.define(index, ctx.into_function());
        Ok(())
    }

    /// `ValType` of an exception reference (used by try/finally).
    #[allow(dead_code)]
    pub(crate) fn exnref() -> ValType {
        ValType::Ref(RefType::EXNREF)
    }
}
