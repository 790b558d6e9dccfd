// Routine Code Emission
// Per-routine instruction emission: locals and parameters, the typed
// emit_* API with its version-dependent opcode selection and emission-time
// reductions, the ZAP-specific peephole combiner, and final rendering of
// the .FUNCT block.

use std::fmt::Write;
use std::mem;

use log::debug;

use crate::debug_file::{DebugFileBuilder, DebugLineRef};
use crate::error::EmitError;
use crate::instruction::{Instruction, ZapLine};
use crate::operand::{Label, Operand, Variable};
use crate::ops::{BinaryOp, Condition, ConditionKind, NullaryOp, PrintOp, TernaryOp, UnaryOp};
use crate::peephole::{
    CombinableLine, CombinerResult, ControlsCondition, LineType, NewLine, PeepholeBuffer,
    PeepholeCombiner, SameTestResult,
};

/// Handle to a routine defined on the game builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineRef(pub(crate) usize);

#[derive(Debug, Clone)]
struct LocalSlot {
    name: String,
    default_value: Option<Operand>,
}

pub struct RoutineBuilder {
    name: String,
    entry_point: bool,
    clean_stack: bool,
    zversion: u8,
    max_call_arguments: usize,
    record_debug: bool,

    peep: PeepholeBuffer<ZapLine>,
    next_label: u32,
    pending_debug: Option<DebugLineRef>,

    required_params: Vec<LocalSlot>,
    optional_params: Vec<LocalSlot>,
    locals: Vec<LocalSlot>,

    pub(crate) defn_start: Option<DebugLineRef>,
    pub(crate) defn_end: Option<DebugLineRef>,
    pub(crate) rendered: Option<String>,
}

impl RoutineBuilder {
    pub(crate) fn new(
        name: String,
        entry_point: bool,
        clean_stack: bool,
        zversion: u8,
        max_call_arguments: usize,
        record_debug: bool,
    ) -> RoutineBuilder {
        RoutineBuilder {
            name,
            entry_point,
            clean_stack,
            zversion,
            max_call_arguments,
            record_debug,
            peep: PeepholeBuffer::new(),
            // label 0 is reserved for the routine start
            next_label: 1,
            pending_debug: None,
            required_params: Vec::new(),
            optional_params: Vec::new(),
            locals: Vec::new(),
            defn_start: None,
            defn_end: None,
            rendered: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operand(&self) -> Operand {
        Operand::Const(self.name.clone())
    }

    pub fn clean_stack(&self) -> bool {
        self.clean_stack
    }

    /// The label marking the top of the routine body, after any parameter
    /// defaulting prologue.
    pub fn routine_start(&self) -> Label {
        Label::Local(0)
    }

    pub fn define_label(&mut self) -> Label {
        let label = Label::Local(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn mark_label(&mut self, label: Label) {
        self.peep.mark_label(label);
    }

    // version capabilities

    pub fn has_arg_count(&self) -> bool {
        self.zversion >= 5
    }

    pub fn has_branch_save(&self) -> bool {
        self.zversion < 4
    }

    pub fn has_store_save(&self) -> bool {
        self.zversion >= 4
    }

    pub fn has_extended_save(&self) -> bool {
        self.zversion >= 5
    }

    pub fn has_undo(&self) -> bool {
        self.zversion >= 5
    }

    fn local_exists(&self, name: &str) -> bool {
        self.required_params
            .iter()
            .chain(&self.optional_params)
            .chain(&self.locals)
            .any(|slot| slot.name == name)
    }

    fn new_local_slot(&self, name: &str) -> Result<LocalSlot, EmitError> {
        let name = crate::game::sanitize_symbol(name);
        if self.entry_point {
            return Err(EmitError::EntryRoutineLocal(name));
        }
        if self.local_exists(&name) {
            return Err(EmitError::DuplicateLocal(name));
        }
        Ok(LocalSlot {
            name,
            default_value: None,
        })
    }

    pub fn define_required_parameter(&mut self, name: &str) -> Result<Variable, EmitError> {
        let slot = self.new_local_slot(name)?;
        let var = Variable::Local(slot.name.clone());
        self.required_params.push(slot);
        Ok(var)
    }

    pub fn define_optional_parameter(&mut self, name: &str) -> Result<Variable, EmitError> {
        let slot = self.new_local_slot(name)?;
        let var = Variable::Local(slot.name.clone());
        self.optional_params.push(slot);
        Ok(var)
    }

    pub fn define_local(&mut self, name: &str) -> Result<Variable, EmitError> {
        let slot = self.new_local_slot(name)?;
        let var = Variable::Local(slot.name.clone());
        self.locals.push(slot);
        Ok(var)
    }

    /// Set the value a parameter or local takes when the caller does not
    /// supply one. Panics if the variable is not a local of this routine.
    pub fn set_local_default(&mut self, local: &Variable, default: Operand) {
        let name = local.name().to_string();
        let slot = self
            .required_params
            .iter_mut()
            .chain(&mut self.optional_params)
            .chain(&mut self.locals)
            .find(|slot| slot.name == name);
        match slot {
            Some(slot) => slot.default_value = Some(default),
            None => panic!("no local named {} in routine {}", name, self.name),
        }
    }

    /// Record the source position for the next emitted instruction.
    pub fn mark_sequence_point(&mut self, line_ref: DebugLineRef) {
        if self.record_debug {
            self.pending_debug = Some(line_ref);
        }
    }

    fn add_line(&mut self, instr: Instruction, target: Option<Label>, ty: LineType) {
        let line = ZapLine::new(instr, self.pending_debug.take());
        self.peep.add_line(line, target, ty);
    }

    // control flow

    pub fn branch(&mut self, label: Label) {
        self.add_line(Instruction::new("JUMP"), Some(label), LineType::BranchAlways);
    }

    pub fn branch_if(
        &mut self,
        cond: Condition,
        left: Option<Operand>,
        right: Option<Operand>,
        label: Label,
        polarity: bool,
    ) -> Result<(), EmitError> {
        let opcode = cond.opcode();
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };

        let operands = match cond.kind() {
            ConditionKind::Nullary => {
                if left.is_some() || right.is_some() {
                    return Err(EmitError::ConditionArity(opcode, "no operands"));
                }
                vec![]
            }
            ConditionKind::UnaryVar => {
                if right.is_some() {
                    return Err(EmitError::ConditionArity(opcode, "exactly one operand"));
                }
                let var = match left {
                    Some(Operand::Var(v)) => v,
                    Some(_) => return Err(EmitError::ConditionNeedsVariable(opcode)),
                    None => return Err(EmitError::ConditionArity(opcode, "exactly one operand")),
                };
                vec![Operand::Indirect(var)]
            }
            ConditionKind::BinaryVar => {
                let var = match left {
                    Some(Operand::Var(v)) => v,
                    Some(_) => return Err(EmitError::ConditionNeedsVariable(opcode)),
                    None => return Err(EmitError::ConditionArity(opcode, "two operands")),
                };
                let right = right.ok_or(EmitError::ConditionArity(opcode, "two operands"))?;
                vec![Operand::Indirect(var), right]
            }
            ConditionKind::Binary => {
                let left = left.ok_or(EmitError::ConditionArity(opcode, "two operands"))?;
                let right = right.ok_or(EmitError::ConditionArity(opcode, "two operands"))?;
                vec![left, right]
            }
        };

        self.add_line(Instruction::with_operands(opcode, operands), Some(label), ty);
        Ok(())
    }

    pub fn branch_if_zero(&mut self, operand: Operand, label: Label, polarity: bool) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(
            Instruction::with_operands("ZERO?", vec![operand]),
            Some(label),
            ty,
        );
    }

    /// Branch if the value equals any of one to three options.
    pub fn branch_if_equal(
        &mut self,
        value: Operand,
        options: &[Operand],
        label: Label,
        polarity: bool,
    ) {
        assert!(
            !options.is_empty() && options.len() <= 3,
            "EQUAL? takes one to three options"
        );
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        let mut operands = vec![value];
        operands.extend_from_slice(options);
        self.add_line(Instruction::with_operands("EQUAL?", operands), Some(label), ty);
    }

    pub fn ret(&mut self, result: Operand) {
        if result == Operand::Num(1) {
            self.add_line(
                Instruction::new("RTRUE"),
                Some(Label::RTrue),
                LineType::BranchAlways,
            );
        } else if result == Operand::Num(0) {
            self.add_line(
                Instruction::new("RFALSE"),
                Some(Label::RFalse),
                LineType::BranchAlways,
            );
        } else if result.is_stack() {
            self.add_line(Instruction::new("RSTACK"), None, LineType::Terminator);
        } else {
            self.add_line(
                Instruction::with_operands("RETURN", vec![result]),
                None,
                LineType::Terminator,
            );
        }
    }

    pub fn emit_restart(&mut self) {
        self.add_line(Instruction::new("RESTART"), None, LineType::Terminator);
    }

    pub fn emit_quit(&mut self) {
        self.add_line(Instruction::new("QUIT"), None, LineType::Terminator);
    }

    // typed operations

    pub fn emit_nullary(&mut self, op: NullaryOp, result: Option<&Variable>) {
        self.add_line(
            Instruction::new(op.opcode()).store_to(result),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_unary(&mut self, op: UnaryOp, value: Operand, result: Option<&Variable>) {
        let opcode = match op.opcode() {
            Some(opcode) => opcode,
            None => {
                // Neg lowers to a subtraction from zero
                self.add_line(
                    Instruction::with_operands("SUB", vec![Operand::Num(0), value])
                        .store_to(result),
                    None,
                    LineType::Plain,
                );
                return;
            }
        };

        if op.is_predicate() {
            // predicate opcodes must branch somewhere; aim at the next line
            let label = self.define_label();
            self.add_line(
                Instruction::with_operands(opcode, vec![value]).store_to(result),
                Some(label),
                LineType::BranchPositive,
            );
            self.mark_label(label);
        } else {
            self.add_line(
                Instruction::with_operands(opcode, vec![value]).store_to(result),
                None,
                LineType::Plain,
            );
        }
    }

    pub fn emit_binary(
        &mut self,
        op: BinaryOp,
        left: Operand,
        right: Operand,
        result: Option<&Variable>,
    ) {
        // emission-time reductions
        if let Some(res) = result {
            let res_operand = Operand::Var(res.clone());
            let one = Operand::Num(1);
            match op {
                BinaryOp::Add
                    if (left == one && right == res_operand)
                        || (right == one && left == res_operand) =>
                {
                    self.add_line(
                        Instruction::with_operands("INC", vec![Operand::Indirect(res.clone())]),
                        None,
                        LineType::Plain,
                    );
                    return;
                }
                BinaryOp::Sub if left == res_operand && right == one => {
                    self.add_line(
                        Instruction::with_operands("DEC", vec![Operand::Indirect(res.clone())]),
                        None,
                        LineType::Plain,
                    );
                    return;
                }
                _ => {}
            }
        }
        if op == BinaryOp::StoreIndirect && right.is_stack() && self.zversion != 6 {
            self.add_line(
                Instruction::with_operands("POP", vec![left]),
                None,
                LineType::Plain,
            );
            return;
        }

        self.add_line(
            Instruction::with_operands(op.opcode(), vec![left, right]).store_to(result),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_ternary(
        &mut self,
        op: TernaryOp,
        left: Operand,
        center: Operand,
        right: Operand,
        result: Option<&Variable>,
    ) {
        self.add_line(
            Instruction::with_operands(op.opcode(), vec![left, center, right]).store_to(result),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_encode_text(
        &mut self,
        src: Operand,
        length: Operand,
        src_offset: Operand,
        dest: Operand,
    ) {
        self.add_line(
            Instruction::with_operands("ZWSTR", vec![src, length, src_offset, dest]),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_tokenize(
        &mut self,
        text: Operand,
        parse: Operand,
        dictionary: Option<Operand>,
        flag: Option<Operand>,
    ) {
        let mut operands = vec![text, parse];
        if let Some(dictionary) = dictionary {
            operands.push(dictionary);
            if let Some(flag) = flag {
                operands.push(flag);
            }
        }
        self.add_line(
            Instruction::with_operands("LEX", operands),
            None,
            LineType::Plain,
        );
    }

    // save and restore, in their three version-dependent shapes

    pub fn emit_save_branch(&mut self, label: Label, polarity: bool) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(Instruction::new("SAVE"), Some(label), ty);
    }

    pub fn emit_restore_branch(&mut self, label: Label, polarity: bool) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(Instruction::new("RESTORE"), Some(label), ty);
    }

    pub fn emit_save_result(&mut self, result: &Variable) {
        self.add_line(
            Instruction::new("SAVE").store_to(Some(result)),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_restore_result(&mut self, result: &Variable) {
        self.add_line(
            Instruction::new("RESTORE").store_to(Some(result)),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_save_extended(
        &mut self,
        table: Operand,
        size: Operand,
        filename: Operand,
        result: &Variable,
    ) {
        self.add_line(
            Instruction::with_operands("SAVE", vec![table, size, filename])
                .store_to(Some(result)),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_restore_extended(
        &mut self,
        table: Operand,
        size: Operand,
        filename: Operand,
        result: &Variable,
    ) {
        self.add_line(
            Instruction::with_operands("RESTORE", vec![table, size, filename])
                .store_to(Some(result)),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_scan_table(
        &mut self,
        value: Operand,
        table: Operand,
        length: Operand,
        form: Option<Operand>,
        result: &Variable,
        label: Label,
        polarity: bool,
    ) {
        let mut operands = vec![value, table, length];
        if let Some(form) = form {
            operands.push(form);
        }
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(
            Instruction::with_operands("INTBL?", operands).store_to(Some(result)),
            Some(label),
            ty,
        );
    }

    pub fn emit_get_child(
        &mut self,
        value: Operand,
        result: &Variable,
        label: Label,
        polarity: bool,
    ) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(
            Instruction::with_operands("FIRST?", vec![value]).store_to(Some(result)),
            Some(label),
            ty,
        );
    }

    pub fn emit_get_sibling(
        &mut self,
        value: Operand,
        result: &Variable,
        label: Label,
        polarity: bool,
    ) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(
            Instruction::with_operands("NEXT?", vec![value]).store_to(Some(result)),
            Some(label),
            ty,
        );
    }

    // printing

    pub fn emit_print_newline(&mut self) {
        self.add_line(Instruction::new("CRLF"), None, LineType::Plain);
    }

    pub fn emit_print(&mut self, text: &str) {
        self.add_line(
            Instruction::with_operands("PRINTI", vec![Operand::Str(text.to_string())]),
            None,
            LineType::Plain,
        );
    }

    /// Print, newline, and return true in one heavy terminator.
    pub fn emit_print_ret(&mut self, text: &str) {
        self.add_line(
            Instruction::with_operands("PRINTR", vec![Operand::Str(text.to_string())]),
            None,
            LineType::HeavyTerminator,
        );
    }

    pub fn emit_print_op(&mut self, op: PrintOp, value: Operand) {
        self.add_line(
            Instruction::with_operands(op.opcode(), vec![value]),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_print_table(
        &mut self,
        table: Operand,
        width: Operand,
        height: Option<Operand>,
        skip: Option<Operand>,
    ) {
        let mut operands = vec![table, width];
        if let Some(height) = height {
            operands.push(height);
            if let Some(skip) = skip {
                operands.push(skip);
            }
        }
        self.add_line(
            Instruction::with_operands("PRINTT", operands),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_play_sound(
        &mut self,
        number: Operand,
        effect: Option<Operand>,
        volume: Option<Operand>,
        routine: Option<Operand>,
    ) {
        let mut operands = vec![number];
        if let Some(effect) = effect {
            operands.push(effect);
            if let Some(volume) = volume {
                operands.push(volume);
                if let Some(routine) = routine {
                    operands.push(routine);
                }
            }
        }
        self.add_line(
            Instruction::with_operands("SOUND", operands),
            None,
            LineType::Plain,
        );
    }

    // input

    pub fn emit_read(
        &mut self,
        chrbuf: Operand,
        lexbuf: Option<Operand>,
        interval: Option<Operand>,
        routine: Option<Operand>,
        result: Option<&Variable>,
    ) {
        let mut operands = vec![chrbuf];
        if let Some(lexbuf) = lexbuf {
            operands.push(lexbuf);
            if let Some(interval) = interval {
                operands.push(interval);
                if let Some(routine) = routine {
                    operands.push(routine);
                }
            }
        }
        self.add_line(
            Instruction::with_operands("READ", operands).store_to(result),
            None,
            LineType::Plain,
        );
    }

    pub fn emit_read_char(
        &mut self,
        interval: Option<Operand>,
        routine: Option<Operand>,
        result: &Variable,
    ) {
        let mut operands = vec![Operand::Num(1)];
        if let Some(interval) = interval {
            operands.push(interval);
            if let Some(routine) = routine {
                operands.push(routine);
            }
        }
        self.add_line(
            Instruction::with_operands("INPUT", operands).store_to(Some(result)),
            None,
            LineType::Plain,
        );
    }

    // calls and stores

    pub fn emit_call(
        &mut self,
        routine: Operand,
        args: &[Operand],
        result: Option<&Variable>,
    ) -> Result<(), EmitError> {
        // V1-3: CALL (0-3, store)
        // V4: CALL1 (0, store), CALL2 (1, store), CALL (2-3, store), XCALL (0-7, store)
        // V5+: ICALL1/ICALL2/ICALL/IXCALL when the result is discarded

        if args.len() > self.max_call_arguments {
            return Err(EmitError::TooManyCallArguments(
                args.len(),
                self.max_call_arguments,
            ));
        }

        let opcode = if self.zversion < 4 {
            "CALL"
        } else if self.zversion == 4 || result.is_some() {
            match args.len() {
                0 => "CALL1",
                1 => "CALL2",
                2 | 3 => "CALL",
                _ => "XCALL",
            }
        } else {
            match args.len() {
                0 => "ICALL1",
                1 => "ICALL2",
                2 | 3 => "ICALL",
                _ => "IXCALL",
            }
        };

        let mut operands = vec![routine];
        operands.extend_from_slice(args);
        self.add_line(
            Instruction::with_operands(opcode, operands).store_to(result),
            None,
            LineType::Plain,
        );

        // below V5 the discarded result stays on the stack
        if self.zversion < 5 && result.is_none() && self.clean_stack {
            self.add_line(Instruction::new("FSTACK"), None, LineType::Plain);
        }
        Ok(())
    }

    pub fn emit_store(&mut self, dest: &Variable, src: Operand) {
        if Operand::Var(dest.clone()) == src {
            return;
        }
        if dest.is_stack() {
            self.add_line(
                Instruction::with_operands("PUSH", vec![src]),
                None,
                LineType::Plain,
            );
        } else if src.is_stack() {
            let instr = if self.zversion == 6 {
                Instruction::new("POP").store_to(Some(dest))
            } else {
                Instruction::with_operands("POP", vec![Operand::Indirect(dest.clone())])
            };
            self.add_line(instr, None, LineType::Plain);
        } else {
            self.add_line(
                Instruction::with_operands("SET", vec![Operand::Indirect(dest.clone()), src]),
                None,
                LineType::Plain,
            );
        }
    }

    /// Discard the top of the stack, if this routine keeps the stack clean.
    pub fn emit_pop_stack(&mut self) {
        if !self.clean_stack {
            return;
        }
        if self.zversion <= 4 {
            self.add_line(Instruction::new("FSTACK"), None, LineType::Plain);
        } else if self.zversion == 6 {
            self.add_line(
                Instruction::with_operands("FSTACK", vec![Operand::Num(1)]),
                None,
                LineType::Plain,
            );
        } else {
            self.add_line(
                Instruction::with_operands(
                    "ICALL2",
                    vec![Operand::Num(0), Operand::Var(Variable::Stack)],
                ),
                None,
                LineType::Plain,
            );
        }
    }

    pub fn emit_push_user_stack(
        &mut self,
        value: Operand,
        stack: Operand,
        label: Label,
        polarity: bool,
    ) {
        let ty = if polarity {
            LineType::BranchPositive
        } else {
            LineType::BranchNegative
        };
        self.add_line(
            Instruction::with_operands("XPUSH", vec![value, stack]),
            Some(label),
            ty,
        );
    }

    /// Optimize the body and render the .FUNCT block. Called once, by the
    /// game builder.
    pub(crate) fn finish(
        &mut self,
        mut debug: Option<&mut DebugFileBuilder>,
    ) -> Result<(), EmitError> {
        if self.rendered.is_some() {
            return Err(EmitError::AlreadyFinished(format!("routine {}", self.name)));
        }
        debug!("finishing routine {} ({} lines)", self.name, self.peep.len());

        let mut out = String::new();

        if let Some(d) = debug.as_deref_mut() {
            if let Some(start) = self.defn_start.clone() {
                let _ = write!(
                    out,
                    "\t.DEBUG-ROUTINE {},\"{}\"",
                    d.format_line_ref(&start),
                    self.name
                );
                for slot in self
                    .required_params
                    .iter()
                    .chain(&self.optional_params)
                    .chain(&self.locals)
                {
                    let _ = write!(out, ",\"{}\"", slot.name);
                }
                out.push('\n');
            }
        }

        let _ = write!(out, "\t.FUNCT {}", self.name);
        for slot in &self.required_params {
            let _ = write!(out, ",{}", slot.name);
        }
        for slot in self.optional_params.iter().chain(&self.locals) {
            let _ = write!(out, ",{}", slot.name);
            // below V5, defaults are assigned by the call instruction
            if self.zversion < 5 {
                if let Some(default) = &slot.default_value {
                    let _ = write!(out, "={}", default);
                }
            }
        }
        out.push('\n');

        if self.entry_point && self.zversion != 6 {
            out.push_str("START::\n");
        }

        // from V5 on, defaults are assigned by prologue code instead
        let mut preamble: PeepholeBuffer<ZapLine> = PeepholeBuffer::new();
        preamble.mark_label(self.routine_start());
        if self.zversion >= 5 {
            for i in 0..self.optional_params.len() {
                let default = match self.optional_params[i].default_value.clone() {
                    Some(default) => default,
                    None => continue,
                };
                let var = Variable::Local(self.optional_params[i].name.clone());
                let next_label = self.define_label();
                preamble.add_line(
                    ZapLine::new(
                        Instruction::with_operands(
                            "ASSIGNED?",
                            vec![Operand::Indirect(var.clone())],
                        ),
                        None,
                    ),
                    Some(next_label),
                    LineType::BranchPositive,
                );
                preamble.add_line(
                    ZapLine::new(
                        Instruction::with_operands("SET", vec![Operand::Indirect(var), default]),
                        None,
                    ),
                    None,
                    LineType::Plain,
                );
                preamble.mark_label(next_label);
            }
            for slot in &self.locals {
                if let Some(default) = &slot.default_value {
                    let var = Variable::Local(slot.name.clone());
                    preamble.add_line(
                        ZapLine::new(
                            Instruction::with_operands(
                                "SET",
                                vec![Operand::Indirect(var), default.clone()],
                            ),
                            None,
                        ),
                        None,
                        LineType::Plain,
                    );
                }
            }
        }

        let mut peep = mem::take(&mut self.peep);
        peep.insert_buffer_first(preamble);

        let mut combiner = ZapCombiner;
        peep.finish(&mut combiner, |label, code: &ZapLine, target, ty| {
            if let Some(line_ref) = &code.debug {
                if let Some(d) = debug.as_deref_mut() {
                    let _ = writeln!(out, "\t.DEBUG-LINE {}", d.format_line_ref(line_ref));
                }
            }

            let prefix = match label {
                Some(label) => format!("{}:", label),
                None => String::new(),
            };

            if ty == LineType::BranchAlways {
                if target == Some(Label::RTrue) {
                    let _ = writeln!(out, "{}\tRTRUE", prefix);
                    return;
                }
                if target == Some(Label::RFalse) {
                    let _ = writeln!(out, "{}\tRFALSE", prefix);
                    return;
                }
            }

            if code.instr.name == "CRLF+RTRUE" {
                let _ = writeln!(out, "{}\tCRLF", prefix);
                let _ = writeln!(out, "\tRTRUE");
                return;
            }

            let _ = write!(out, "{}\t{}", prefix, code.instr);
            match (ty, target) {
                (LineType::BranchAlways, Some(t)) => {
                    let _ = write!(out, " {}", t);
                }
                (LineType::BranchPositive, Some(t)) => {
                    let _ = write!(out, " /{}", t);
                }
                (LineType::BranchNegative, Some(t)) => {
                    let _ = write!(out, " \\{}", t);
                }
                _ => {}
            }
            out.push('\n');
        });

        if let Some(d) = debug.as_deref_mut() {
            if let Some(end) = self.defn_end.clone() {
                let _ = writeln!(out, "\t.DEBUG-ROUTINE-END {}", d.format_line_ref(&end));
            }
        }

        self.rendered = Some(out);
        Ok(())
    }
}

/// The ZAP rewrite rules plugged into the peephole engine.
pub(crate) struct ZapCombiner;

fn merge_debug(a: &Option<DebugLineRef>, b: &Option<DebugLineRef>) -> Option<DebugLineRef> {
    a.clone().or_else(|| b.clone())
}

/// EQUAL? with exactly two operands, one of them literal zero; returns the
/// other side.
fn is_equal_zero(inst: &Instruction) -> Option<&Operand> {
    if inst.name == "EQUAL?" && inst.operands.len() == 2 {
        if inst.operands[0] == Operand::Num(0) {
            return Some(&inst.operands[1]);
        }
        if inst.operands[1] == Operand::Num(0) {
            return Some(&inst.operands[0]);
        }
    }
    None
}

/// POP 'dest, or the V6 form POP >dest.
fn is_pop_to_variable(inst: &Instruction) -> Option<Variable> {
    if inst.name != "POP" {
        return None;
    }
    match (&inst.operands[..], &inst.store) {
        ([Operand::Indirect(v)], None) => Some(v.clone()),
        ([], Some(dest)) => Some(dest.clone()),
        _ => None,
    }
}

/// `<op> v,c >STACK` with a literal constant on either side.
fn constant_to_stack<'a>(name: &str, inst: &'a Instruction) -> Option<(&'a Operand, i32)> {
    if inst.name == name && inst.operands.len() == 2 && inst.stores_to_stack() {
        if let Operand::Num(c) = inst.operands[0] {
            return Some((&inst.operands[1], c));
        }
        if let Operand::Num(c) = inst.operands[1] {
            return Some((&inst.operands[0], c));
        }
    }
    None
}

/// `<op> STACK,c >dest` with a literal constant on either side.
fn constant_with_stack(name: &str, inst: &Instruction) -> Option<(i32, Option<Variable>)> {
    if inst.name == name && inst.operands.len() == 2 {
        if let Operand::Num(c) = inst.operands[0] {
            if inst.operands[1].is_stack() {
                return Some((c, inst.store.clone()));
            }
        }
        if let Operand::Num(c) = inst.operands[1] {
            if inst.operands[0].is_stack() {
                return Some((c, inst.store.clone()));
            }
        }
    }
    None
}

/// EQUAL?/ZERO? as (value, option...) with ZERO? x read as EQUAL? x,0.
fn equality_parts(inst: &Instruction) -> Vec<Operand> {
    if inst.name == "ZERO?" {
        vec![inst.operands[0].clone(), Operand::Num(0)]
    } else {
        inst.operands.clone()
    }
}

impl ZapCombiner {
    fn combine1(
        &self,
        w: &[CombinableLine<'_, ZapLine>],
        instr: Instruction,
        ty: LineType,
        target: Option<Label>,
    ) -> CombinerResult<ZapLine> {
        CombinerResult::replace(
            1,
            vec![NewLine {
                code: ZapLine::new(instr, w[0].code.debug.clone()),
                target,
                ty,
            }],
        )
    }

    fn combine2(
        &self,
        w: &[CombinableLine<'_, ZapLine>],
        instr: Instruction,
        ty: LineType,
        target: Option<Label>,
    ) -> CombinerResult<ZapLine> {
        CombinerResult::replace(
            2,
            vec![NewLine {
                code: ZapLine::new(instr, merge_debug(&w[0].code.debug, &w[1].code.debug)),
                target,
                ty,
            }],
        )
    }

    fn combine2to2(
        &self,
        w: &[CombinableLine<'_, ZapLine>],
        first: Instruction,
        second: Instruction,
    ) -> CombinerResult<ZapLine> {
        CombinerResult::replace(
            2,
            vec![
                NewLine {
                    code: ZapLine::new(first, w[0].code.debug.clone()),
                    target: w[0].target,
                    ty: w[0].ty,
                },
                NewLine {
                    code: ZapLine::new(second, w[1].code.debug.clone()),
                    target: w[1].target,
                    ty: w[1].ty,
                },
            ],
        )
    }
}

impl PeepholeCombiner<ZapLine> for ZapCombiner {
    fn apply(&mut self, w: &[CombinableLine<'_, ZapLine>]) -> Option<CombinerResult<ZapLine>> {
        if w.is_empty() {
            return None;
        }
        let a = &w[0].code.instr;

        // EQUAL? x,0 | EQUAL? 0,x => ZERO? x
        if let Some(other) = is_equal_zero(a) {
            return Some(self.combine1(
                w,
                Instruction::with_operands("ZERO?", vec![other.clone()]),
                w[0].ty,
                w[0].target,
            ));
        }

        // JUMP to TRUE/FALSE => RTRUE/RFALSE
        if a.name == "JUMP" && matches!(w[0].target, Some(Label::RTrue) | Some(Label::RFalse)) {
            let name = if w[0].target == Some(Label::RTrue) {
                "RTRUE"
            } else {
                "RFALSE"
            };
            return Some(self.combine1(w, Instruction::new(name), w[0].ty, w[0].target));
        }

        if w.len() < 2 {
            return None;
        }
        let b = &w[1].code.instr;

        // PUSH v + RSTACK => RFALSE/RTRUE/RETURN v
        if a.name == "PUSH" && a.operands.len() == 1 && b.name == "RSTACK" {
            return Some(match a.operands[0] {
                Operand::Num(0) => self.combine2(
                    w,
                    Instruction::new("RFALSE"),
                    LineType::BranchAlways,
                    Some(Label::RFalse),
                ),
                Operand::Num(1) => self.combine2(
                    w,
                    Instruction::new("RTRUE"),
                    LineType::BranchAlways,
                    Some(Label::RTrue),
                ),
                _ => self.combine2(w, a.renamed("RETURN"), w[1].ty, w[1].target),
            });
        }

        // >STACK + POP 'dest => >dest
        // only when the first line falls straight through; fusing across a
        // store-and-branch line would lose the branch
        if a.stores_to_stack() && w[0].ty == LineType::Plain {
            if let Some(dest) = is_pop_to_variable(b) {
                return Some(self.combine2(
                    w,
                    a.clone().store_to(Some(&dest)),
                    w[1].ty,
                    w[1].target,
                ));
            }
        }

        // PUSH v + POP 'dest => SET 'dest,v
        if a.name == "PUSH" && a.operands.len() == 1 {
            if let Some(dest) = is_pop_to_variable(b) {
                return Some(self.combine2(
                    w,
                    Instruction::with_operands(
                        "SET",
                        vec![Operand::Indirect(dest), a.operands[0].clone()],
                    ),
                    w[1].ty,
                    w[1].target,
                ));
            }
        }

        // INC 'v + GRTR? v,w => IGRTR? 'v,w  (and DEC/LESS? likewise)
        for (first, test, fused) in [("INC", "GRTR?", "IGRTR?"), ("DEC", "LESS?", "DLESS?")] {
            if a.name == first && a.operands.len() == 1 {
                if let Operand::Indirect(v) = &a.operands[0] {
                    if !v.is_stack()
                        && b.name == test
                        && b.operands.len() == 2
                        && b.operands[0] == Operand::Var(v.clone())
                    {
                        return Some(self.combine2(
                            w,
                            Instruction::with_operands(
                                fused,
                                vec![a.operands[0].clone(), b.operands[1].clone()],
                            ),
                            w[1].ty,
                            w[1].target,
                        ));
                    }
                }
            }
        }

        // merge EQUAL?/ZERO? tests of the same value aimed at the same label
        if (a.name == "EQUAL?" || a.name == "ZERO?")
            && w[0].ty == LineType::BranchPositive
            && (b.name == "EQUAL?" || b.name == "ZERO?")
            && w[1].ty == LineType::BranchPositive
            && w[0].target == w[1].target
        {
            let aparts = equality_parts(a);
            let bparts = equality_parts(b);
            if aparts[0] == bparts[0] && aparts.len() < 4 {
                if aparts.len() + bparts.len() <= 5 {
                    // EQUAL? v,a,b /L + EQUAL? v,c /L => EQUAL? v,a,b,c /L
                    let mut operands = aparts;
                    operands.extend(bparts.into_iter().skip(1));
                    return Some(self.combine2(
                        w,
                        Instruction::with_operands("EQUAL?", operands),
                        w[1].ty,
                        w[1].target,
                    ));
                } else {
                    // EQUAL? v,a,b /L + EQUAL? v,c,d /L =>
                    //     EQUAL? v,a,b,c /L + EQUAL? v,d /L
                    let value = aparts[0].clone();
                    let mut all_rhs: Vec<Operand> = aparts.into_iter().skip(1).collect();
                    all_rhs.extend(bparts.into_iter().skip(1));

                    let mut first = vec![value.clone()];
                    first.extend(all_rhs[..3].iter().cloned());
                    let mut second = vec![value];
                    second.extend(all_rhs[3..].iter().cloned());

                    return Some(self.combine2to2(
                        w,
                        Instruction::with_operands("EQUAL?", first),
                        Instruction::with_operands("EQUAL?", second),
                    ));
                }
            }
        }

        // CRLF + RTRUE fuse into one terminator, which can then be pulled
        // through branches and enables PRINTR
        if a.name == "CRLF" && b.name == "RTRUE" {
            return Some(self.combine2(
                w,
                Instruction::new("CRLF+RTRUE"),
                LineType::Terminator,
                None,
            ));
        }

        // PRINTI + (CRLF + RTRUE) => PRINTR
        if a.name == "PRINTI" && b.name == "CRLF+RTRUE" {
            return Some(self.combine2(
                w,
                a.renamed("PRINTR"),
                LineType::HeavyTerminator,
                None,
            ));
        }

        // BAND v,c >STACK + ZERO? STACK /L =>
        //     when c == 0:              statically resolved branch
        //     when c is a power of two: BTST v,c with inverted polarity
        if let Some((v, c)) = constant_to_stack("BAND", a) {
            if b.name == "ZERO?"
                && b.operands.len() == 1
                && b.operands[0].is_stack()
                && w[1].ty.is_conditional()
            {
                if c == 0 {
                    if !v.is_stack() {
                        return Some(if w[1].ty == LineType::BranchPositive {
                            self.combine2(
                                w,
                                Instruction::new("JUMP"),
                                LineType::BranchAlways,
                                w[1].target,
                            )
                        } else {
                            CombinerResult::consume(2)
                        });
                    }
                } else if c & (c - 1) == 0 {
                    return Some(self.combine2(
                        w,
                        Instruction::with_operands("BTST", vec![v.clone(), Operand::Num(c)]),
                        w[1].ty.inverted(),
                        w[1].target,
                    ));
                }
            }
        }

        // BAND v,c1 >STACK + BAND STACK,c2 >dest => BAND v,(c1&c2) >dest
        // (and BOR with | likewise)
        for (name, fold) in [("BAND", (|x, y| x & y) as fn(i32, i32) -> i32), ("BOR", |x, y| x | y)]
        {
            if let Some((v, c1)) = constant_to_stack(name, a) {
                if let Some((c2, dest)) = constant_with_stack(name, b) {
                    return Some(self.combine2(
                        w,
                        Instruction::with_operands(name, vec![v.clone(), Operand::Num(fold(c1, c2))])
                            .store_to(dest.as_ref()),
                        w[1].ty,
                        w[1].target,
                    ));
                }
            }
        }

        None
    }

    fn synthesize_branch_always(&self) -> ZapLine {
        ZapLine::new(Instruction::new("JUMP"), None)
    }

    fn are_identical(&self, a: &ZapLine, b: &ZapLine) -> bool {
        a.instr == b.instr
    }

    fn merge_identical(&self, a: &ZapLine, b: &ZapLine) -> ZapLine {
        ZapLine::new(a.instr.clone(), merge_debug(&a.debug, &b.debug))
    }

    fn can_duplicate(&self, code: &ZapLine) -> bool {
        // don't duplicate instructions with debug info attached
        code.debug.is_none()
    }

    fn are_same_test(&self, a: &ZapLine, b: &ZapLine) -> SameTestResult {
        // if the stack is involved, all bets are off
        if a.instr
            .operands
            .iter()
            .chain(&b.instr.operands)
            .any(|o| o.is_stack())
        {
            return SameTestResult::Unrelated;
        }

        // identical instructions must be the same test
        if a.instr == b.instr {
            return SameTestResult::SameTest;
        }

        // a store+branch instruction followed by ZERO? of the stored value:
        // store+branch opcodes branch on storing nonzero, so the tests are
        // always opposite
        if b.instr.name == "ZERO?" && !b.instr.operands.is_empty() {
            if let Some(dest) = &a.instr.store {
                if b.instr.operands[0] == Operand::Var(dest.clone()) {
                    return SameTestResult::OppositeTest;
                }
            }
        }

        SameTestResult::Unrelated
    }

    fn controls_conditional_branch(&self, a: &ZapLine, b: &ZapLine) -> ControlsCondition {
        // PUSH of a constant decides a following ZERO? STACK
        if a.instr.name == "PUSH" && a.instr.operands.len() == 1 {
            if let Operand::Num(n) = a.instr.operands[0] {
                if b.instr.name == "ZERO?"
                    && !b.instr.operands.is_empty()
                    && b.instr.operands[0].is_stack()
                {
                    return if n == 0 {
                        ControlsCondition::CausesBranchIfPositive
                    } else {
                        ControlsCondition::CausesNoOpIfPositive
                    };
                }
            }
        }
        ControlsCondition::Unrelated
    }
}
