use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::definition::definition;
use crate::expr::render;
use crate::opcode::{Instr, Opcode};
use crate::script::Script;
use crate::symbol::{DataType, Symbol};
use crate::{DecompileOptions, ScriptError};

/// An instruction waiting on the expression stack, with the instance that was active when it was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackFrame {
    pub instr: Instr,
    pub instance: Option<u32>,
}

/// Mutable state of one `decompile` call. Nothing here outlives the call.
pub(crate) struct DecompileContext<'a> {
    pub script: &'a Script,
    pub symbol: &'a Symbol,
    pub instance: Option<u32>,
    params: Vec<u32>,
    locals: Vec<(String, u32)>,
    depth: usize,
    expr_depth: usize,
    max_depth: usize,
}

impl<'a> DecompileContext<'a> {
    pub(crate) fn new(script: &'a Script, symbol: &'a Symbol, max_depth: usize) -> Self {
        let instance = matches!(symbol.kind, DataType::Instance | DataType::Prototype).then_some(symbol.index);
        Self {
            script,
            symbol,
            instance,
            params: script.parameters_of(symbol).iter().map(|p| p.index).collect(),
            locals: Vec::new(),
            depth: 0,
            expr_depth: 0,
            max_depth,
        }
    }

    /// Enters one level of expression nesting, or returns false at the limit.
    pub(crate) fn enter_expression(&mut self) -> bool {
        if self.expr_depth >= self.max_depth {
            return false;
        }
        self.expr_depth += 1;
        true
    }

    pub(crate) fn leave_expression(&mut self) {
        self.expr_depth -= 1;
    }

    /// True while decompiling an instance or prototype body whose own instance is active.
    pub(crate) fn in_own_instance(&self) -> bool {
        matches!(self.symbol.kind, DataType::Instance | DataType::Prototype) && self.instance == Some(self.symbol.index)
    }

    pub(crate) fn is_parameter(&self, index: u32) -> bool {
        self.params.contains(&index)
    }

    /// Records a local variable; the first symbol seen under a name wins.
    pub(crate) fn add_local(&mut self, sym: &Symbol) {
        let name = sym.local_name();
        if !self.locals.iter().any(|(n, _)| n == name) {
            self.locals.push((name.to_string(), sym.index));
        }
    }

    pub(crate) fn locals(&self) -> &[(String, u32)] {
        &self.locals
    }

    /// Instructions that end a statement. Calls only do so when they leave nothing on the stack.
    fn is_terminating(&self, instr: &Instr) -> bool {
        match instr.op {
            op if op.is_move() || op.is_compound_assign() => true,
            Opcode::Ret | Opcode::Jump | Opcode::JumpIfZero => true,
            Opcode::Call => instr
                .address()
                .and_then(|a| self.script.symbol_by_address(a))
                .is_none_or(|callee| !callee.has_return()),
            Opcode::CallExtern => instr
                .symbol()
                .and_then(|i| self.script.symbol_by_index(i))
                .is_none_or(|callee| !callee.has_return()),
            _ => false,
        }
    }
}

/// Pushes instructions from `pointer` onto `stack` until one ends the statement or `end` is reached.
///
/// `SetInstance` only switches the active instance and `Nop` is dropped.
fn extract_statement(
    ctx: &mut DecompileContext<'_>,
    pointer: &mut u32,
    end: u32,
    stack: &mut Vec<StackFrame>,
) -> Result<StackFrame, ScriptError> {
    loop {
        let instr = ctx.script.instruction_at(*pointer)?;
        *pointer = instr.next_pc();

        if instr.op == Opcode::SetInstance {
            ctx.instance = instr.symbol();
        }

        let frame = StackFrame {
            instr,
            instance: ctx.instance,
        };
        if ctx.is_terminating(&instr) || *pointer >= end {
            trace!(pc = instr.pc, op = instr.op.mnemonic(), depth = stack.len(), "statement");
            return Ok(frame);
        }
        if !matches!(instr.op, Opcode::Nop | Opcode::SetInstance) {
            stack.push(frame);
        }
    }
}

fn pad(indent: usize) -> String {
    " ".repeat(indent)
}

/// Renders `stmt` as one line, preceded by any results it left unused on the stack.
fn emit_statement(
    ctx: &mut DecompileContext<'_>,
    code: &mut String,
    indent: usize,
    stmt: &StackFrame,
    stack: &mut Vec<StackFrame>,
) {
    let main = render(ctx, stmt, stack);

    let mut unused = Vec::new();
    while let Some(frame) = stack.pop() {
        unused.push(render(ctx, &frame, stack));
    }
    if !unused.is_empty() {
        warn!(pc = stmt.instr.pc, count = unused.len(), "discarded expression results");
    }

    for line in unused.iter().rev().chain(std::iter::once(&main)) {
        if !line.is_empty() {
            code.push_str(&format!("{}{line};\n", pad(indent)));
        }
    }
}

/// Target of a conditional branch. Blocks only ever extend forward, so a target before
/// the end of the branch instruction is corrupt code.
fn forward_target(instr: &Instr) -> Result<u32, ScriptError> {
    let target = instr.address().unwrap_or_else(|| instr.next_pc());
    if target < instr.next_pc() {
        return Err(ScriptError::BackwardBranch { pc: instr.pc, target });
    }
    Ok(target)
}

fn pop_condition(ctx: &mut DecompileContext<'_>, stack: &mut Vec<StackFrame>, pc: u32) -> String {
    match stack.pop() {
        Some(frame) => render(ctx, &frame, stack),
        None => {
            warn!(pc, function = %ctx.symbol.name, "branch without a condition");
            crate::expr::BROKEN_STACK.to_string()
        }
    }
}

/// Decompiles `[pointer, end)` into source lines.
///
/// Returns the text and the exit pointer: the target of the jump that ended the block,
/// or where decoding stopped.
fn decompile_block(
    ctx: &mut DecompileContext<'_>,
    indent: usize,
    pointer: u32,
    end: u32,
) -> Result<(String, u32), ScriptError> {
    if ctx.depth >= ctx.max_depth {
        return Err(ScriptError::NestingTooDeep {
            limit: ctx.max_depth,
            pc: pointer,
        });
    }
    ctx.depth += 1;
    let result = block_body(ctx, indent, pointer, end);
    ctx.depth -= 1;
    result
}

fn block_body(
    ctx: &mut DecompileContext<'_>,
    indent: usize,
    mut pointer: u32,
    end: u32,
) -> Result<(String, u32), ScriptError> {
    let mut code = String::new();
    let mut stack = Vec::new();

    loop {
        let stmt = extract_statement(ctx, &mut pointer, end, &mut stack)?;

        match stmt.instr.op {
            Opcode::JumpIfZero => {
                let target = forward_target(&stmt.instr)?;
                let cond = pop_condition(ctx, &mut stack, stmt.instr.pc);
                code.push_str(&format!("{}if ({cond}) {{\n", pad(indent)));

                if pointer == target {
                    code.push_str(&format!("{}}};\n", pad(indent)));
                } else {
                    pointer = if_chain(ctx, &mut code, &mut stack, indent, pointer, target, end)?;
                }
            }
            Opcode::Jump => {
                let target = stmt.instr.address().unwrap_or(pointer);
                trace!(pc = stmt.instr.pc, target, "end of block");
                return Ok((code, target));
            }
            _ => emit_statement(ctx, &mut code, indent, &stmt, &mut stack),
        }

        if pointer >= end {
            break;
        }
        if stmt.instr.op == Opcode::Ret {
            // A body that returns may still be followed by the jump over the rest of its if-chain.
            if let Ok(next) = ctx.script.instruction_at(pointer)
                && next.op == Opcode::Jump
                && next.next_pc() == end
            {
                return Ok((code, next.address().unwrap_or(end)));
            }
            break;
        }
    }

    Ok((code, pointer))
}

/// Emits the body of an `if` starting at `pointer` plus any `else if` and `else` arms.
/// Returns the pointer after the whole chain.
fn if_chain(
    ctx: &mut DecompileContext<'_>,
    code: &mut String,
    stack: &mut Vec<StackFrame>,
    indent: usize,
    pointer: u32,
    target: u32,
    end: u32,
) -> Result<u32, ScriptError> {
    let (body, mut next_branch) = decompile_block(ctx, indent + 4, pointer, target)?;
    code.push_str(&body);
    code.push_str(&pad(indent));
    code.push('}');

    let mut pointer = target;
    let mut arm_end = target;

    while next_branch > arm_end && pointer < end {
        let stmt = extract_statement(ctx, &mut pointer, end, stack)?;

        if stmt.instr.op == Opcode::JumpIfZero {
            let arm_target = forward_target(&stmt.instr)?;
            let cond = pop_condition(ctx, stack, stmt.instr.pc);
            trace!(pc = stmt.instr.pc, target = arm_target, "else if");
            code.push_str(&format!(" else if ({cond}) {{\n"));

            if pointer != arm_target {
                let (body, exit) = decompile_block(ctx, indent + 4, pointer, arm_target)?;
                next_branch = exit;
                code.push_str(&body);
            }
            code.push_str(&pad(indent));
            code.push('}');
            pointer = arm_target;
            arm_end = arm_target;
        } else {
            trace!(pc = stmt.instr.pc, until = next_branch, "else");
            code.push_str(" else {\n");
            if stmt.instr.op != Opcode::Jump {
                emit_statement(ctx, code, indent + 4, &stmt, stack);
            }
            if pointer < next_branch {
                let (body, _) = decompile_block(ctx, indent + 4, pointer, next_branch)?;
                code.push_str(&body);
                pointer = next_branch;
            }
            code.push_str(&pad(indent));
            code.push('}');
            break;
        }
    }

    code.push_str(";\n");
    Ok(pointer)
}

/// Removes the implicit `return;` closing a body without a return value.
fn strip_trailing_return(body: &mut String) {
    let trimmed = body.trim_end_matches('\n');
    let line_start = trimmed.rfind('\n').map_or(0, |i| i + 1);
    if trimmed[line_start..].trim() == "return;" {
        body.truncate(line_start);
    }
}

fn local_declarations(script: &Script, locals: &[(String, u32)], indent: usize) -> String {
    let mut out = String::new();
    for (name, index) in locals {
        let Some(local) = script.symbol_by_index(*index) else {
            continue;
        };
        let ty = match local.kind {
            DataType::Instance => script.parent_of(local).map_or("instance", |p| p.name.as_str()),
            kind => kind.name(),
        };
        if local.count > 1 {
            out.push_str(&format!("{}var {ty} {name}[{}];\n", pad(indent), local.count));
        } else {
            out.push_str(&format!("{}var {ty} {name};\n", pad(indent)));
        }
    }
    out
}

pub(crate) fn decompile_body(
    script: &Script,
    symbol: &Symbol,
    indent: usize,
    max_depth: usize,
) -> Result<String, ScriptError> {
    if symbol.is_external() {
        return Err(ScriptError::ExternalSymbol(symbol.name.clone()));
    }
    if !symbol.kind.is_callable() {
        return Err(ScriptError::NotCallable(symbol.name.clone()));
    }

    let mut ctx = DecompileContext::new(script, symbol, max_depth);
    // Each parameter is bound by a six byte push and move prologue.
    let start = u32::try_from(ctx.params.len())
        .ok()
        .and_then(|n| n.checked_mul(6))
        .and_then(|prologue| symbol.address.checked_add(prologue))
        .ok_or(ScriptError::PcOutOfBounds {
            pc: symbol.address,
            len: script.code().len(),
        })?;
    debug!(symbol = %symbol.name, address = symbol.address, start, "decompiling");

    let (mut body, _) = decompile_block(&mut ctx, indent, start, script.size())?;
    if !symbol.has_return() {
        strip_trailing_return(&mut body);
    }

    let mut out = local_declarations(script, ctx.locals(), indent);
    out.push_str(&body);
    Ok(out)
}

/// Decompiles the body of a function, prototype or instance.
///
/// The result holds local variable declarations followed by the statements,
/// each line indented by `indent` spaces.
pub fn decompile(script: &Script, symbol: &Symbol, indent: usize) -> Result<String, ScriptError> {
    decompile_body(script, symbol, indent, DecompileOptions::default().max_depth)
}

/// Decompiles `symbol`, wrapped in its declaration when `options.declarations` is set.
pub fn decompile_with_options(
    script: &Script,
    symbol: &Symbol,
    options: &DecompileOptions,
) -> Result<String, ScriptError> {
    let body = decompile_body(script, symbol, options.indent, options.max_depth)?;
    if options.declarations {
        Ok(format!("{} {{\n{body}}}\n", definition(script, symbol)))
    } else {
        Ok(body)
    }
}

/// One reconstructed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Name of the generated file that lists every source file in compile order.
pub const SOURCE_LIST: &str = "Gothic.src";

fn is_top_level(sym: &Symbol) -> bool {
    !sym.is_generated() && !sym.name.contains('.') && sym.name != "$INSTANCE_HELP"
}

fn has_body(sym: &Symbol) -> bool {
    !sym.is_member()
        && !sym.is_external()
        && match sym.kind {
            DataType::Prototype => true,
            DataType::Function | DataType::Instance => sym.is_const(),
            _ => false,
        }
}

/// Reconstructs the whole script as source files, one per source file index,
/// followed by the [`SOURCE_LIST`] file.
///
/// A symbol that fails to decompile gets a comment in place of its body.
pub fn decompile_script(script: &Script, options: &DecompileOptions) -> Vec<SourceFile> {
    let symbols: Vec<&Symbol> = script.symbols().iter().filter(|s| is_top_level(s)).collect();

    let bodies: Vec<Option<Result<String, ScriptError>>> = symbols
        .par_iter()
        .map(|s| has_body(s).then(|| decompile_body(script, s, options.indent, options.max_depth)))
        .collect();

    let mut files: Vec<SourceFile> = Vec::new();
    let mut by_file: HashMap<u32, usize> = HashMap::new();

    for (sym, body) in symbols.iter().zip(bodies) {
        let slot = *by_file.entry(sym.location.file_index).or_insert_with(|| {
            files.push(SourceFile {
                name: format!("{}.d", sym.name),
                text: String::new(),
            });
            files.len() - 1
        });
        let text = &mut files[slot].text;

        text.push_str(&definition(script, sym));
        match body {
            Some(Ok(body)) => text.push_str(&format!(" {{\n{body}}}\n")),
            Some(Err(e)) => {
                warn!(symbol = %sym.name, error = %e, "failed to decompile");
                text.push_str(&format!(" {{\n{}// decompilation failed: {e}\n}}\n", pad(options.indent)));
            }
            None if matches!(sym.kind, DataType::Function | DataType::Prototype) => text.push(';'),
            None => {}
        }
        text.push('\n');
        trace!(symbol = %sym.name, "processed");
    }

    let list = files.iter().map(|f| format!("{}\n", f.name)).collect::<String>();
    debug!(files = files.len(), "decompiled script");
    files.push(SourceFile {
        name: SOURCE_LIST.to_string(),
        text: list,
    });
    files
}
