use tracing::warn;

use crate::decompile::{DecompileContext, StackFrame};
use crate::opcode::{Opcode, Operand};
use crate::symbol::{DataType, Symbol};

/// Stands in for an operand that the expression stack could not provide.
pub(crate) const BROKEN_STACK: &str = "0 /* !broken stack! */";

/// Replaces an operand nested deeper than the context allows.
pub(crate) const TOO_DEEP: &str = "0 /* !expression too deep! */";

/// Renders `frame` as source text, popping whatever operands it needs from `stack`.
///
/// Never fails: missing operands, unresolved symbols and runaway nesting become placeholder text.
pub(crate) fn render(ctx: &mut DecompileContext<'_>, frame: &StackFrame, stack: &mut Vec<StackFrame>) -> String {
    if !ctx.enter_expression() {
        warn!(pc = frame.instr.pc, function = %ctx.symbol.name, "expression nested too deep");
        return TOO_DEEP.to_string();
    }
    let out = render_frame(ctx, frame, stack);
    ctx.leave_expression();
    out
}

fn render_frame(ctx: &mut DecompileContext<'_>, frame: &StackFrame, stack: &mut Vec<StackFrame>) -> String {
    let instr = &frame.instr;
    match instr.op {
        op if op.is_binary() => {
            let rhs = pop_operand(ctx, stack, instr.pc);
            let lhs = pop_operand(ctx, stack, instr.pc);
            format!("({lhs}) {} ({rhs})", op.operator().unwrap_or("?"))
        }
        op if op.is_compound_assign() => {
            let target = pop_operand(ctx, stack, instr.pc);
            let value = pop_operand(ctx, stack, instr.pc);
            format!("{target} {} {value}", op.operator().unwrap_or("?="))
        }
        op if op.is_unary() => {
            let operand = pop_operand(ctx, stack, instr.pc);
            format!("{}({operand})", op.operator().unwrap_or("?"))
        }
        op if op.is_move() => render_move(ctx, stack, instr.pc),
        Opcode::Ret => {
            if !ctx.symbol.has_return() {
                return "return".to_string();
            }
            match stack.pop() {
                Some(value) => format!("return {}", render(ctx, &value, stack)),
                None => {
                    warn!(pc = instr.pc, function = %ctx.symbol.name, "return without a value on the stack");
                    "return 0 /* !broken stack! */".to_string()
                }
            }
        }
        Opcode::Call => {
            let target = instr.address().unwrap_or_default();
            match ctx.script.symbol_by_address(target) {
                Some(callee) => render_call(ctx, callee, stack),
                None => {
                    warn!(pc = instr.pc, target, "call to unknown address");
                    format!("???{target:x}()")
                }
            }
        }
        Opcode::CallExtern => {
            let index = instr.symbol().unwrap_or_default();
            match ctx.script.symbol_by_index(index) {
                Some(callee) => render_call(ctx, callee, stack),
                None => {
                    warn!(pc = instr.pc, index, "call to unknown external");
                    format!("???_{index}()")
                }
            }
        }
        Opcode::PushInt => instr.immediate().unwrap_or_default().to_string(),
        Opcode::PushVar | Opcode::PushInstance => {
            let index = instr.symbol().unwrap_or_default();
            let Some(sym) = ctx.script.symbol_by_index(index) else {
                return unresolved(instr.pc, index);
            };
            if sym.is_generated() && sym.kind == DataType::String {
                return format!("\"{}\"", sym.string_at(0).unwrap_or_default());
            }
            let name = variable_name(ctx, sym, frame.instance);
            if sym.count > 1 { format!("{name}[0]") } else { name }
        }
        Opcode::PushArrayVar => {
            let index = instr.symbol().unwrap_or_default();
            let element = instr.element().unwrap_or_default();
            match ctx.script.symbol_by_index(index) {
                Some(sym) => format!("{}[{element}]", variable_name(ctx, sym, frame.instance)),
                None => format!("{}[{element}]", unresolved(instr.pc, index)),
            }
        }
        Opcode::SetInstance => format!("/* set_instance({}) */", instr.symbol().unwrap_or_default()),
        Opcode::Nop => String::new(),
        op => match instr.operand {
            Some(Operand::Address(a)) => format!("/* {} {a:08x} */", op.mnemonic()),
            Some(Operand::Immediate(v)) => format!("/* {} {v} */", op.mnemonic()),
            Some(Operand::Symbol(s)) => format!("/* {} {s} */", op.mnemonic()),
            Some(Operand::SymbolElement(s, i)) => format!("/* {} {s}+{i} */", op.mnemonic()),
            None => format!("/* {} */", op.mnemonic()),
        },
    }
}

fn pop_operand(ctx: &mut DecompileContext<'_>, stack: &mut Vec<StackFrame>, pc: u32) -> String {
    match stack.pop() {
        Some(frame) => render(ctx, &frame, stack),
        None => {
            warn!(pc, function = %ctx.symbol.name, "expression stack underflow");
            BROKEN_STACK.to_string()
        }
    }
}

fn unresolved(pc: u32, index: u32) -> String {
    warn!(pc, index, "reference to unknown symbol");
    format!("???_{index}")
}

/// Arguments are on the stack in declaration order, so the last parameter is popped first.
fn render_call(ctx: &mut DecompileContext<'_>, callee: &Symbol, stack: &mut Vec<StackFrame>) -> String {
    let script = ctx.script;
    let params = script.parameters_of(callee);
    let mut args = Vec::with_capacity(params.len());

    for param in params.iter().rev() {
        let arg = match stack.pop() {
            Some(frame) if param.kind == DataType::Function => function_reference(ctx, &frame, stack),
            Some(frame) => render(ctx, &frame, stack),
            None => {
                warn!(callee = %callee.name, param = %param.name, "missing call argument");
                BROKEN_STACK.to_string()
            }
        };
        args.push(arg);
    }
    args.reverse();

    format!("{}({})", callee.name, args.join(", "))
}

/// Function values are pushed as plain integers holding a symbol index.
fn function_reference(ctx: &mut DecompileContext<'_>, frame: &StackFrame, stack: &mut Vec<StackFrame>) -> String {
    if frame.instr.op == Opcode::PushInt {
        let value = frame.instr.immediate().unwrap_or_default();
        if let Some(func) = u32::try_from(value).ok().and_then(|i| ctx.script.symbol_by_index(i)) {
            return func.name.clone();
        }
    }
    render(ctx, frame, stack)
}

fn render_move(ctx: &mut DecompileContext<'_>, stack: &mut Vec<StackFrame>, pc: u32) -> String {
    let Some(dest_frame) = stack.pop() else {
        warn!(pc, function = %ctx.symbol.name, "assignment without a destination");
        let value = pop_operand(ctx, stack, pc);
        return format!("{BROKEN_STACK} = {value}");
    };
    let dest = render(ctx, &dest_frame, stack);
    let dest_kind = dest_frame
        .instr
        .symbol()
        .and_then(|i| ctx.script.symbol_by_index(i))
        .map(|s| s.kind);

    let value = match (stack.pop(), dest_kind) {
        (None, _) => {
            warn!(pc, function = %ctx.symbol.name, "assignment without a value");
            BROKEN_STACK.to_string()
        }
        (Some(src), Some(DataType::Float)) if src.instr.op == Opcode::PushInt => {
            let bits = src.instr.immediate().unwrap_or_default() as u32;
            f32::from_bits(bits).to_string()
        }
        (Some(src), Some(DataType::Function)) => function_reference(ctx, &src, stack),
        (Some(src), _) => render(ctx, &src, stack),
    };

    format!("{dest} = {value}")
}

/// Display name of a variable reference, registering locals of the function being decompiled.
fn variable_name(ctx: &mut DecompileContext<'_>, sym: &Symbol, pushed_in: Option<u32>) -> String {
    let script = ctx.script;

    if script.is_class_member(sym) && !ctx.in_own_instance() {
        let field = sym.local_name();
        return match pushed_in.and_then(|i| script.symbol_by_index(i)) {
            None => format!("???.{field}"),
            Some(instance) => match instance.name.split_once('.') {
                Some((scope, rest)) if scope.eq_ignore_ascii_case(&ctx.symbol.name) => format!("{rest}.{field}"),
                _ => format!("{}.{field}", instance.name),
            },
        };
    }

    match sym.scope() {
        Some(scope) => {
            if scope.eq_ignore_ascii_case(&ctx.symbol.name) && !ctx.is_parameter(sym.index) {
                ctx.add_local(sym);
            }
            sym.local_name().to_string()
        }
        None => sym.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::opcode::decode;
    use crate::script::Script;
    use crate::symbol::{SymbolFlags, SymbolValue};
    use crate::testing::{Asm, class, field, float_var, function, instance, int_var, param, string_literal};

    /// Feeds every instruction of `code` but the last through the stack and renders the last.
    fn render_last(script: &Script, func: &str, instance: Option<u32>) -> (String, usize) {
        let sym = script.symbol_by_name(func).unwrap();
        let mut ctx = DecompileContext::new(script, sym, 16);
        ctx.instance = instance;

        let mut frames = Vec::new();
        let mut pc = 0;
        while (pc as usize) < script.code().len() {
            let (instr, next) = decode(script.code(), pc).unwrap();
            frames.push(StackFrame { instr, instance });
            pc = next;
        }
        let last = frames.pop().unwrap();
        let out = render(&mut ctx, &last, &mut frames);
        (out, frames.len())
    }

    fn int_function(code: Vec<u8>) -> Script {
        Script::new(
            code,
            vec![
                function("F", 0).with_return_type(DataType::Int),
                int_var("A"),
                int_var("B"),
            ],
        )
    }

    #[test]
    fn sum_of_literals_returns_parenthesized_operands() {
        let code = Asm::new().push_int(3).push_int(4).op(Opcode::Add).ret().finish();
        let (out, left) = render_last(&int_function(code), "F", None);
        assert_eq!(out, "return (3) + (4)");
        assert_eq!(left, 0);
    }

    #[test_case(Opcode::Sub, "(A) - (B)")]
    #[test_case(Opcode::Div, "(A) / (B)")]
    #[test_case(Opcode::Lt, "(A) < (B)")]
    #[test_case(Opcode::LogAnd, "(A) && (B)")]
    #[test_case(Opcode::Shl, "(A) << (B)")]
    #[test_case(Opcode::Neq, "(A) != (B)")]
    fn binary_operands_keep_source_order(op: Opcode, expected: &str) {
        let code = Asm::new().push_var(1).push_var(2).op(op).finish();
        let (out, left) = render_last(&int_function(code), "F", None);
        assert_eq!(out, expected);
        assert_eq!(left, 0);
    }

    #[test]
    fn nested_expression_consumes_whole_stack() {
        // A + B * 2
        let code = Asm::new()
            .push_var(1)
            .push_var(2)
            .push_int(2)
            .op(Opcode::Mul)
            .op(Opcode::Add)
            .ret()
            .finish();
        let (out, left) = render_last(&int_function(code), "F", None);
        assert_eq!(out, "return (A) + ((B) * (2))");
        assert_eq!(left, 0);
    }

    #[test_case(Opcode::Negate, "-(A)")]
    #[test_case(Opcode::Not, "!(A)")]
    #[test_case(Opcode::Complement, "~(A)")]
    #[test_case(Opcode::Plus, "+(A)")]
    fn unary_operators(op: Opcode, expected: &str) {
        let code = Asm::new().push_var(1).op(op).finish();
        assert_eq!(render_last(&int_function(code), "F", None).0, expected);
    }

    #[test]
    fn compound_assignment_takes_target_from_top() {
        let code = Asm::new().push_int(5).push_var(1).op(Opcode::AddMov).finish();
        assert_eq!(render_last(&int_function(code), "F", None).0, "A += 5");
    }

    #[test]
    fn large_literals_are_kept_verbatim() {
        let code = Asm::new().push_int(4096).push_var(1).op(Opcode::MovInt).finish();
        assert_eq!(render_last(&int_function(code), "F", None).0, "A = 4096");
    }

    #[test]
    fn empty_stack_yields_placeholders() {
        let code = Asm::new().op(Opcode::Add).finish();
        let (out, _) = render_last(&int_function(code), "F", None);
        assert_eq!(out, format!("({BROKEN_STACK}) + ({BROKEN_STACK})"));

        let code = Asm::new().ret().finish();
        assert_eq!(render_last(&int_function(code), "F", None).0, "return 0 /* !broken stack! */");
    }

    #[test]
    fn void_return_pops_nothing() {
        let script = Script::new(
            Asm::new().push_int(1).ret().finish(),
            vec![function("F", 0)],
        );
        let (out, left) = render_last(&script, "F", None);
        assert_eq!(out, "return");
        assert_eq!(left, 1);
    }

    #[test]
    fn float_destination_reinterprets_literal_bits() {
        let script = Script::new(
            Asm::new().push_int(1.5f32.to_bits() as i32).push_var(1).op(Opcode::MovFloat).finish(),
            vec![function("F", 0), float_var("SPEED")],
        );
        assert_eq!(render_last(&script, "F", None).0, "SPEED = 1.5");
    }

    #[test]
    fn function_destination_resolves_symbol_index() {
        let script = Script::new(
            Asm::new().push_int(2).push_var(1).op(Opcode::MovInt).finish(),
            vec![
                function("F", 0),
                Symbol::new("CALLBACK", DataType::Function),
                function("ON_DAMAGE", 0),
            ],
        );
        assert_eq!(render_last(&script, "F", None).0, "CALLBACK = ON_DAMAGE");
    }

    #[test]
    fn call_pops_arguments_in_declaration_order() {
        let script = Script::new(
            Asm::new().push_int(1).push_int(2).push_int(0).call(40).finish(),
            vec![
                function("F", 0),
                function("GIVE", 40).with_return_type(DataType::Int),
                param("GIVE.A", DataType::Int),
                param("GIVE.B", DataType::Int),
                param("GIVE.FN", DataType::Function),
            ],
        );
        let (out, left) = render_last(&script, "F", None);
        assert_eq!(out, "GIVE(1, 2, F)");
        assert_eq!(left, 0);
    }

    #[test]
    fn call_without_parameters_has_empty_argument_list() {
        let script = Script::new(
            Asm::new().call_extern(1).finish(),
            vec![
                function("F", 0),
                function("WLD_GETDAY", 0)
                    .with_flags(SymbolFlags::EXTERNAL)
                    .with_return_type(DataType::Int),
            ],
        );
        assert_eq!(render_last(&script, "F", None).0, "WLD_GETDAY()");
    }

    #[test]
    fn instance_arguments_render_by_name() {
        let script = Script::new(
            Asm::new().push_instance(2).push_var(4).call(0).finish(),
            vec![
                function("B_SAY", 0),
                param("B_SAY.SLF", DataType::Instance),
                Symbol::new("HERO", DataType::Instance),
                param("B_SAY.TEXT", DataType::String),
                string_literal("Hi"),
            ],
        );
        assert_eq!(render_last(&script, "B_SAY", None).0, "B_SAY(HERO, \"Hi\")");
    }

    #[test]
    fn generated_strings_render_as_literals() {
        let script = Script::new(
            Asm::new().push_var(1).finish(),
            vec![function("F", 0), string_literal("Hello")],
        );
        assert_eq!(render_last(&script, "F", None).0, "\"Hello\"");
    }

    #[test]
    fn arrays_render_element_access() {
        let arr = Symbol::new("ATTR", DataType::Int).with_value(SymbolValue::Int(vec![0; 8]));
        let script = Script::new(
            Asm::new().push_var(1).push_array(1, 3).finish(),
            vec![function("F", 0), arr],
        );
        let (out, left) = render_last(&script, "F", None);
        assert_eq!(out, "ATTR[3]");
        assert_eq!(left, 1);

        let script = Script::new(Asm::new().push_var(1).finish(), script.symbols()[..2].to_vec());
        assert_eq!(render_last(&script, "F", None).0, "ATTR[0]");
    }

    fn npc_script(code: Vec<u8>) -> Script {
        Script::new(
            code,
            vec![
                class("C_NPC", 16),
                field("C_NPC.NAME", DataType::String, 0),
                instance("HERO", 0, 0).with_flags(SymbolFlags::CONST),
                Symbol::new("SELF", DataType::Instance).with_parent(0),
                function("F", 0),
                Symbol::new("F.OTHER", DataType::Instance).with_parent(0),
            ],
        )
    }

    #[test]
    fn members_outside_own_instance_are_qualified() {
        let code = Asm::new().push_var(1).finish();
        let script = npc_script(code);
        assert_eq!(render_last(&script, "F", Some(3)).0, "SELF.NAME");
        assert_eq!(render_last(&script, "F", Some(5)).0, "OTHER.NAME");
        assert_eq!(render_last(&script, "F", None).0, "???.NAME");
    }

    #[test]
    fn members_inside_own_instance_are_bare() {
        let code = Asm::new().push_var(1).finish();
        let script = npc_script(code);
        assert_eq!(render_last(&script, "HERO", Some(2)).0, "NAME");
    }

    #[test]
    fn scoped_variables_become_locals_once() {
        let script = Script::new(
            Asm::new().push_var(1).push_var(1).push_var(2).op(Opcode::Add).finish(),
            vec![function("F", 0), int_var("F.COUNT"), param("F.ARG", DataType::Int)],
        );
        let sym = script.symbol_by_name("F").unwrap();
        let mut ctx = DecompileContext::new(&script, sym, 16);
        let mut stack = Vec::new();
        let mut pc = 0;
        let mut last = None;
        while (pc as usize) < script.code().len() {
            let (instr, next) = decode(script.code(), pc).unwrap();
            if let Some(prev) = last.replace(StackFrame { instr, instance: None }) {
                stack.push(prev);
            }
            pc = next;
        }
        let out = render(&mut ctx, &last.unwrap(), &mut stack);
        assert_eq!(out, "(COUNT) + (ARG)");
        assert_eq!(render(&mut ctx, &stack.pop().unwrap(), &mut stack), "COUNT");
        assert_eq!(ctx.locals(), [("COUNT".to_string(), 1)]);
    }

    #[test]
    fn runaway_operand_chain_is_cut_off() {
        let mut asm = Asm::new();
        asm.push_int(1);
        for _ in 0..20 {
            asm.op(Opcode::Negate);
        }
        let (out, left) = render_last(&int_function(asm.finish()), "F", None);
        assert_eq!(
            out,
            format!("{}{TOO_DEEP}{}", "-(".repeat(16), ")".repeat(16))
        );
        assert_eq!(left, 4);
    }

    #[test_case(vec![Opcode::Jump.byte(), 0x20, 0, 0, 0], "/* B 00000020 */"; "jump")]
    #[test_case(vec![Opcode::JumpIfZero.byte(), 7, 0, 0, 0], "/* BZ 00000007 */"; "conditional jump")]
    #[test_case(vec![Opcode::Nop.byte()], ""; "nop")]
    fn control_flow_frames_render_as_comments(code: Vec<u8>, expected: &str) {
        let (out, left) = render_last(&int_function(code), "F", None);
        assert_eq!(out, expected);
        assert_eq!(left, 0);
    }

    #[test]
    fn unknown_symbols_get_placeholder_names() {
        let code = Asm::new().push_var(99).finish();
        assert_eq!(render_last(&int_function(code), "F", None).0, "???_99");
    }
}
