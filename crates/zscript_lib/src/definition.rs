use std::fmt::Write;

use crate::script::Script;
use crate::symbol::{DataType, Symbol};

/// Formats the literal value of a constant: one element when `index` is given,
/// otherwise every element, brace-wrapped for arrays.
pub fn format_value(sym: &Symbol, index: Option<usize>) -> String {
    let element = |i: usize| match sym.kind {
        DataType::Float => sym.float_at(i).map(|v| v.to_string()),
        DataType::Int => sym.int_at(i).map(|v| v.to_string()),
        DataType::String => sym.string_at(i).map(|v| format!("\"{v}\"")),
        _ => None,
    };

    if let Some(i) = index {
        return element(i).unwrap_or_default();
    }

    let values: Vec<String> = (0..sym.count as usize).map(|i| element(i).unwrap_or_default()).collect();
    if sym.count > 1 {
        format!("{{{}}}", values.join(", "))
    } else {
        values.join(", ")
    }
}

/// Source declaration of `sym`, without a body.
pub fn definition(script: &Script, sym: &Symbol) -> String {
    definition_indented(script, sym, "")
}

/// Like [`definition`], with every line prefixed by `indent`. Members have no declaration of their own.
pub fn definition_indented(script: &Script, sym: &Symbol, indent: &str) -> String {
    if sym.is_member() {
        return String::new();
    }

    let mut def = String::from(indent);
    if sym.is_external() {
        def.push_str("extern ");
    }
    let parent = script.parent_of(sym).map_or("*ERR*", |p| p.name.as_str());

    match sym.kind {
        DataType::Instance => {
            let _ = write!(def, "instance {}({parent})", sym.name);
            if !sym.is_const() {
                def.push(';');
            }
        }
        DataType::Prototype => {
            let _ = write!(def, "prototype {}({parent})", sym.name);
        }
        DataType::Class => {
            let _ = writeln!(def, "class {} {{", sym.name);
            for member in script.class_fields(sym) {
                let _ = write!(def, "{indent}\tvar {} {}", member.kind, member.local_name());
                if member.count > 1 {
                    let _ = write!(def, "[{}]", member.count);
                }
                def.push_str(";\n");
            }
            let _ = write!(def, "{indent}}};");
        }
        DataType::Function => {
            let params: Vec<String> = script
                .parameters_of(sym)
                .iter()
                .map(|p| {
                    let ty = match p.kind {
                        DataType::Instance => script.parent_of(p).map_or("instance", |c| c.name.as_str()),
                        kind => kind.name(),
                    };
                    format!("var {ty} {}", p.local_name())
                })
                .collect();
            let _ = write!(def, "func {} {}({})", sym.return_type, sym.name, params.join(", "));
        }
        kind => {
            def.push_str(if sym.is_const() { "const " } else { "var " });
            let _ = write!(def, "{kind} {}", sym.name);
            if sym.count > 1 {
                let _ = write!(def, "[{}]", sym.count);
            }
            if sym.is_const() {
                let _ = write!(def, " = {}", format_value(sym, None));
            }
            def.push(';');
        }
    }

    def
}
