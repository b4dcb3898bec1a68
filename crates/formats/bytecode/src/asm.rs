//! Line-oriented assembler for hand-written instruction streams.
//!
//! ```text
//! # comment
//! :[loop]               label at the current address
//! > gml_Script_child    nested function body starts here
//! push.v self.a
//! pushi.e 1
//! cmp.i.v LT
//! bf [end]
//! call.i show_debug_message(1)
//! popenv <drop>
//! isstaticok.e
//! ```
//!
//! Branch operands name labels in brackets and are resolved to absolute
//! addresses. Variable, function and string names are interned into the
//! entry's [`SymbolTable`].

use std::collections::HashMap;

use crate::bytecode::{
    ComparisonKind, DataType, ExtendedOp, InstanceType, Instruction, Opcode, Operand, VariableRef,
};
use crate::code::{ChildEntry, CodeEntry, SymbolTable};
use crate::error::{Error, Result};

/// Operand before label resolution.
enum Pending {
    Ready(Operand),
    Label(String),
}

struct PendingInst {
    line: usize,
    address: usize,
    opcode: Opcode,
    type1: DataType,
    type2: DataType,
    operand: Pending,
}

/// Assemble `text` into a code entry named `name`.
pub fn parse(name: &str, text: &str) -> Result<CodeEntry> {
    let mut symbols = SymbolTable::default();
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut children = Vec::new();
    let mut pending = Vec::new();
    let mut address = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let stmt = strip_comment(raw).trim();
        if stmt.is_empty() {
            continue;
        }

        if let Some(rest) = stmt.strip_prefix(':') {
            let label = bracketed(rest).ok_or_else(|| asm_err(line, "expected `:[label]`"))?;
            if labels.insert(label.to_string(), address).is_some() {
                return Err(Error::DuplicateLabel { line, label: label.to_string() });
            }
            continue;
        }

        if let Some(rest) = stmt.strip_prefix('>') {
            children.push(parse_child(line, rest.trim(), address)?);
            continue;
        }

        let inst = parse_instruction(line, stmt, address, &mut symbols)?;
        address += 4 + match &inst.operand {
            Pending::Ready(op) => op.extra_size(),
            Pending::Label(_) => 0,
        };
        pending.push(inst);
    }

    let mut instructions = Vec::with_capacity(pending.len());
    for p in pending {
        let operand = match p.operand {
            Pending::Ready(op) => op,
            Pending::Label(label) => match labels.get(&label) {
                Some(&target) => Operand::Branch(target),
                None => return Err(Error::UndefinedLabel { line: p.line, label }),
            },
        };
        instructions.push(Instruction {
            address: p.address,
            opcode: p.opcode,
            type1: p.type1,
            type2: p.type2,
            operand,
        });
    }

    Ok(CodeEntry {
        name: name.to_string(),
        instructions,
        length: address,
        children,
        symbols,
    })
}

fn parse_child(line: usize, text: &str, address: usize) -> Result<ChildEntry> {
    let (name, args_count) = match text.split_once('(') {
        Some((name, rest)) => {
            let argc = rest
                .strip_suffix(')')
                .and_then(|n| n.trim().parse::<u16>().ok())
                .ok_or_else(|| asm_err(line, "expected `> name(argc)`"))?;
            (name.trim(), argc)
        }
        None => (text, 0),
    };
    if name.is_empty() {
        return Err(asm_err(line, "child entry needs a name"));
    }
    Ok(ChildEntry { name: name.to_string(), start: address, args_count })
}

fn parse_instruction(
    line: usize,
    stmt: &str,
    address: usize,
    symbols: &mut SymbolTable,
) -> Result<PendingInst> {
    let (head, arg) = match stmt.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, arg.trim()),
        None => (stmt, ""),
    };
    let mut parts = head.split('.');
    let mnemonic = parts.next().unwrap_or_default();
    let mut types = Vec::new();
    for suffix in parts {
        let mut chars = suffix.chars();
        let ty = match (chars.next(), chars.next()) {
            (Some(c), None) => DataType::from_suffix(c),
            _ => None,
        };
        types.push(ty.ok_or_else(|| asm_err(line, format!("bad type suffix `.{suffix}`")))?);
    }
    let type1 = types.first().copied().unwrap_or(DataType::Int32);
    let type2 = types.get(1).copied().unwrap_or(type1);

    let make = |opcode, operand| PendingInst { line, address, opcode, type1, type2, operand };

    if let Some(ext) = ExtendedOp::from_mnemonic(mnemonic) {
        let extra = if ext == ExtendedOp::PushRef {
            Some(parse_num::<i32>(line, arg)?)
        } else {
            None
        };
        let operand = Operand::Break { signal: ext as u16, extra };
        return Ok(make(Opcode::Break, Pending::Ready(operand)));
    }

    let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| Error::UnknownOpcode {
        line,
        mnemonic: mnemonic.to_string(),
    })?;

    let operand = match opcode {
        Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv => Pending::Label(label_arg(line, arg)?),
        Opcode::PopEnv if arg == "<drop>" => Pending::Ready(Operand::PopEnvExit),
        Opcode::PopEnv => Pending::Label(label_arg(line, arg)?),
        Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
            Pending::Ready(parse_push(line, type1, arg, symbols)?)
        }
        Opcode::Pop => Pending::Ready(parse_variable(line, arg, symbols)?),
        Opcode::Cmp => {
            let kind = ComparisonKind::from_mnemonic(arg)
                .ok_or_else(|| asm_err(line, format!("unknown comparison `{arg}`")))?;
            Pending::Ready(Operand::Comparison(kind))
        }
        Opcode::Dup => {
            let n = if arg.is_empty() { 0 } else { parse_num::<u8>(line, arg)? };
            Pending::Ready(Operand::Dup(n))
        }
        Opcode::Call => Pending::Ready(parse_call(line, arg, symbols)?),
        Opcode::CallV => Pending::Ready(Operand::Int16(parse_num::<i16>(line, arg)?)),
        Opcode::Break => {
            return Err(asm_err(line, "use the extended mnemonic (e.g. `chkindex.e`) instead of `break`"))
        }
        _ => {
            if !arg.is_empty() {
                return Err(asm_err(line, format!("`{mnemonic}` takes no operand")));
            }
            Pending::Ready(Operand::None)
        }
    };
    Ok(make(opcode, operand))
}

fn parse_push(line: usize, ty: DataType, arg: &str, symbols: &mut SymbolTable) -> Result<Operand> {
    Ok(match ty {
        DataType::Int16 => Operand::Int16(parse_num(line, arg)?),
        DataType::Int32 => Operand::Int32(parse_num(line, arg)?),
        DataType::Int64 => Operand::Int64(parse_num(line, arg)?),
        DataType::Double => Operand::Double(parse_num(line, arg)?),
        DataType::Float => Operand::Float(parse_num(line, arg)?),
        DataType::Bool => match arg {
            "true" | "1" => Operand::Bool(true),
            "false" | "0" => Operand::Bool(false),
            _ => return Err(asm_err(line, format!("bad boolean `{arg}`"))),
        },
        DataType::String => Operand::String(symbols.string_id(&parse_string(line, arg)?)),
        DataType::Variable => parse_variable(line, arg, symbols)?,
    })
}

fn parse_variable(line: usize, arg: &str, symbols: &mut SymbolTable) -> Result<Operand> {
    let (scope, name) = arg
        .split_once('.')
        .ok_or_else(|| asm_err(line, format!("expected `scope.name`, found `{arg}`")))?;
    let instance = match InstanceType::from_scope_name(scope) {
        Some(it) => it as i16,
        None => parse_num::<i16>(line, scope)?,
    };
    let var_ref = VariableRef { variable_id: symbols.variable_id(name) };
    Ok(Operand::Variable { var_ref, instance })
}

fn parse_call(line: usize, arg: &str, symbols: &mut SymbolTable) -> Result<Operand> {
    let (name, rest) = arg
        .split_once('(')
        .ok_or_else(|| asm_err(line, format!("expected `name(argc)`, found `{arg}`")))?;
    let argc = rest
        .strip_suffix(')')
        .ok_or_else(|| asm_err(line, "unclosed argument count"))?;
    Ok(Operand::Call {
        function_id: symbols.function_id(name.trim()),
        argc: parse_num(line, argc.trim())?,
    })
}

fn parse_string(line: usize, arg: &str) -> Result<String> {
    let inner = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| asm_err(line, format!("expected quoted string, found `{arg}`")))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => return Err(asm_err(line, "dangling escape in string")),
        }
    }
    Ok(out)
}

fn parse_num<T: std::str::FromStr>(line: usize, s: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| asm_err(line, format!("bad numeric operand `{s}`")))
}

fn label_arg(line: usize, arg: &str) -> Result<String> {
    bracketed(arg)
        .map(str::to_string)
        .ok_or_else(|| asm_err(line, format!("expected `[label]`, found `{arg}`")))
}

fn bracketed(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
    (!inner.is_empty()).then_some(inner)
}

/// Drop a trailing `#` comment, ignoring `#` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn asm_err(line: usize, message: impl Into<String>) -> Error {
    Error::Asm { line, message: message.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_outside_strings_only() {
        assert_eq!(strip_comment("push.s \"a#b\" # tail"), "push.s \"a#b\" ");
        assert_eq!(strip_comment("# whole line"), "");
    }

    #[test]
    fn labels_resolve_forward_and_backward() {
        let code = parse(
            "t",
            ":[top]\n\
             pushi.e 1\n\
             bf [end]\n\
             b [top]\n\
             :[end]\n",
        )
        .unwrap();
        assert_eq!(code.length, 12);
        assert_eq!(code.instructions[1].branch_target(), Some(12));
        assert_eq!(code.instructions[2].branch_target(), Some(0));
    }

    #[test]
    fn operand_sizes_advance_addresses() {
        let code = parse("t", "push.i 7\npush.d 1.5\npush.v self.x\nexit.i").unwrap();
        let addrs: Vec<_> = code.instructions.iter().map(|i| i.address).collect();
        assert_eq!(addrs, vec![0, 8, 20, 28]);
        assert_eq!(code.length, 32);
    }

    #[test]
    fn symbols_are_interned() {
        let code = parse("t", "push.v self.x\npop.v.v global.x\ncall.i foo(2)\npush.s \"hi\"").unwrap();
        assert_eq!(code.symbols.variables, vec!["x".to_string()]);
        assert_eq!(code.symbols.functions, vec!["foo".to_string()]);
        assert_eq!(code.symbols.strings, vec!["hi".to_string()]);
        assert_eq!(code.instructions[1].display(&code.symbols).to_string(), "pop.v.v global.x");
    }

    #[test]
    fn errors_carry_line_numbers() {
        match parse("t", "pushi.e 1\nfrobnicate.i") {
            Err(Error::UnknownOpcode { line: 2, .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match parse("t", "b [nowhere]") {
            Err(Error::UndefinedLabel { line: 1, label }) => assert_eq!(label, "nowhere"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
