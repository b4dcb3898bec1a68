use unweave_bytecode::asm;
use unweave_bytecode::bytecode::{ExtendedOp, Opcode, Operand};
use unweave_bytecode::Error;

#[test]
fn nested_functions_record_entry_points() {
    let code = asm::parse(
        "gml_Object_obj_player_Create_0",
        "b [skip]\n\
         > gml_Script_anon_1(2)\n\
         pushi.e 1\n\
         exit.i\n\
         :[skip]\n\
         exit.i",
    )
    .unwrap();
    assert_eq!(code.children.len(), 1);
    let child = &code.children[0];
    assert_eq!(child.name, "gml_Script_anon_1");
    assert_eq!((child.start, child.args_count), (4, 2));
    assert!(code.is_boundary(child.start));
    assert_eq!(code.instructions[0].branch_target(), Some(12));
}

#[test]
fn with_blocks_assemble_both_popenv_forms() {
    let code = asm::parse(
        "t",
        "push.v self.other\n\
         pushenv [end]\n\
         :[body]\n\
         b [drop]\n\
         :[end]\n\
         popenv [body]\n\
         b [out]\n\
         :[drop]\n\
         popenv <drop>\n\
         :[out]\n\
         exit.i",
    )
    .unwrap();
    let popenvs: Vec<_> = code
        .instructions
        .iter()
        .filter(|i| i.opcode == Opcode::PopEnv)
        .collect();
    assert_eq!(popenvs[0].branch_target(), Some(12));
    assert!(popenvs[0].is_branch());
    assert_eq!(popenvs[1].operand, Operand::PopEnvExit);
    assert!(!popenvs[1].is_branch());
}

#[test]
fn static_guard_uses_extended_opcodes() {
    let code = asm::parse("t", "isstaticok.e\nbt [done]\n:[done]\nsetstatic.e").unwrap();
    assert_eq!(code.instructions[0].extended_op(), Some(ExtendedOp::IsStaticOk));
    assert_eq!(code.instructions[2].extended_op(), Some(ExtendedOp::SetStatic));
    assert_eq!(code.instructions[1].branch_target(), Some(8));
    assert_eq!(code.length, 12);
}

#[test]
fn display_prints_assembler_syntax() {
    let code = asm::parse("t", "push.v self.a\ncmp.i.v LTE\nconv.v.b\ncall.i foo(0)").unwrap();
    let text: Vec<String> = code
        .instructions
        .iter()
        .map(|i| i.display(&code.symbols).to_string())
        .collect();
    assert_eq!(text, vec!["push.v self.a", "cmp.i.v LTE", "conv.v.b", "call.i foo(0)"]);
}

#[test]
fn duplicate_labels_are_rejected() {
    let err = asm::parse("t", ":[a]\nexit.i\n:[a]\nexit.i").unwrap_err();
    assert!(matches!(err, Error::DuplicateLabel { line: 3, .. }));
    assert_eq!(err.to_string(), "line 3: label `a` defined twice");
}
