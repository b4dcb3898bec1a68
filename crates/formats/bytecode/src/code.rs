use crate::bytecode::Instruction;

/// One compiled code entry: a flat instruction stream plus the nested
/// function entry points that live inside it.
#[derive(Debug, Clone, Default)]
pub struct CodeEntry {
    /// Entry name (e.g., "gml_Script_foo").
    pub name: String,
    /// Instructions in address order.
    pub instructions: Vec<Instruction>,
    /// Length of bytecode in bytes. Branches may target this address.
    pub length: usize,
    /// Child entries sharing this entry's bytecode (GMS2.3 functions).
    pub children: Vec<ChildEntry>,
    pub symbols: SymbolTable,
}

/// A nested function whose body starts partway into the parent entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    /// Address of the first instruction of the body.
    pub start: usize,
    pub args_count: u16,
}

/// Names for the ids referenced by instruction operands.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub variables: Vec<String>,
    pub functions: Vec<String>,
    pub strings: Vec<String>,
}

impl SymbolTable {
    pub fn variable_id(&mut self, name: &str) -> u32 {
        intern(&mut self.variables, name)
    }

    pub fn function_id(&mut self, name: &str) -> u32 {
        intern(&mut self.functions, name)
    }

    pub fn string_id(&mut self, value: &str) -> u32 {
        intern(&mut self.strings, value)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|n| n == name) {
        Some(i) => i as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}

impl CodeEntry {
    /// Index of the instruction at `address`, if one starts there.
    pub fn instruction_index(&self, address: usize) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&address, |inst| inst.address)
            .ok()
    }

    /// Whether `address` is an instruction boundary or the end of the entry.
    pub fn is_boundary(&self, address: usize) -> bool {
        address == self.length || self.instruction_index(address).is_some()
    }
}
