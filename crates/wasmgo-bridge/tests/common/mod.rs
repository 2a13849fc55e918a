//! Hand-assembled guest modules for the integration tests.
//!
//! A [`Guest`] imports whichever host functions a test names, exports one
//! page of `memory`, an `_start` and a `go_scheduler` body, and optionally a
//! mutable i32 global for counting scheduler passes.

#![allow(dead_code)]

use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction, MemArg,
    MemorySection, MemoryType, Module, TypeSection, ValType,
};
use wasmgo_bridge::abi::boxed_slot;

/// Raw slot holding the global object handle.
pub const GLOBAL_SLOT: u64 = boxed_slot(0, 5);

const I32: ValType = ValType::I32;
const F64: ValType = ValType::F64;

/// `(namespace, params, results)` for a host import, by name.
fn signature(name: &str) -> (&'static str, Vec<ValType>, Vec<ValType>) {
    match name {
        "fd_write" => ("wasi_unstable", vec![I32; 4], vec![I32]),
        "proc_exit" => ("wasi_unstable", vec![I32], vec![]),
        "runtime.ticks" => ("env", vec![], vec![F64]),
        "runtime.sleepTicks" => ("env", vec![F64], vec![]),
        "syscall/js.stringVal" => ("env", vec![I32; 5], vec![]),
        "syscall/js.valueGet" => ("env", vec![I32; 6], vec![]),
        "syscall/js.valueSet" => ("env", vec![I32; 6], vec![]),
        "syscall/js.valueIndex" => ("env", vec![I32; 5], vec![]),
        "syscall/js.valueSetIndex" => ("env", vec![I32; 5], vec![]),
        "syscall/js.valueCall" => ("env", vec![I32; 9], vec![]),
        "syscall/js.valueNew" => ("env", vec![I32; 7], vec![]),
        "syscall/js.valueLength" => ("env", vec![I32; 3], vec![I32]),
        "syscall/js.valuePrepareString" => ("env", vec![I32; 4], vec![]),
        "syscall/js.valueLoadString" => ("env", vec![I32; 6], vec![]),
        other => panic!("no known signature for import {other}"),
    }
}

#[derive(Default)]
pub struct Guest {
    imports: Vec<(String, String, Vec<ValType>, Vec<ValType>)>,
    data: Vec<(u32, Vec<u8>)>,
    start: Vec<Instruction<'static>>,
    scheduler: Vec<Instruction<'static>>,
    counter: bool,
}

impl Guest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a host function and return its function index.
    pub fn import(&mut self, name: &str) -> u32 {
        if let Some(index) = self.imports.iter().position(|(_, n, _, _)| n == name) {
            return index as u32;
        }
        let (module, params, results) = signature(name);
        self.imports
            .push((module.to_string(), name.to_string(), params, results));
        (self.imports.len() - 1) as u32
    }

    /// Import a function under an arbitrary namespace and `() -> ()` type.
    pub fn import_foreign(&mut self, module: &str, name: &str) -> u32 {
        self.imports
            .push((module.to_string(), name.to_string(), vec![], vec![]));
        (self.imports.len() - 1) as u32
    }

    pub fn data(&mut self, offset: u32, bytes: &[u8]) -> &mut Self {
        self.data.push((offset, bytes.to_vec()));
        self
    }

    pub fn start(&mut self, body: Vec<Instruction<'static>>) -> &mut Self {
        self.start = body;
        self
    }

    pub fn scheduler(&mut self, body: Vec<Instruction<'static>>) -> &mut Self {
        self.scheduler = body;
        self
    }

    /// Add a mutable i32 global at index 0, initialised to 0.
    pub fn with_counter(&mut self) -> &mut Self {
        self.counter = true;
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        self.assemble(true)
    }

    /// Assemble without the `go_scheduler` export.
    pub fn finish_without_scheduler(&self) -> Vec<u8> {
        self.assemble(false)
    }

    fn assemble(&self, export_scheduler: bool) -> Vec<u8> {
        let mut types = TypeSection::new();
        let mut imports = ImportSection::new();
        for (index, (module, name, params, results)) in self.imports.iter().enumerate() {
            types.ty().function(params.clone(), results.clone());
            imports.import(module, name, EntityType::Function(index as u32));
        }
        let void_type = self.imports.len() as u32;
        types.ty().function(vec![], vec![]);

        let mut functions = FunctionSection::new();
        functions.function(void_type);
        functions.function(void_type);

        let mut memory = MemorySection::new();
        memory.memory(MemoryType {
            minimum: 1,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });

        let mut globals = GlobalSection::new();
        if self.counter {
            globals.global(
                GlobalType {
                    val_type: I32,
                    mutable: true,
                    shared: false,
                },
                &ConstExpr::i32_const(0),
            );
        }

        let first_local = self.imports.len() as u32;
        let mut exports = ExportSection::new();
        exports.export("memory", ExportKind::Memory, 0);
        exports.export("_start", ExportKind::Func, first_local);
        if export_scheduler {
            exports.export("go_scheduler", ExportKind::Func, first_local + 1);
        }

        let mut code = CodeSection::new();
        for body in [&self.start, &self.scheduler] {
            let mut f = Function::new(vec![]);
            for instruction in body {
                f.instruction(instruction);
            }
            f.instruction(&Instruction::End);
            code.function(&f);
        }

        let mut data = DataSection::new();
        for (offset, bytes) in &self.data {
            data.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
        }

        let mut module = Module::new();
        module.section(&types);
        module.section(&imports);
        module.section(&functions);
        module.section(&memory);
        if self.counter {
            module.section(&globals);
        }
        module.section(&exports);
        module.section(&code);
        module.section(&data);
        module.finish()
    }
}

pub fn memarg(offset: u64, align: u32) -> MemArg {
    MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

/// `import(args..., 0, 0)`: a `syscall/js` call with zeroed context words.
pub fn js_call(func: u32, args: &[i32]) -> Vec<Instruction<'static>> {
    let mut out: Vec<Instruction<'static>> =
        args.iter().map(|a| Instruction::I32Const(*a)).collect();
    out.push(Instruction::I32Const(0));
    out.push(Instruction::I32Const(0));
    out.push(Instruction::Call(func));
    out
}

/// `proc_exit(code)`
pub fn exit_with(proc_exit: u32, code: i32) -> Vec<Instruction<'static>> {
    vec![Instruction::I32Const(code), Instruction::Call(proc_exit)]
}

/// Copy the 8-byte slot at `from` to `to`.
pub fn copy_slot(from: i32, to: i32) -> Vec<Instruction<'static>> {
    vec![
        Instruction::I32Const(to),
        Instruction::I32Const(from),
        Instruction::I64Load(memarg(0, 3)),
        Instruction::I64Store(memarg(0, 3)),
    ]
}

/// Read a little-endian u64 from a memory snapshot.
pub fn slot_at(mem: &[u8], addr: usize) -> u64 {
    u64::from_le_bytes(mem[addr..addr + 8].try_into().unwrap())
}

pub fn u32_at(mem: &[u8], addr: usize) -> u32 {
    u32::from_le_bytes(mem[addr..addr + 4].try_into().unwrap())
}

pub fn f64_at(mem: &[u8], addr: usize) -> f64 {
    f64::from_bits(slot_at(mem, addr))
}
