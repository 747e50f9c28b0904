use std::collections::HashMap;
use std::fmt::Write;

/// Where the storage of a name lives.
#[derive(Debug, Clone, Copy)]
pub enum VarLocation {
    /// Module data, zero initialised, internal linkage.
    Global(cranelift_module::DataId),
    /// A slot in the stack frame of the current function.
    Stack(cranelift_codegen::ir::StackSlot),
    /// An address captured in the entry block; used for by-reference
    /// parameters.
    Address(cranelift_codegen::ir::Value),
}

/// Scoped map from names to storage locations. A level is pushed around
/// every function compilation; `find` walks from the innermost level
/// outwards.
pub struct Environment {
    levels: Vec<HashMap<String, VarLocation>>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            levels: vec![HashMap::new()],
        }
    }

    pub fn new_level(&mut self) {
        self.levels.push(HashMap::new());
    }

    pub fn drop_level(&mut self) {
        assert!(self.levels.len() > 1, "dropping the global level");
        self.levels.pop();
    }

    /// Adds a binding to the top level. False when the name is already
    /// bound there.
    pub fn add(&mut self, name: &str, location: VarLocation) -> bool {
        let top = self.levels.last_mut().unwrap();
        if top.contains_key(name) {
            return false;
        }
        top.insert(name.to_string(), location);
        true
    }

    pub fn find(&self, name: &str) -> Option<VarLocation> {
        for level in self.levels.iter().rev() {
            if let Some(loc) = level.get(name) {
                return Some(*loc);
            }
        }
        None
    }

    /// Listing of every level for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (depth, level) in self.levels.iter().enumerate() {
            let mut names: Vec<_> = level.keys().collect();
            names.sort();
            for name in names {
                let _ = writeln!(out, "[{}] {} -> {:?}", depth, name, level[name]);
            }
        }
        out
    }
}

impl Default for Environment {
    fn default() -> Environment {
        Environment::new()
    }
}
