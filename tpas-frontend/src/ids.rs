use std::hash::Hash;
use std::sync::Mutex;

lazy_static! {
    static ref NEXT_ID: Mutex<usize> = Mutex::new(0usize);
}

/// Process-wide unique identifier. Backs AST node ids and symbol ids.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Identifier(usize);

pub fn new_id() -> Identifier {
    let mut c = NEXT_ID.lock().unwrap();
    let result = *c;
    *c += 1;
    Identifier(result)
}

impl Identifier {
    // Only meant for debugging output.
    pub fn get_number(&self) -> usize {
        self.0
    }
}
