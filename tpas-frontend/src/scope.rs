use std::collections::HashMap;

/// A stack of nested name tables. The innermost level is searched first;
/// `find` walks outwards. Used for the type registry (`types` and `enums`
/// tables) and for the analyser's symbol scope.
pub struct ScopedMap<T> {
    levels: Vec<HashMap<String, T>>,
}

impl<T: Clone> ScopedMap<T> {
    pub fn new() -> ScopedMap<T> {
        ScopedMap {
            levels: vec![HashMap::new()],
        }
    }

    pub fn new_level(&mut self) {
        self.levels.push(HashMap::new());
    }

    pub fn drop_level(&mut self) {
        assert!(self.levels.len() > 1, "dropping the outermost level");
        self.levels.pop();
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Adds a binding to the innermost level. Returns false if the name is
    /// already bound at that level; outer bindings may be shadowed freely.
    pub fn add(&mut self, name: &str, value: T) -> bool {
        let top = self.levels.last_mut().unwrap();
        if top.contains_key(name) {
            return false;
        }
        top.insert(name.to_string(), value);
        true
    }

    pub fn find(&self, name: &str) -> Option<T> {
        for level in self.levels.iter().rev() {
            if let Some(v) = level.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    pub fn find_in_current_level(&self, name: &str) -> Option<T> {
        self.levels.last().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

impl<T: Clone> Default for ScopedMap<T> {
    fn default() -> ScopedMap<T> {
        ScopedMap::new()
    }
}
