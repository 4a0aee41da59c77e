//! String interning for names, field names, and scalar type spellings.
//!
//! Interned ids are `Copy` and cheap to hash, so declaration names and type
//! spellings can be compared without touching string data. `get_or_intern`
//! takes `&self` so the interner can be shared read-mostly across passes.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// An interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

#[derive(Debug, Default)]
struct InternerState {
    map: FxHashMap<String, StringId>,
    strings: Vec<String>,
}

/// Append-only string table with interior mutability.
#[derive(Debug, Default)]
pub struct StringInterner {
    state: Mutex<InternerState>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning the existing id if it was seen before.
    pub fn get_or_intern(&self, s: &str) -> StringId {
        let mut state = self.state.lock();
        if let Some(&id) = state.map.get(s) {
            return id;
        }
        let id = StringId(state.strings.len() as u32);
        state.strings.push(s.to_owned());
        state.map.insert(s.to_owned(), id);
        id
    }

    /// Look up an id without interning. Returns `None` for unseen strings.
    pub fn get(&self, s: &str) -> Option<StringId> {
        self.state.lock().map.get(s).copied()
    }

    /// Resolve an id back to its string.
    pub fn resolve(&self, id: StringId) -> String {
        self.state.lock().strings[id.0 as usize].clone()
    }
}
