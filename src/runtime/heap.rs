use std::collections::VecDeque;

use crate::lang::object::HeapObject;
use crate::lang::value::{HeapId, Value};

/// Flat cost charged per live object when deciding whether to collect.
const OBJ_OVERHEAD: usize = 16;

/// Overhead score at which the collector runs on the next `ret`.
const GC_THRESHOLD: usize = 8192;

/// Typed object storage with stable ids.
///
/// Slots freed by the collector queue up for reuse before the table
/// grows. After startup, preloaded objects are indistinguishable from
/// runtime allocations.
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    holes: VecDeque<HeapId>,
    overhead: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            holes: VecDeque::new(),
            overhead: 0,
        }
    }

    /// Seed the heap with the program's preloaded objects; slot ids match
    /// their positions in the preload list.
    pub fn with_preloads(preloads: Vec<HeapObject>) -> Self {
        let count = preloads.len();

        Self {
            slots: preloads.into_iter().map(Some).collect(),
            holes: VecDeque::new(),
            overhead: count * OBJ_OVERHEAD,
        }
    }

    /// Store an object, reusing a freed id when one is queued.
    pub fn alloc(&mut self, object: HeapObject) -> HeapId {
        self.overhead += OBJ_OVERHEAD;

        if let Some(id) = self.holes.pop_front() {
            self.slots[id] = Some(object);
            return id;
        }

        self.slots.push(Some(object));
        self.slots.len() - 1
    }

    pub fn get(&self, id: HeapId) -> Option<&HeapObject> {
        self.slots.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut HeapObject> {
        self.slots.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Drop an object and queue its id for reuse.
    pub fn destroy(&mut self, id: HeapId) -> bool {
        match self.slots.get_mut(id) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.overhead -= OBJ_OVERHEAD;
                self.holes.push_back(id);

                true
            }
            _ => false,
        }
    }

    /// Collection trigger signal.
    pub fn is_ripe(&self) -> bool {
        self.overhead >= GC_THRESHOLD
    }

    pub fn overhead(&self) -> usize {
        self.overhead
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Ids of every occupied slot, for the sweep phase.
    pub fn occupied_ids(&self) -> Vec<HeapId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect()
    }

    /// Render a value for display, following references into the heap.
    /// Frozen sequences print with `[]`, mutable ones with `{}`.
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Dud => "(dud)".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => format!("'{}'", (*c & 0x7f) as char),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Locator { obj, pos } => match self.get(*obj).and_then(|o| o.get(*pos)) {
                Some(cell) => self.render(cell),
                None => "(dud)".to_string(),
            },
            Value::Str(id) => match self.get(*id) {
                Some(object) => object.as_text().unwrap_or_default(),
                None => "(dud)".to_string(),
            },
            Value::Seq(id) => match self.get(*id) {
                Some(object) => self.render_sequence(object),
                None => "(dud)".to_string(),
            },
        }
    }

    fn render_sequence(&self, object: &HeapObject) -> String {
        let (open, close) = if object.is_frozen() {
            ('[', ']')
        } else {
            ('{', '}')
        };

        let mut out = String::new();

        out.push(open);

        for item in object.items() {
            out.push_str(&self.render(item));
            out.push(' ');
        }

        out.push(close);
        out
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
