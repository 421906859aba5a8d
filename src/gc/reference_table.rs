//! Native reference table owned by the isolate thread.
//!
//! Every `V8Value` on the host side corresponds to exactly one entry here.
//! Inserting an entry creates a `v8::Global` (one native reference), and
//! removing it drops that global. The table lives on the isolate thread and
//! is dropped before the isolate itself.

use std::collections::HashMap;
use v8;

use super::ValueId;
use crate::error::{Error, Result};
use crate::values::ValueKind;

/// A freshly created native reference, ready to be wrapped in a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRef {
    pub id: ValueId,
    pub kind: ValueKind,
}

pub struct ReferenceTable {
    entries: HashMap<ValueId, v8::Global<v8::Value>>,
    next_id: ValueId,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create one new reference to `value`.
    pub fn insert(&mut self, scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> NativeRef {
        let id = self.next_id;
        self.next_id += 1;

        let kind = ValueKind::of(value);
        self.entries.insert(id, v8::Global::new(scope, value));

        NativeRef { id, kind }
    }

    pub fn get<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        id: ValueId,
    ) -> Result<v8::Local<'s, v8::Value>> {
        self.entries
            .get(&id)
            .map(|global| v8::Local::new(scope, global))
            .ok_or(Error::ValueAlreadyClosed)
    }

    /// Another reference to the value behind `id`.
    pub fn duplicate(&mut self, scope: &mut v8::HandleScope, id: ValueId) -> Result<NativeRef> {
        let value = self.get(scope, id)?;
        Ok(self.insert(scope, value))
    }

    /// Drop the reference. Returns false when it was not present.
    pub fn release(&mut self, id: ValueId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn release_all(&mut self, ids: &[ValueId]) -> usize {
        let released = ids.iter().filter(|id| self.release(**id)).count();
        if released > 0 {
            tracing::trace!("Released {} deferred references", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
