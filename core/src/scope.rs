//! Two-phase name resolution.
//!
//! At compile time a [`SymbolTable`] assigns every local name a [`SymbolId`],
//! nesting lexically with a parent pointer. At run time a [`Scope`] provides
//! storage for the slots of one table, chained to its parent scope the same
//! way. Closures keep their defining scope alive by holding an `Arc` to it.
//!
//! Ids are allocated from a registry shared by a whole table tree, so an id
//! names exactly one declaration across all nested tables. That lets the
//! interpreter find a variable by walking the scope chain and asking each
//! scope whether it owns the slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ecow::EcoString;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::errors::RuntimeError;
use crate::values::Value;

/// A slot identifier, unique within a symbol table tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl core::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id allocator and reverse name index shared by a table tree.
#[derive(Debug, Default)]
struct SymbolRegistry {
    names: RwLock<Vec<EcoString>>,
}

impl SymbolRegistry {
    fn allocate(&self, name: &EcoString) -> SymbolId {
        let mut names = self.names.write();
        names.push(name.clone());
        SymbolId((names.len() - 1) as u32)
    }

    fn name_of(&self, id: SymbolId) -> Option<EcoString> {
        self.names.read().get(id.0 as usize).cloned()
    }
}

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Compile-time name to slot mapping for one lexical block.
#[derive(Debug)]
pub struct SymbolTable {
    id: u64,
    parent: Option<Arc<SymbolTable>>,
    registry: Arc<SymbolRegistry>,
    symbols: RwLock<HashMap<EcoString, SymbolId>>,
}

impl SymbolTable {
    pub fn new_root() -> Arc<Self> {
        Arc::new(SymbolTable {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            parent: None,
            registry: Arc::new(SymbolRegistry::default()),
            symbols: RwLock::new(HashMap::new()),
        })
    }

    pub fn new_child(parent: &Arc<SymbolTable>) -> Arc<Self> {
        Arc::new(SymbolTable {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            parent: Some(parent.clone()),
            registry: parent.registry.clone(),
            symbols: RwLock::new(HashMap::new()),
        })
    }

    /// Generated id of this table, distinct for every table created.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent(&self) -> Option<&Arc<SymbolTable>> {
        self.parent.as_ref()
    }

    /// Declare `name` in this table, returning its slot. Redeclaring a name
    /// returns the existing slot.
    pub fn declare(&self, name: &str) -> SymbolId {
        let mut symbols = self.symbols.write();
        if let Some(id) = symbols.get(name) {
            return *id;
        }
        let name = EcoString::from(name);
        let id = self.registry.allocate(&name);
        symbols.insert(name, id);
        id
    }

    pub fn lookup_local(&self, name: &str) -> Option<SymbolId> {
        self.symbols.read().get(name).copied()
    }

    /// Resolve `name` through this table and its ancestors.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let mut table = Some(self);
        while let Some(current) = table {
            if let Some(id) = current.lookup_local(name) {
                return Some(id);
            }
            table = current.parent.as_deref();
        }
        None
    }

    /// Whether `id` was declared directly in this table.
    pub fn declares(&self, id: SymbolId) -> bool {
        self.symbols.read().values().any(|declared| *declared == id)
    }

    /// Name a slot was declared under, anywhere in the table tree.
    pub fn name_of(&self, id: SymbolId) -> Option<EcoString> {
        self.registry.name_of(id)
    }

    /// Names declared directly in this table, sorted by slot.
    pub fn symbols(&self) -> Vec<(EcoString, SymbolId)> {
        let mut symbols: Vec<_> = self
            .symbols
            .read()
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        symbols.sort_by_key(|(_, id)| *id);
        symbols
    }
}

/// Run-time storage for the slots of one [`SymbolTable`].
#[derive(Debug)]
pub struct Scope {
    id: u64,
    table: Arc<SymbolTable>,
    parent: Option<Arc<Scope>>,
    slots: RwLock<HashMap<SymbolId, Value>>,
    depth: usize,
}

impl Scope {
    pub fn new_root(table: &Arc<SymbolTable>) -> Arc<Self> {
        Arc::new(Scope {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            table: table.clone(),
            parent: None,
            slots: RwLock::new(HashMap::new()),
            depth: 0,
        })
    }

    pub fn new_child(parent: &Arc<Scope>, table: &Arc<SymbolTable>) -> Arc<Self> {
        Arc::new(Scope {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            table: table.clone(),
            parent: Some(parent.clone()),
            slots: RwLock::new(HashMap::new()),
            depth: parent.depth + 1,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Number of ancestors.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Read a slot stored directly in this scope.
    pub fn get_local(&self, id: SymbolId) -> Option<Value> {
        self.slots.read().get(&id).cloned()
    }

    /// Store a slot directly in this scope.
    pub fn set_local(&self, id: SymbolId, value: Value) {
        self.slots.write().insert(id, value);
    }

    /// The nearest scope in the chain (starting at `self`) that stores `id`.
    pub fn owner_of(self: &Arc<Self>, id: SymbolId) -> Option<Arc<Scope>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.slots.read().contains_key(&id) {
                return Some(current.clone());
            }
            scope = current.parent.as_ref();
        }
        None
    }

    /// The nearest scope in the chain whose table declares `id`.
    pub fn declaring_scope(self: &Arc<Self>, id: SymbolId) -> Option<Arc<Scope>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.table.declares(id) {
                return Some(current.clone());
            }
            scope = current.parent.as_ref();
        }
        None
    }

    /// Read `id` from the nearest scope in the chain that stores it.
    pub fn find(&self, id: SymbolId) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(value) = current.get_local(id) {
                return Some(value);
            }
            scope = current.parent.as_deref();
        }
        None
    }

    /// Write `id` to the scope that already stores it, else to the scope
    /// whose table declares it, else here.
    pub fn assign(self: &Arc<Self>, id: SymbolId, value: Value) {
        let target = self
            .owner_of(id)
            .or_else(|| self.declaring_scope(id))
            .unwrap_or_else(|| self.clone());
        target.set_local(id, value);
    }

    /// Atomic read-modify-write of a slot stored in this scope.
    ///
    /// The slot lock is held while `f` runs, so concurrent updates of the same
    /// slot (for example `counter++` from several tasks) never lose writes.
    /// Returns the stored result.
    pub fn update(
        &self,
        id: SymbolId,
        f: impl FnOnce(&Value) -> Result<Value, RuntimeError>,
    ) -> Result<Value, RuntimeError> {
        let mut slots = self.slots.write();
        let old = slots.get(&id).cloned().unwrap_or_default();
        let new = f(&old)?;
        slots.insert(id, new.clone());
        Ok(new)
    }

    /// Resolve a name through the table chain and read its slot.
    pub fn lookup_name(&self, name: &str) -> Option<Value> {
        let id = self.table.lookup(name)?;
        self.find(id)
    }

    /// Variables stored directly in this scope as `(name, value)`, sorted by
    /// slot.
    pub fn variables(&self) -> Vec<(EcoString, Value)> {
        let mut slots: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect();
        slots.sort_by_key(|(id, _)| *id);
        slots
            .into_iter()
            .map(|(id, value)| {
                let name = self
                    .table
                    .name_of(id)
                    .unwrap_or_else(|| EcoString::from(id.to_string()));
                (name, value)
            })
            .collect()
    }
}
