// osal-core: Module loader API
//
// This host has no dynamic loader; modules resolve against a static
// symbol registry populated at startup, the way a statically-linked
// flight build would.  Load records the module identity, lookup consults
// the registry.

use std::sync::OnceLock;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct ModuleSlot {
    state: Mutex<ModuleState>,
}

#[derive(Default, Clone)]
struct ModuleState {
    path: String,
}

static IMPL: OnceLock<Vec<ModuleSlot>> = OnceLock::new();

fn impl_table() -> &'static [ModuleSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_MODULES)
            .map(|_| ModuleSlot {
                state: Mutex::new(ModuleState::default()),
            })
            .collect()
    })
}

static SYMBOLS: OnceLock<Mutex<FxHashMap<String, usize>>> = OnceLock::new();

fn symbol_registry() -> &'static Mutex<FxHashMap<String, usize>> {
    SYMBOLS.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct ModuleProp {
    pub name: String,
    pub creator: ObjectId,
    pub path: String,
}

/// Register an entry point in the static symbol table.
pub fn register_symbol(symbol_name: &str, address: usize) {
    symbol_registry()
        .lock()
        .insert(symbol_name.to_string(), address);
}

/// Resolve a symbol from the static registry.
pub fn symbol_lookup(symbol_name: &str) -> OsResult<usize> {
    symbol_registry()
        .lock()
        .get(symbol_name)
        .copied()
        .ok_or(OsError::Error)
}

/// Record a module as loaded.
///
/// Static linking means no code actually moves; the identity exists so
/// dependent subsystems can reference and enumerate modules uniformly.
pub fn load(module_name: &str, path: &str) -> OsResult<ObjectId> {
    if path.is_empty() {
        return Err(OsError::FsErrPathInvalid);
    }

    let token = idmap::allocate_new(ObjectType::Module, Some(module_name))?;
    {
        let mut st = impl_table()[token.index()].state.lock();
        *st = ModuleState {
            path: path.to_string(),
        };
    }
    debug!(module = module_name, path, "module recorded against static loader");
    idmap::finalize_new(Ok(()), token)
}

/// Unload a module.
pub fn unload(module_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Module, module_id)?;
    *impl_table()[token.index()].state.lock() = ModuleState::default();
    idmap::finalize_delete(Ok(()), token)
}

/// Find a module by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::Module, name)
}

/// Report the recorded properties of a module.
pub fn get_info(module_id: ObjectId) -> OsResult<ModuleProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Module, module_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let path = impl_table()[token.index()].state.lock().path.clone();
    drop(token);
    Ok(ModuleProp {
        name,
        creator,
        path,
    })
}
