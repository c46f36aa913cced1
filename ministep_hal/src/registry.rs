//! Signal registry: fixed-capacity arena of named, typed pins and parameters.
//!
//! The arena is sized once at construction and never grows, so the storage
//! behind a [`SignalHandle`] never moves. Values live in atomic words:
//! `Bit` as 0/1, `S32` as the sign-extended two's complement, `Float` as the
//! `f64` bit pattern. Handles read and write without locking.
//!
//! Name lookup, linking and parameter writes by name go through a
//! `parking_lot::Mutex` and are meant for wiring and configuration only.
//!
//! ## Linking
//!
//! Every slot carries a target index, initially itself. Linking an input
//! pin to an output pin points the input's target at the output's storage;
//! the input's own word is left unused. Storage is never moved or copied.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

use ministep_common::consts::{DEFAULT_MAX_SIGNALS, MAX_NAME_LEN};

/// Fixed-capacity name storage.
pub type SignalName = heapless::String<48>;

// ─── Error Types ────────────────────────────────────────────────────

/// Registry errors. All of them are raised at wiring time only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A signal, parameter or component with this name already exists.
    #[error("Name '{0}' is already registered")]
    DuplicateName(String),

    /// The arena has no free slot left.
    #[error("Registry arena exhausted ({capacity} slots)")]
    OutOfSpace { capacity: usize },

    /// No signal or parameter with this name.
    #[error("No signal or parameter named '{0}'")]
    NotFound(String),

    /// Value or peer type does not match the declared type.
    #[error("Type mismatch on '{name}': declared {declared}, got {got}")]
    TypeMismatch {
        name: String,
        declared: SignalType,
        got: SignalType,
    },

    /// Link endpoints have incompatible directions.
    #[error("Cannot link '{from}' to '{to}': direction mismatch")]
    DirectionMismatch { from: String, to: String },

    /// Write rejected: output pin or read-only parameter.
    #[error("'{0}' is read-only")]
    ReadOnly(String),

    /// Name is empty, too long, non-ASCII or contains whitespace.
    #[error("Invalid name '{0}' (1..={MAX_NAME_LEN} ASCII characters, no whitespace)")]
    InvalidName(String),

    /// Input pin is already linked.
    #[error("'{0}' is already linked")]
    AlreadyLinked(String),

    /// Component id was not issued by this registry.
    #[error("Unknown component id {0}")]
    UnknownComponent(u32),
}

// ─── Signal metadata ────────────────────────────────────────────────

/// Value type of a signal or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    Bit,
    S32,
    Float,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bit => "bit",
            Self::S32 => "s32",
            Self::Float => "float",
        })
    }
}

/// Data flow direction of a pin, seen from its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinDirection {
    In,
    Out,
    InOut,
}

impl PinDirection {
    #[inline]
    const fn can_drive(self) -> bool {
        !matches!(self, Self::In)
    }

    #[inline]
    const fn can_follow(self) -> bool {
        !matches!(self, Self::Out)
    }
}

/// Who may change a parameter after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamAccess {
    ReadOnly,
    ReadWrite,
}

/// Pin or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Pin(PinDirection),
    Param(ParamAccess),
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pin(PinDirection::In) => "IN",
            Self::Pin(PinDirection::Out) => "OUT",
            Self::Pin(PinDirection::InOut) => "I/O",
            Self::Param(ParamAccess::ReadOnly) => "RO",
            Self::Param(ParamAccess::ReadWrite) => "RW",
        })
    }
}

/// A typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bit(bool),
    S32(i32),
    Float(f64),
}

impl Value {
    pub const fn ty(&self) -> SignalType {
        match self {
            Self::Bit(_) => SignalType::Bit,
            Self::S32(_) => SignalType::S32,
            Self::Float(_) => SignalType::Float,
        }
    }

    #[inline]
    fn to_word(self) -> u64 {
        match self {
            Self::Bit(b) => u64::from(b),
            Self::S32(v) => i64::from(v) as u64,
            Self::Float(v) => v.to_bits(),
        }
    }

    #[inline]
    fn from_word(ty: SignalType, word: u64) -> Self {
        match ty {
            SignalType::Bit => Self::Bit(word != 0),
            SignalType::S32 => Self::S32(word as i64 as i32),
            SignalType::Float => Self::Float(f64::from_bits(word)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::S32(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Identifier of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Listing entry returned by [`Registry::signals`] and [`Registry::info`].
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub name: String,
    pub ty: SignalType,
    pub kind: SignalKind,
    pub owner: String,
    pub linked_to: Option<String>,
    pub value: Value,
}

// ─── Arena ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct Slot {
    word: AtomicU64,
    target: AtomicU32,
}

#[derive(Debug)]
struct Entry {
    name: SignalName,
    ty: SignalType,
    kind: SignalKind,
    owner: ComponentId,
    linked_to: Option<u32>,
}

#[derive(Debug, Default)]
struct Catalog {
    entries: Vec<Entry>,
    by_name: HashMap<SignalName, u32>,
    components: Vec<SignalName>,
}

#[derive(Debug)]
struct Arena {
    slots: Box<[Slot]>,
    catalog: Mutex<Catalog>,
}

impl Arena {
    #[inline]
    fn storage(&self, index: u32) -> &AtomicU64 {
        let target = self.slots[index as usize].target.load(Ordering::Relaxed);
        &self.slots[target as usize].word
    }
}

fn validate_name(name: &str) -> Result<SignalName, RegistryError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_graphic());
    if !valid {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    SignalName::try_from(name).map_err(|_| RegistryError::InvalidName(name.to_string()))
}

// ─── Handle ─────────────────────────────────────────────────────────

/// Lock-free access to one signal or parameter.
///
/// Reads follow the link target; writes go to the same storage.
#[derive(Clone)]
pub struct SignalHandle {
    arena: Arc<Arena>,
    index: u32,
    ty: SignalType,
}

impl SignalHandle {
    pub fn ty(&self) -> SignalType {
        self.ty
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn get(&self) -> Value {
        Value::from_word(self.ty, self.arena.storage(self.index).load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: Value) {
        debug_assert_eq!(value.ty(), self.ty);
        self.arena
            .storage(self.index)
            .store(value.to_word(), Ordering::Relaxed);
    }

    #[inline]
    pub fn get_bit(&self) -> bool {
        self.arena.storage(self.index).load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn set_bit(&self, value: bool) {
        self.set(Value::Bit(value));
    }

    #[inline]
    pub fn get_s32(&self) -> i32 {
        self.arena.storage(self.index).load(Ordering::Relaxed) as i64 as i32
    }

    #[inline]
    pub fn set_s32(&self, value: i32) {
        self.set(Value::S32(value));
    }

    #[inline]
    pub fn get_f64(&self) -> f64 {
        f64::from_bits(self.arena.storage(self.index).load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_f64(&self, value: f64) {
        self.set(Value::Float(value));
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandle")
            .field("index", &self.index)
            .field("ty", &self.ty)
            .finish()
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Shared registry handle. Cloning shares the same arena.
#[derive(Clone, Debug)]
pub struct Registry {
    arena: Arc<Arena>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIGNALS)
    }
}

impl Registry {
    /// Create a registry with room for `capacity` signals and parameters.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                word: AtomicU64::new(0),
                target: AtomicU32::new(i as u32),
            })
            .collect();
        Self {
            arena: Arc::new(Arena {
                slots,
                catalog: Mutex::new(Catalog {
                    entries: Vec::with_capacity(capacity),
                    ..Catalog::default()
                }),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.arena.slots.len()
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.arena.catalog.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a component and return its id.
    pub fn register_component(&self, name: &str) -> Result<ComponentId, RegistryError> {
        let name = validate_name(name)?;
        let mut catalog = self.arena.catalog.lock();
        if catalog.components.contains(&name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let id = ComponentId(catalog.components.len() as u32);
        catalog.components.push(name);
        Ok(id)
    }

    /// Create a pin owned by `owner`.
    pub fn create_signal(
        &self,
        owner: ComponentId,
        name: &str,
        ty: SignalType,
        direction: PinDirection,
    ) -> Result<SignalHandle, RegistryError> {
        self.allocate(owner, name, ty, SignalKind::Pin(direction))
    }

    /// Create a parameter owned by `owner`.
    pub fn create_parameter(
        &self,
        owner: ComponentId,
        name: &str,
        ty: SignalType,
        access: ParamAccess,
    ) -> Result<SignalHandle, RegistryError> {
        self.allocate(owner, name, ty, SignalKind::Param(access))
    }

    fn allocate(
        &self,
        owner: ComponentId,
        name: &str,
        ty: SignalType,
        kind: SignalKind,
    ) -> Result<SignalHandle, RegistryError> {
        let name = validate_name(name)?;
        let mut catalog = self.arena.catalog.lock();
        if owner.0 as usize >= catalog.components.len() {
            return Err(RegistryError::UnknownComponent(owner.0));
        }
        if catalog.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let index = catalog.entries.len();
        if index >= self.arena.slots.len() {
            return Err(RegistryError::OutOfSpace {
                capacity: self.arena.slots.len(),
            });
        }

        let index = index as u32;
        catalog.by_name.insert(name.clone(), index);
        catalog.entries.push(Entry {
            name,
            ty,
            kind,
            owner,
            linked_to: None,
        });
        Ok(SignalHandle {
            arena: Arc::clone(&self.arena),
            index,
            ty,
        })
    }

    fn find(catalog: &Catalog, name: &str) -> Result<u32, RegistryError> {
        SignalName::try_from(name)
            .ok()
            .and_then(|key| catalog.by_name.get(&key).copied())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Look up a handle by name. Wiring time only.
    pub fn handle(&self, name: &str) -> Result<SignalHandle, RegistryError> {
        let catalog = self.arena.catalog.lock();
        let index = Self::find(&catalog, name)?;
        Ok(SignalHandle {
            arena: Arc::clone(&self.arena),
            index,
            ty: catalog.entries[index as usize].ty,
        })
    }

    /// Make input pin `sink` read the storage of pin `source`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if either name is unknown
    /// - `TypeMismatch` if the pin types differ
    /// - `DirectionMismatch` if `source` cannot drive or `sink` cannot follow,
    ///   or either is a parameter
    /// - `AlreadyLinked` if `sink` already follows another pin
    pub fn link(&self, source: &str, sink: &str) -> Result<(), RegistryError> {
        let mut catalog = self.arena.catalog.lock();
        let from = Self::find(&catalog, source)?;
        let to = Self::find(&catalog, sink)?;

        let (from_entry, to_entry) = (&catalog.entries[from as usize], &catalog.entries[to as usize]);
        if from_entry.ty != to_entry.ty {
            return Err(RegistryError::TypeMismatch {
                name: sink.to_string(),
                declared: to_entry.ty,
                got: from_entry.ty,
            });
        }
        let directions_ok = match (from_entry.kind, to_entry.kind) {
            (SignalKind::Pin(d_from), SignalKind::Pin(d_to)) => {
                from != to && d_from.can_drive() && d_to.can_follow()
            }
            _ => false,
        };
        if !directions_ok {
            return Err(RegistryError::DirectionMismatch {
                from: source.to_string(),
                to: sink.to_string(),
            });
        }
        if to_entry.linked_to.is_some() {
            return Err(RegistryError::AlreadyLinked(sink.to_string()));
        }

        let slots = &self.arena.slots;
        let target = slots[from as usize].target.load(Ordering::Relaxed);
        if target == to {
            return Err(RegistryError::DirectionMismatch {
                from: source.to_string(),
                to: sink.to_string(),
            });
        }
        // Pins already following `sink` move along with it.
        for slot in slots.iter().take(catalog.entries.len()) {
            if slot.target.load(Ordering::Relaxed) == to {
                slot.target.store(target, Ordering::Relaxed);
            }
        }
        catalog.entries[to as usize].linked_to = Some(from);
        debug!(source, sink, "linked");
        Ok(())
    }

    /// Configuration-path write by name.
    ///
    /// Allowed on read-write parameters and on input pins that are not linked.
    pub fn set_value(&self, name: &str, value: Value) -> Result<(), RegistryError> {
        let catalog = self.arena.catalog.lock();
        let index = Self::find(&catalog, name)?;
        let entry = &catalog.entries[index as usize];
        if entry.ty != value.ty() {
            return Err(RegistryError::TypeMismatch {
                name: name.to_string(),
                declared: entry.ty,
                got: value.ty(),
            });
        }
        match entry.kind {
            SignalKind::Param(ParamAccess::ReadWrite) => {}
            SignalKind::Pin(direction) if direction.can_follow() => {
                if entry.linked_to.is_some() {
                    return Err(RegistryError::AlreadyLinked(name.to_string()));
                }
            }
            _ => return Err(RegistryError::ReadOnly(name.to_string())),
        }
        self.arena
            .storage(index)
            .store(value.to_word(), Ordering::Relaxed);
        Ok(())
    }

    /// Read any signal or parameter by name.
    pub fn get_value(&self, name: &str) -> Result<Value, RegistryError> {
        let catalog = self.arena.catalog.lock();
        let index = Self::find(&catalog, name)?;
        let ty = catalog.entries[index as usize].ty;
        Ok(Value::from_word(
            ty,
            self.arena.storage(index).load(Ordering::Relaxed),
        ))
    }

    /// Metadata and current value of one signal.
    pub fn info(&self, name: &str) -> Result<SignalInfo, RegistryError> {
        let catalog = self.arena.catalog.lock();
        let index = Self::find(&catalog, name)?;
        Ok(self.describe(&catalog, index))
    }

    /// Snapshot of every signal and parameter, in creation order.
    pub fn signals(&self) -> Vec<SignalInfo> {
        let catalog = self.arena.catalog.lock();
        (0..catalog.entries.len() as u32)
            .map(|index| self.describe(&catalog, index))
            .collect()
    }

    fn describe(&self, catalog: &Catalog, index: u32) -> SignalInfo {
        let entry = &catalog.entries[index as usize];
        SignalInfo {
            name: entry.name.to_string(),
            ty: entry.ty,
            kind: entry.kind,
            owner: catalog.components[entry.owner.0 as usize].to_string(),
            linked_to: entry
                .linked_to
                .map(|peer| catalog.entries[peer as usize].name.to_string()),
            value: Value::from_word(entry.ty, self.arena.storage(index).load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_owner() -> (Registry, ComponentId) {
        let registry = Registry::new(16);
        let owner = registry.register_component("test").unwrap();
        (registry, owner)
    }

    #[test]
    fn handles_read_back_written_values() {
        let (registry, owner) = registry_with_owner();
        let bit = registry
            .create_signal(owner, "test.0.enable", SignalType::Bit, PinDirection::Out)
            .unwrap();
        let s32 = registry
            .create_signal(owner, "test.0.counts", SignalType::S32, PinDirection::Out)
            .unwrap();
        let float = registry
            .create_parameter(owner, "test.0.scale", SignalType::Float, ParamAccess::ReadWrite)
            .unwrap();

        bit.set_bit(true);
        s32.set_s32(-42);
        float.set_f64(2.5);

        assert!(bit.get_bit());
        assert_eq!(s32.get_s32(), -42);
        assert_eq!(float.get_f64(), 2.5);
        assert_eq!(registry.get_value("test.0.counts"), Ok(Value::S32(-42)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (registry, owner) = registry_with_owner();
        registry
            .create_signal(owner, "a", SignalType::Bit, PinDirection::In)
            .unwrap();
        let err = registry
            .create_parameter(owner, "a", SignalType::Float, ParamAccess::ReadOnly)
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("a".into()));
        assert_eq!(
            registry.register_component("test"),
            Err(RegistryError::DuplicateName("test".into()))
        );
    }

    #[test]
    fn arena_does_not_grow() {
        let registry = Registry::new(2);
        let owner = registry.register_component("c").unwrap();
        registry
            .create_signal(owner, "c.a", SignalType::Bit, PinDirection::In)
            .unwrap();
        registry
            .create_signal(owner, "c.b", SignalType::Bit, PinDirection::In)
            .unwrap();
        let err = registry
            .create_signal(owner, "c.c", SignalType::Bit, PinDirection::In)
            .unwrap_err();
        assert_eq!(err, RegistryError::OutOfSpace { capacity: 2 });
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn names_are_validated() {
        let (registry, owner) = registry_with_owner();
        let long = "x".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "has space", long.as_str(), "tab\tname", "ünï"] {
            let err = registry
                .create_signal(owner, bad, SignalType::Bit, PinDirection::In)
                .unwrap_err();
            assert!(matches!(err, RegistryError::InvalidName(_)), "{bad:?}");
        }
        let exact = "y".repeat(MAX_NAME_LEN);
        assert!(
            registry
                .create_signal(owner, &exact, SignalType::Bit, PinDirection::In)
                .is_ok()
        );
    }

    #[test]
    fn linked_input_follows_output() {
        let (registry, owner) = registry_with_owner();
        let out = registry
            .create_signal(owner, "src.out", SignalType::Float, PinDirection::Out)
            .unwrap();
        let input = registry
            .create_signal(owner, "dst.in", SignalType::Float, PinDirection::In)
            .unwrap();

        registry.link("src.out", "dst.in").unwrap();
        out.set_f64(7.25);
        assert_eq!(input.get_f64(), 7.25);

        let info = registry.info("dst.in").unwrap();
        assert_eq!(info.linked_to.as_deref(), Some("src.out"));
        assert_eq!(
            registry.link("src.out", "dst.in"),
            Err(RegistryError::AlreadyLinked("dst.in".into()))
        );
    }

    #[test]
    fn followers_move_when_inout_pin_is_linked() {
        let (registry, owner) = registry_with_owner();
        let driver = registry
            .create_signal(owner, "drv", SignalType::Bit, PinDirection::Out)
            .unwrap();
        registry
            .create_signal(owner, "mid", SignalType::Bit, PinDirection::InOut)
            .unwrap();
        let leaf = registry
            .create_signal(owner, "leaf", SignalType::Bit, PinDirection::In)
            .unwrap();

        registry.link("mid", "leaf").unwrap();
        registry.link("drv", "mid").unwrap();
        driver.set_bit(true);
        assert!(leaf.get_bit());
    }

    #[test]
    fn link_checks_type_and_direction() {
        let (registry, owner) = registry_with_owner();
        registry
            .create_signal(owner, "out.f", SignalType::Float, PinDirection::Out)
            .unwrap();
        registry
            .create_signal(owner, "out.b", SignalType::Bit, PinDirection::Out)
            .unwrap();
        registry
            .create_signal(owner, "in.b", SignalType::Bit, PinDirection::In)
            .unwrap();
        registry
            .create_parameter(owner, "param.b", SignalType::Bit, ParamAccess::ReadWrite)
            .unwrap();

        assert!(matches!(
            registry.link("out.f", "in.b"),
            Err(RegistryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.link("in.b", "out.b"),
            Err(RegistryError::DirectionMismatch { .. })
        ));
        assert!(matches!(
            registry.link("out.b", "param.b"),
            Err(RegistryError::DirectionMismatch { .. })
        ));
        assert_eq!(
            registry.link("nope", "in.b"),
            Err(RegistryError::NotFound("nope".into()))
        );
    }

    #[test]
    fn set_value_respects_access() {
        let (registry, owner) = registry_with_owner();
        registry
            .create_parameter(owner, "p.rw", SignalType::Float, ParamAccess::ReadWrite)
            .unwrap();
        registry
            .create_parameter(owner, "p.ro", SignalType::S32, ParamAccess::ReadOnly)
            .unwrap();
        registry
            .create_signal(owner, "pin.out", SignalType::Bit, PinDirection::Out)
            .unwrap();
        registry
            .create_signal(owner, "pin.in", SignalType::Bit, PinDirection::In)
            .unwrap();

        registry.set_value("p.rw", Value::Float(3.0)).unwrap();
        registry.set_value("pin.in", Value::Bit(true)).unwrap();
        assert_eq!(registry.get_value("p.rw"), Ok(Value::Float(3.0)));
        assert_eq!(registry.get_value("pin.in"), Ok(Value::Bit(true)));

        assert_eq!(
            registry.set_value("p.ro", Value::S32(1)),
            Err(RegistryError::ReadOnly("p.ro".into()))
        );
        assert_eq!(
            registry.set_value("pin.out", Value::Bit(true)),
            Err(RegistryError::ReadOnly("pin.out".into()))
        );
        assert!(matches!(
            registry.set_value("p.rw", Value::Bit(true)),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn signals_lists_in_creation_order() {
        let (registry, owner) = registry_with_owner();
        registry
            .create_signal(owner, "first", SignalType::S32, PinDirection::Out)
            .unwrap();
        registry
            .create_parameter(owner, "second", SignalType::Float, ParamAccess::ReadOnly)
            .unwrap();

        let listing = registry.signals();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "first");
        assert_eq!(listing[0].owner, "test");
        assert_eq!(listing[1].kind, SignalKind::Param(ParamAccess::ReadOnly));
        assert_eq!(listing[1].value, Value::Float(0.0));
    }

    #[test]
    fn negative_s32_roundtrips_through_word() {
        for v in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert_eq!(
                Value::from_word(SignalType::S32, Value::S32(v).to_word()),
                Value::S32(v)
            );
        }
    }
}
