//! Module images and loaded modules
//!
//! A [`ModuleImage`] is the validated, owned description of one module: the
//! types it declares, their bindable slots and their resolvable methods. It
//! is produced either by decoding a dynamic library's descriptor or with
//! [`ModuleImage::builder`] for modules compiled into the host. A [`Module`]
//! is an image loaded into a generation together with whatever keeps its
//! code mapped.

use crate::error::LoadError;
use crate::ffi::*;
use crate::generation::GenerationId;
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Unique identifier for a loaded module (unique across generations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Storage cell of a callable slot, living inside module memory
#[derive(Clone, Copy)]
pub(crate) struct SlotCell(NonNull<AtomicPtr<c_void>>);

// Safety: the cell is an atomic; access is only made while the owning
// module is mapped (through a generation snapshot or a module reference).
unsafe impl Send for SlotCell {}
unsafe impl Sync for SlotCell {}

impl SlotCell {
    fn from_static(cell: &'static AtomicPtr<c_void>) -> Self {
        Self(NonNull::from(cell))
    }

    fn from_raw(cell: *const AtomicPtr<c_void>) -> Option<Self> {
        NonNull::new(cell as *mut AtomicPtr<c_void>).map(Self)
    }

    /// # Safety
    /// The owning module must still be mapped.
    pub(crate) unsafe fn store(&self, value: *const c_void) {
        self.0.as_ref().store(value as *mut c_void, Ordering::Release);
    }

    /// # Safety
    /// The owning module must still be mapped.
    pub(crate) unsafe fn load(&self) -> *const c_void {
        self.0.as_ref().load(Ordering::Acquire)
    }
}

/// A static slot declared by a module type
#[derive(Clone)]
pub struct SlotImage {
    name: String,
    kind: FfiSlotKind,
    signature: Option<String>,
    pub(crate) cell: SlotCell,
}

impl SlotImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FfiSlotKind {
        self.kind
    }

    /// Declared signature, if the module provided one
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

impl fmt::Debug for SlotImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotImage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("signature", &self.signature)
            .finish()
    }
}

/// A method declared by a module type
#[derive(Clone)]
pub struct MethodImage {
    name: String,
    signature: Option<String>,
    address: NonNull<c_void>,
}

// Safety: the address is only handed out, never dereferenced by the host.
unsafe impl Send for MethodImage {}
unsafe impl Sync for MethodImage {}

impl MethodImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn address(&self) -> *const c_void {
        self.address.as_ptr()
    }
}

impl fmt::Debug for MethodImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodImage")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("address", &self.address)
            .finish()
    }
}

/// A type declared by a module
#[derive(Debug, Clone)]
pub struct TypeImage {
    name: String,
    slots: Vec<SlotImage>,
    methods: Vec<MethodImage>,
}

impl TypeImage {
    /// Fully qualified name, `Namespace.Type`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &[SlotImage] {
        &self.slots
    }

    pub fn methods(&self) -> &[MethodImage] {
        &self.methods
    }
}

/// Validated description of a module's declared symbols
#[derive(Debug, Clone)]
pub struct ModuleImage {
    name: String,
    version: String,
    types: Vec<TypeImage>,
}

impl ModuleImage {
    /// Start describing a module compiled into the host
    pub fn builder(name: impl Into<String>) -> ModuleImageBuilder {
        ModuleImageBuilder {
            name: name.into(),
            version: "0.0.0".to_string(),
            types: Vec::new(),
            invalid: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn types(&self) -> &[TypeImage] {
        &self.types
    }

    /// Names of all declared types
    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Decode a module descriptor.
    ///
    /// `fallback_name` is used when the descriptor carries no name.
    ///
    /// # Safety
    /// `descriptor` must be null or point to a descriptor whose pointers are
    /// valid for the lifetime of the library that returned it.
    pub unsafe fn from_descriptor(
        descriptor: *const FfiModuleDescriptor,
        path: &Path,
        fallback_name: &str,
    ) -> Result<Self, LoadError> {
        let descriptor = descriptor
            .as_ref()
            .ok_or_else(|| LoadError::malformed(path, "descriptor function returned null"))?;

        if descriptor.abi_version != VOID_MODULE_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                found: descriptor.abi_version,
                expected: VOID_MODULE_ABI_VERSION,
            });
        }

        let name = read_optional(descriptor.name, path, "module name")?
            .unwrap_or_else(|| fallback_name.to_string());
        let version = read_optional(descriptor.version, path, "module version")?
            .unwrap_or_else(|| "0.0.0".to_string());

        let mut types = Vec::with_capacity(descriptor.type_count);
        for ty in read_array(descriptor.types, descriptor.type_count, path, "types")? {
            let type_name = read_required(ty.name, path, "type name")?;

            let mut slots = Vec::with_capacity(ty.slot_count);
            for slot in read_array(ty.slots, ty.slot_count, path, "slots")? {
                let slot_name = read_required(slot.name, path, "slot name")?;
                let kind = FfiSlotKind::from_raw(slot.kind).ok_or_else(|| {
                    let reason = format!(
                        "slot '{}.{}' has unknown kind {}",
                        type_name, slot_name, slot.kind
                    );
                    LoadError::malformed(path, reason)
                })?;
                let cell = SlotCell::from_raw(slot.cell).ok_or_else(|| {
                    let reason = format!("slot '{}.{}' has no cell", type_name, slot_name);
                    LoadError::malformed(path, reason)
                })?;
                slots.push(SlotImage {
                    signature: read_optional(slot.signature, path, "slot signature")?,
                    name: slot_name,
                    kind,
                    cell,
                });
            }

            let mut methods = Vec::with_capacity(ty.method_count);
            for method in read_array(ty.methods, ty.method_count, path, "methods")? {
                let method_name = read_required(method.name, path, "method name")?;
                let address = NonNull::new(method.address as *mut c_void).ok_or_else(|| {
                    LoadError::malformed(
                        path,
                        format!("method '{}.{}' has a null address", type_name, method_name),
                    )
                })?;
                methods.push(MethodImage {
                    signature: read_optional(method.signature, path, "method signature")?,
                    name: method_name,
                    address,
                });
            }

            types.push(TypeImage {
                name: type_name,
                slots,
                methods,
            });
        }

        let image = Self { name, version, types };
        image.validate(path)?;
        Ok(image)
    }

    /// Check for empty and duplicate names
    fn validate(&self, path: &Path) -> Result<(), LoadError> {
        let mut type_names = HashSet::new();
        for ty in &self.types {
            if ty.name.is_empty() || ty.name.starts_with('.') || ty.name.ends_with('.') {
                return Err(LoadError::malformed(path, format!("invalid type name '{}'", ty.name)));
            }
            if !type_names.insert(ty.name.as_str()) {
                let reason = format!("type '{}' declared twice", ty.name);
                return Err(LoadError::malformed(path, reason));
            }

            let mut members = HashSet::new();
            for slot in &ty.slots {
                if slot.name.is_empty() || slot.name.contains('.') {
                    return Err(LoadError::malformed(
                        path,
                        format!("invalid slot name '{}' in '{}'", slot.name, ty.name),
                    ));
                }
                if !members.insert(slot.name.as_str()) {
                    return Err(LoadError::malformed(
                        path,
                        format!("slot '{}.{}' declared twice", ty.name, slot.name),
                    ));
                }
            }

            let mut overloads = HashSet::new();
            for method in &ty.methods {
                if method.name.is_empty() || method.name.contains('.') {
                    return Err(LoadError::malformed(
                        path,
                        format!("invalid method name '{}' in '{}'", method.name, ty.name),
                    ));
                }
                if !overloads.insert((method.name.as_str(), method.signature.as_deref())) {
                    return Err(LoadError::malformed(
                        path,
                        format!(
                            "method '{}.{}' declared twice with the same signature",
                            ty.name, method.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

unsafe fn read_required(ptr: *const c_char, path: &Path, what: &str) -> Result<String, LoadError> {
    read_optional(ptr, path, what)?
        .ok_or_else(|| LoadError::malformed(path, format!("null {}", what)))
}

unsafe fn read_optional(
    ptr: *const c_char,
    path: &Path,
    what: &str,
) -> Result<Option<String>, LoadError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| LoadError::malformed(path, format!("{} is not valid UTF-8", what)))
}

unsafe fn read_array<'a, T>(
    ptr: *const T,
    count: usize,
    path: &Path,
    what: &str,
) -> Result<&'a [T], LoadError> {
    if count == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        let reason = format!("{} {} declared but array is null", count, what);
        return Err(LoadError::malformed(path, reason));
    }
    Ok(std::slice::from_raw_parts(ptr, count))
}

/// Builder for modules compiled into the host
pub struct ModuleImageBuilder {
    name: String,
    version: String,
    types: Vec<TypeImage>,
    invalid: Option<String>,
}

impl ModuleImageBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Declare a type
    pub fn ty(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(TypeImageBuilder) -> TypeImageBuilder,
    ) -> Self {
        let builder = build(TypeImageBuilder {
            image: TypeImage {
                name: name.into(),
                slots: Vec::new(),
                methods: Vec::new(),
            },
            invalid: None,
        });
        if self.invalid.is_none() {
            self.invalid = builder.invalid;
        }
        self.types.push(builder.image);
        self
    }

    /// Validate and finish
    pub fn build(self) -> Result<ModuleImage, LoadError> {
        let path = PathBuf::from(format!("<static:{}>", self.name));
        if let Some(reason) = self.invalid {
            return Err(LoadError::malformed(path, reason));
        }
        let image = ModuleImage {
            name: self.name,
            version: self.version,
            types: self.types,
        };
        image.validate(&path)?;
        Ok(image)
    }
}

/// Builder for one type of a static module
pub struct TypeImageBuilder {
    image: TypeImage,
    invalid: Option<String>,
}

impl TypeImageBuilder {
    /// Declare a bindable function-pointer slot
    pub fn slot(self, name: impl Into<String>, cell: &'static AtomicPtr<c_void>) -> Self {
        self.push_slot(name.into(), FfiSlotKind::FnPointer, None, cell)
    }

    /// Declare a bindable slot with a signature
    pub fn typed_slot(
        self,
        name: impl Into<String>,
        signature: impl Into<String>,
        cell: &'static AtomicPtr<c_void>,
    ) -> Self {
        self.push_slot(name.into(), FfiSlotKind::FnPointer, Some(signature.into()), cell)
    }

    /// Declare a plain data slot
    pub fn data(self, name: impl Into<String>, cell: &'static AtomicPtr<c_void>) -> Self {
        self.push_slot(name.into(), FfiSlotKind::Data, None, cell)
    }

    /// Declare a method
    pub fn method(self, name: impl Into<String>, address: *const c_void) -> Self {
        self.push_method(name.into(), None, address)
    }

    /// Declare a method with a signature
    pub fn typed_method(
        self,
        name: impl Into<String>,
        signature: impl Into<String>,
        address: *const c_void,
    ) -> Self {
        self.push_method(name.into(), Some(signature.into()), address)
    }

    fn push_slot(
        mut self,
        name: String,
        kind: FfiSlotKind,
        signature: Option<String>,
        cell: &'static AtomicPtr<c_void>,
    ) -> Self {
        self.image.slots.push(SlotImage {
            name,
            kind,
            signature,
            cell: SlotCell::from_static(cell),
        });
        self
    }

    fn push_method(
        mut self,
        name: String,
        signature: Option<String>,
        address: *const c_void,
    ) -> Self {
        match NonNull::new(address as *mut c_void) {
            Some(address) => self.image.methods.push(MethodImage {
                name,
                signature,
                address,
            }),
            None => {
                if self.invalid.is_none() {
                    let reason =
                        format!("method '{}.{}' has a null address", self.image.name, name);
                    self.invalid = Some(reason);
                }
            }
        }
        self
    }
}

/// What keeps a module's code mapped
pub enum ModuleBacking {
    /// Code is part of the host binary
    Static,
    /// Code lives in a dynamic library
    Library {
        library: libloading::Library,
        /// Shadow copy to delete once the library is closed
        shadow: Option<PathBuf>,
    },
}

impl fmt::Debug for ModuleBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleBacking::Static => write!(f, "Static"),
            ModuleBacking::Library { shadow, .. } => {
                f.debug_struct("Library").field("shadow", shadow).finish()
            }
        }
    }
}

/// A module loaded into a generation
pub struct Module {
    id: ModuleId,
    generation: GenerationId,
    path: PathBuf,
    image: ModuleImage,
    backing: Option<ModuleBacking>,
}

impl Module {
    pub(crate) fn new(
        id: ModuleId,
        generation: GenerationId,
        path: PathBuf,
        image: ModuleImage,
        backing: ModuleBacking,
    ) -> Self {
        Self {
            id,
            generation,
            path,
            image,
            backing: Some(backing),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Generation this module was loaded into
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Path the module was requested from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.image.name()
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Whether the code lives in a dynamic library
    pub fn is_dynamic(&self) -> bool {
        matches!(self.backing, Some(ModuleBacking::Library { .. }))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("name", &self.image.name)
            .field("path", &self.path)
            .field("backing", &self.backing)
            .finish()
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        log::debug!(
            "Unloading module '{}' ({}) of generation {}",
            self.image.name,
            self.id,
            self.generation
        );

        if let Some(ModuleBacking::Library { library, shadow }) = self.backing.take() {
            if let Err(e) = library.close() {
                log::warn!("Failed to close module '{}': {}", self.image.name, e);
            }
            if let Some(shadow) = shadow {
                if let Err(e) = std::fs::remove_file(&shadow) {
                    log::debug!("Could not remove shadow copy {}: {}", shadow.display(), e);
                }
            }
        }
    }
}
