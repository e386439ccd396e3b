//! Type-erased entity values.
//!
//! Service methods are bound at build time, so the pipeline never knows the
//! concrete Rust type of a body while it runs. [`TypeInfo`] carries the runtime
//! identity of a type and [`Entity`] carries a value tagged with it.

use std::any::{Any, TypeId};
use std::fmt;

/// Runtime identity of a Rust type.
///
/// Two `TypeInfo` values are equal when they describe the same type. Generic
/// instantiations are distinct types (`Vec<u8>` and `Vec<String>` differ).
///
/// # Examples
///
/// ```
/// use restgen::TypeInfo;
///
/// let info = TypeInfo::of::<String>();
/// assert!(info.is::<String>());
/// assert!(!info.is::<u32>());
/// ```
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    /// Returns the `TypeInfo` of `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The `TypeId` of the described type.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this describes `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl std::hash::Hash for TypeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A body value whose concrete type is only known at runtime.
///
/// Entities flow in both directions: body arguments are wrapped into an
/// `Entity` before a writer serializes them, and readers produce an `Entity`
/// which the caller downcasts back to the declared return type.
///
/// # Examples
///
/// ```
/// use restgen::Entity;
///
/// let entity = Entity::new(42u32);
/// assert!(entity.is::<u32>());
/// assert_eq!(entity.downcast_ref::<u32>(), Some(&42));
/// assert_eq!(entity.downcast::<u32>().ok(), Some(42));
/// ```
pub struct Entity {
    value: Box<dyn Any + Send + Sync>,
    type_info: TypeInfo,
}

impl Entity {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_info: TypeInfo::of::<T>(),
        }
    }

    /// The runtime type of the wrapped value.
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// Returns `true` if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_info.is::<T>()
    }

    /// Borrows the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Mutably borrows the wrapped value as a `T`.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }

    /// Unwraps the value as a `T`, handing the entity back on a type mismatch.
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Entity> {
        let type_info = self.type_info;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Entity { value, type_info }),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_info.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_info_equality_ignores_name() {
        assert_eq!(TypeInfo::of::<Vec<u8>>(), TypeInfo::of::<Vec<u8>>());
        assert_ne!(TypeInfo::of::<Vec<u8>>(), TypeInfo::of::<Vec<String>>());
    }

    #[test]
    fn test_downcast_mismatch_returns_entity() {
        let entity = Entity::new(String::from("frob"));
        let entity = entity.downcast::<u64>().unwrap_err();
        assert!(entity.is::<String>());
        assert_eq!(entity.downcast_ref::<String>().map(String::as_str), Some("frob"));
    }
}
