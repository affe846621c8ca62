//! Type-erased values carried across edges.
//!
//! Every payload is owned. Handing a value to another node always clones or
//! moves it, so no two processes ever alias the same buffer.

use crate::errors::PortError;
use std::any::{Any, TypeId};
use std::fmt;

/// A value that can travel across an edge.
///
/// Implemented for every `Clone + Send + 'static` type.
pub trait PortData: Any + Send {
    /// Clones the value into a new box.
    fn clone_boxed(&self) -> Box<dyn PortData>;

    /// Borrows the value as `Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts the box into a `Box<dyn Any>` for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> PortData for T
where
    T: Any + Send + Clone,
{
    fn clone_boxed(&self) -> Box<dyn PortData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// An owned, type-erased port value.
pub struct Payload {
    value: Box<dyn PortData>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Payload {
    /// Wraps a value.
    #[must_use]
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Clone,
    {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns the `TypeId` of the wrapped value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name of the wrapped value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the payload holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the wrapped value if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    /// Unwraps the value, checking its type against `port`.
    pub fn downcast<T: Any>(self, port: &str) -> Result<T, PortError> {
        if !self.is::<T>() {
            return Err(PortError::TypeMismatch {
                port: port.to_string(),
                expected: std::any::type_name::<T>().to_string(),
                found: self.type_name.to_string(),
            });
        }
        let type_name = self.type_name;
        self.value
            .into_any()
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| PortError::TypeMismatch {
                port: port.to_string(),
                expected: std::any::type_name::<T>().to_string(),
                found: type_name.to_string(),
            })
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone_boxed(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::new(42_i32);
        assert!(payload.is::<i32>());
        assert_eq!(payload.downcast_ref::<i32>(), Some(&42));
        assert_eq!(payload.downcast::<i32>("value").unwrap(), 42);
    }

    #[test]
    fn test_payload_type_mismatch() {
        let payload = Payload::new(String::from("frame"));
        let err = payload.downcast::<u64>("count").unwrap_err();
        assert!(matches!(err, PortError::TypeMismatch { ref port, .. } if port == "count"));
    }

    #[test]
    fn test_payload_clone_is_independent() {
        let original = Payload::new(vec![1_u8, 2, 3]);
        let copy = original.clone();
        let mut owned = copy.downcast::<Vec<u8>>("data").unwrap();
        owned.push(4);
        assert_eq!(original.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_payload_debug_names_type() {
        let payload = Payload::new(1.5_f64);
        assert!(format!("{payload:?}").contains("f64"));
    }
}
