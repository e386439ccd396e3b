//! Call arguments.
//!
//! A service method is invoked with one [`Arg`] per declared parameter, in
//! declaration order. Scalars are rendered to text up front; body values travel
//! as [`Entity`] values and are serialized later by a negotiated writer.

use crate::entity::Entity;
use std::any::Any;

/// One argument of a service method call.
///
/// # Examples
///
/// ```
/// use restgen::Arg;
///
/// let id: Arg = "abc".into();
/// let page: Arg = 3u32.into();
/// let tags: Arg = vec!["red", "blue"].into();
/// let absent: Arg = Option::<String>::None.into();
///
/// assert!(matches!(absent, Arg::Null));
/// assert_eq!(tags.values(), Some(vec!["red".to_string(), "blue".to_string()]));
/// # let _ = (id, page);
/// ```
#[derive(Debug)]
pub enum Arg {
    /// An absent value. Skipped by every role except the body.
    Null,
    /// A single scalar value.
    Text(String),
    /// A sequence; each element becomes its own parameter value.
    List(Vec<String>),
    /// A body value.
    Entity(Entity),
}

impl Arg {
    /// Wraps a body value.
    pub fn entity<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Entity(Entity::new(value))
    }

    /// Renders any sequence of displayable values into a list argument.
    pub fn list<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Arg::List(values.into_iter().map(|v| v.to_string()).collect())
    }

    /// Returns `true` for [`Arg::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Null)
    }

    /// The textual values of a scalar or list argument.
    ///
    /// Returns `None` for nulls and entities.
    pub fn values(&self) -> Option<Vec<String>> {
        match self {
            Arg::Text(value) => Some(vec![value.clone()]),
            Arg::List(values) => Some(values.clone()),
            Arg::Null | Arg::Entity(_) => None,
        }
    }

    /// The first textual value, if any.
    pub fn first_value(&self) -> Option<&str> {
        match self {
            Arg::Text(value) => Some(value),
            Arg::List(values) => values.first().map(String::as_str),
            Arg::Null | Arg::Entity(_) => None,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<Entity> for Arg {
    fn from(value: Entity) -> Self {
        Arg::Entity(value)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Into::into)
    }
}

impl<T: ToString> From<Vec<T>> for Arg {
    fn from(values: Vec<T>) -> Self {
        Arg::list(values)
    }
}

impl<T: std::fmt::Display> From<&[T]> for Arg {
    fn from(values: &[T]) -> Self {
        Arg::list(values)
    }
}

macro_rules! text_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Text(value.to_string())
                }
            }
        )*
    };
}

text_arg!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
