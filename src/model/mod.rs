//! Plain metadata structures shared by every layer of the engine.

pub mod custom;
pub mod depends;
pub mod doctype;
pub mod field;
pub mod field_type;
pub mod migration;

pub use custom::{CustomField, DocTypeProperty, FieldProperty, PropertySetter, PropertyValue};
pub use doctype::{DocType, Index, Permission};
pub use field::Field;
pub use field_type::FieldType;
pub use migration::Migration;

/// Serde helpers for boolean flags that declarative records store either as
/// `true`/`false` or as `0`/`1`.
pub(crate) mod flag {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FlagVisitor;

        impl<'de> Visitor<'de> for FlagVisitor {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or 0/1")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
                Ok(v != 0)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
                Ok(v != 0)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                match v.trim() {
                    "1" | "true" | "True" => Ok(true),
                    "" | "0" | "false" | "False" => Ok(false),
                    other => Err(E::custom(format!("invalid flag value '{}'", other))),
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
                Ok(false)
            }
        }

        deserializer.deserialize_any(FlagVisitor)
    }
}
