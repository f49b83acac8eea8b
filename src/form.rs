//! 多值查询参数的解码
//!
//! 同名键按出现顺序归并为一组值：序列字段接收全部值，标量字段取最后一个值。

use serde::de::value::{Error as DecodeError, MapDeserializer, SeqDeserializer, StringDeserializer};
use serde::de::{DeserializeOwned, Deserializer, Error as _, IntoDeserializer, Visitor};

/// 把有序的键值对解码为目标类型
pub(crate) fn from_pairs<T>(pairs: Vec<(String, String)>) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    let mut groups: Vec<(String, Values)> = Vec::new();
    for (key, value) in pairs {
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.0.push(value),
            None => groups.push((key, Values(vec![value]))),
        }
    }

    T::deserialize(MapDeserializer::new(groups.into_iter()))
}

/// 同一个键的全部值
struct Values(Vec<String>);

impl Values {
    fn last(mut self) -> Part {
        Part(self.0.pop().unwrap_or_default())
    }
}

impl<'de> IntoDeserializer<'de, DecodeError> for Values {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! forward_to_last {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
                self.last().$method(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Values {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        if self.0.len() > 1 {
            self.deserialize_seq(visitor)
        } else {
            self.last().deserialize_any(visitor)
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let mut seq = SeqDeserializer::new(self.0.into_iter().map(Part));
        let value = visitor.visit_seq(&mut seq)?;
        seq.end()?;
        Ok(value)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.last().deserialize_unit_struct(name, visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.last().deserialize_struct(name, fields, visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.last().deserialize_enum(name, variants, visitor)
    }

    forward_to_last! {
        deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64 deserialize_char deserialize_str deserialize_string
        deserialize_bytes deserialize_byte_buf deserialize_unit deserialize_map
        deserialize_identifier deserialize_ignored_any
    }
}

/// 单个查询值，数字与布尔按文本解析
struct Part(String);

impl<'de> IntoDeserializer<'de, DecodeError> for Part {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $visit:ident,)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
                match self.0.parse() {
                    Ok(value) => visitor.$visit(value),
                    Err(err) => Err(DecodeError::custom(format_args!(
                        "invalid value {:?}: {err}",
                        self.0
                    ))),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Part {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_string(self.0)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        let variant: StringDeserializer<DecodeError> = self.0.into_deserializer();
        variant.deserialize_enum(name, variants, visitor)
    }

    parse_scalar! {
        deserialize_bool => visit_bool,
        deserialize_i8 => visit_i8,
        deserialize_i16 => visit_i16,
        deserialize_i32 => visit_i32,
        deserialize_i64 => visit_i64,
        deserialize_u8 => visit_u8,
        deserialize_u16 => visit_u16,
        deserialize_u32 => visit_u32,
        deserialize_u64 => visit_u64,
        deserialize_f32 => visit_f32,
        deserialize_f64 => visit_f64,
        deserialize_char => visit_char,
    }

    serde::forward_to_deserialize_any! {
        i128 u128 str string bytes byte_buf unit_struct seq tuple tuple_struct
        map struct identifier ignored_any
    }
}
