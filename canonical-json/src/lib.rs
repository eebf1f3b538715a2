// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `canonical-json` provides a [`serde_json::ser::Formatter`] that produces the
//! deterministic byte serialization used when hashing and signing JSON
//! documents:
//!
//! * object keys are sorted lexicographically by their serialized bytes, with
//!   duplicate keys rejected,
//! * no insignificant whitespace is emitted,
//! * strings are UTF-8, normalization form C, with only `"` and `\` escaped,
//! * numbers are integers written without an exponent; floating point values
//!   are rejected.
//!
//! ```
//! use canonical_json::CanonicalFormatter;
//! use serde::Serialize;
//!
//! let value = serde_json::json!({"b": 2, "a": 1});
//! let mut buf = Vec::new();
//! let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
//! value.serialize(&mut ser).unwrap();
//! assert_eq!(buf, br#"{"a":1,"b":2}"#);
//! ```

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

use serde_json::ser::{CharEscape, Formatter};
use std::collections::BTreeMap;
use std::io::{self, Write};
use unicode_normalization::{is_nfc_quick, IsNormalized, UnicodeNormalization};

/// A [`Formatter`] implementation for canonical JSON. Use it with
/// [`serde_json::Serializer::with_formatter`].
#[derive(Debug, Default)]
pub struct CanonicalFormatter {
    /// One entry per object currently being serialized, innermost last. While
    /// this is non-empty all output is buffered so the innermost object's
    /// entries can be sorted before they are written out.
    stack: Vec<ObjectState>,
}

#[derive(Debug, Default)]
struct ObjectState {
    /// Completed entries, ordered by the serialized key bytes.
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    key: Vec<u8>,
    value: Vec<u8>,
    writing_key: bool,
}

impl CanonicalFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes output to the real writer, or to the in-progress key or value of
    /// the innermost object.
    fn write<W: ?Sized + Write>(&mut self, writer: &mut W, bytes: &[u8]) -> io::Result<()> {
        match self.stack.last_mut() {
            None => writer.write_all(bytes),
            Some(object) => {
                if object.writing_key {
                    object.key.extend_from_slice(bytes);
                } else {
                    object.value.extend_from_slice(bytes);
                }
                Ok(())
            }
        }
    }

    fn write_integer<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        value: impl std::fmt::Display,
    ) -> io::Result<()> {
        self.write(writer, value.to_string().as_bytes())
    }
}

fn float_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "floating point numbers have no canonical JSON form",
    )
}

impl Formatter for CanonicalFormatter {
    fn write_null<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write(writer, b"null")
    }

    fn write_bool<W: ?Sized + Write>(&mut self, writer: &mut W, value: bool) -> io::Result<()> {
        let text: &[u8] = if value { b"true" } else { b"false" };
        self.write(writer, text)
    }

    fn write_i8<W: ?Sized + Write>(&mut self, writer: &mut W, value: i8) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_i16<W: ?Sized + Write>(&mut self, writer: &mut W, value: i16) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_i32<W: ?Sized + Write>(&mut self, writer: &mut W, value: i32) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_i64<W: ?Sized + Write>(&mut self, writer: &mut W, value: i64) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_i128<W: ?Sized + Write>(&mut self, writer: &mut W, value: i128) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_u8<W: ?Sized + Write>(&mut self, writer: &mut W, value: u8) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_u16<W: ?Sized + Write>(&mut self, writer: &mut W, value: u16) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_u32<W: ?Sized + Write>(&mut self, writer: &mut W, value: u32) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_u64<W: ?Sized + Write>(&mut self, writer: &mut W, value: u64) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_u128<W: ?Sized + Write>(&mut self, writer: &mut W, value: u128) -> io::Result<()> {
        self.write_integer(writer, value)
    }

    fn write_f32<W: ?Sized + Write>(&mut self, _writer: &mut W, _value: f32) -> io::Result<()> {
        Err(float_error())
    }

    fn write_f64<W: ?Sized + Write>(&mut self, _writer: &mut W, _value: f64) -> io::Result<()> {
        Err(float_error())
    }

    fn write_number_str<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        value: &str,
    ) -> io::Result<()> {
        if value.contains(&['.', 'e', 'E'][..]) {
            return Err(float_error());
        }
        self.write(writer, value.as_bytes())
    }

    fn begin_string<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write(writer, b"\"")
    }

    fn end_string<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write(writer, b"\"")
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if fragment.is_ascii() || is_nfc_quick(fragment.chars()) == IsNormalized::Yes {
            self.write(writer, fragment.as_bytes())
        } else {
            let normalized = fragment.nfc().collect::<String>();
            self.write(writer, normalized.as_bytes())
        }
    }

    /// Canonical JSON escapes only `"` and `\`; everything else (including
    /// control characters) is written as raw UTF-8.
    fn write_char_escape<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        char_escape: CharEscape,
    ) -> io::Result<()> {
        match char_escape {
            CharEscape::Quote => self.write(writer, b"\\\""),
            CharEscape::ReverseSolidus => self.write(writer, b"\\\\"),
            CharEscape::Solidus => self.write(writer, b"/"),
            CharEscape::Backspace => self.write(writer, b"\x08"),
            CharEscape::FormFeed => self.write(writer, b"\x0c"),
            CharEscape::LineFeed => self.write(writer, b"\n"),
            CharEscape::CarriageReturn => self.write(writer, b"\r"),
            CharEscape::Tab => self.write(writer, b"\t"),
            CharEscape::AsciiControl(byte) => self.write(writer, &[byte]),
        }
    }

    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write(writer, b"[")
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write(writer, b"]")
    }

    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            self.write(writer, b",")
        }
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn begin_object<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.stack.push(ObjectState::default());
        Ok(())
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        let object = self
            .stack
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unbalanced object"))?;
        let mut buf = Vec::new();
        buf.push(b'{');
        for (index, (key, value)) in object.entries.iter().enumerate() {
            if index > 0 {
                buf.push(b',');
            }
            buf.extend_from_slice(key);
            buf.push(b':');
            buf.extend_from_slice(value);
        }
        buf.push(b'}');
        self.write(writer, &buf)
    }

    fn begin_object_key<W: ?Sized + Write>(
        &mut self,
        _writer: &mut W,
        _first: bool,
    ) -> io::Result<()> {
        let object = self
            .stack
            .last_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "key outside of object"))?;
        object.key.clear();
        object.writing_key = true;
        Ok(())
    }

    fn end_object_key<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        let object = self
            .stack
            .last_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "key outside of object"))?;
        object.writing_key = false;
        Ok(())
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        let object = self
            .stack
            .last_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "value outside of object"))?;
        let key = std::mem::take(&mut object.key);
        let value = std::mem::take(&mut object.value);
        if object.entries.insert(key.clone(), value).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("duplicate key: {}", String::from_utf8_lossy(&key)),
            ));
        }
        Ok(())
    }

    fn write_raw_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        self.write(writer, fragment.as_bytes())
    }
}
